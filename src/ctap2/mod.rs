//! CTAP2 command engine.
//!
//! A command is `tag(1) || serialise_byte_buffers(fields)`. A success
//! response is `0x00 || serialise_byte_buffers(fields)`; a failure is the
//! status byte alone. Each command runs to completion under one lock,
//! passing through Decoding, Validating, Executing and Encoding. Validating
//! has no side effects on the store, so a cancelled gesture leaves nothing
//! behind.

pub(crate) mod attestation;
pub(crate) mod authenticator_data;
pub mod client_pin;
pub mod credential_management;
pub(crate) mod get_assertion;
pub(crate) mod get_info;
pub(crate) mod make_credential;
pub mod types;

use std::sync::Mutex;

use crate::buffer::{BufferError, ByteBuffer, serialise_byte_buffers};
use crate::config::AuthenticatorConfig;
use crate::store::CredentialStore;
use crate::up::{CancelToken, GestureKind, GestureOutcome, Prompt, UserGesture, UserPresenceProof};
use client_pin::PinState;
use types::*;

pub use types::Ctap2Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Decoding,
    Validating,
    Executing,
    Encoding,
}

/// How the user was verified for this command, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verification {
    None,
    PinToken,
    Gesture,
}

pub(crate) enum Command {
    MakeCredential(MakeCredentialRequest),
    GetAssertion(GetAssertionRequest),
    GetInfo,
    ClientPin(ClientPinRequest),
    Reset,
    CredentialManagement(CredentialManagementRequest),
}

impl Command {
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, Ctap2Error> {
        let Some((&tag, body)) = bytes.split_first() else {
            return Err(BufferError::Truncated {
                declared: 1,
                available: 0,
            }
            .into());
        };
        let parse = || Fields::parse(body);
        Ok(match tag {
            CTAP2_CMD_MAKE_CREDENTIAL => Self::MakeCredential((&parse()?).try_into()?),
            CTAP2_CMD_GET_ASSERTION => Self::GetAssertion((&parse()?).try_into()?),
            CTAP2_CMD_GET_INFO => Self::GetInfo,
            CTAP2_CMD_CLIENT_PIN => Self::ClientPin((&parse()?).try_into()?),
            CTAP2_CMD_RESET => Self::Reset,
            CTAP2_CMD_CREDENTIAL_MANAGEMENT => {
                Self::CredentialManagement((&parse()?).try_into()?)
            }
            other => return Err(Ctap2Error::InvalidCommand(other)),
        })
    }

    fn name(&self) -> &'static str {
        match self {
            Self::MakeCredential(_) => "MakeCredential",
            Self::GetAssertion(_) => "GetAssertion",
            Self::GetInfo => "GetInfo",
            Self::ClientPin(_) => "ClientPIN",
            Self::Reset => "Reset",
            Self::CredentialManagement(_) => "CredentialManagement",
        }
    }
}

/// A command that passed validation, carrying whatever it was granted.
pub(crate) enum Validated {
    MakeCredential(make_credential::Plan),
    GetAssertion(get_assertion::Plan),
    GetInfo,
    ClientPin(ClientPinRequest),
    Reset,
    CredentialManagement(credential_management::Plan),
}

pub(crate) struct Engine<S, G> {
    pub(crate) store: S,
    pub(crate) gesture: G,
    pub(crate) config: AuthenticatorConfig,
    pub(crate) pin: PinState,
    state: EngineState,
}

impl<S: CredentialStore, G: UserGesture> Engine<S, G> {
    fn transition(&mut self, next: EngineState) {
        tracing::debug!(from = ?self.state, to = ?next, "Engine state");
        self.state = next;
    }

    /// Block on the user. Anything but a grant aborts the command.
    pub(crate) fn require_gesture(
        &self,
        kind: GestureKind,
        prompt: &Prompt,
        cancel: &CancelToken,
    ) -> Result<UserPresenceProof, Ctap2Error> {
        match self.gesture.request_user_gesture(kind, prompt, cancel) {
            GestureOutcome::Granted => {
                tracing::info!(?kind, "User gesture granted");
                Ok(UserPresenceProof::granted())
            }
            GestureOutcome::Denied => Err(Ctap2Error::OperationDenied),
            GestureOutcome::Cancelled => Err(Ctap2Error::KeepaliveCancel),
            GestureOutcome::TimedOut => Err(Ctap2Error::UserActionTimeout),
        }
    }

    /// Decide how the user is verified. A pinUvAuthParam must match the
    /// current PIN token; without one a `uv` request needs a verification
    /// gesture. `pin_required` refuses to go unverified once a PIN is set.
    pub(crate) fn user_verification(
        &self,
        pin_auth: Option<&PinAuth>,
        client_data_hash: &[u8],
        uv_requested: bool,
        pin_required: bool,
    ) -> Result<Verification, Ctap2Error> {
        if let Some(auth) = pin_auth {
            self.pin.verify_token_auth(client_data_hash, &auth.param)?;
            return Ok(Verification::PinToken);
        }
        if uv_requested {
            return Ok(Verification::Gesture);
        }
        if pin_required && self.pin.is_set() {
            return Err(Ctap2Error::PinRequired);
        }
        Ok(Verification::None)
    }

    fn validate(&mut self, command: Command, cancel: &CancelToken) -> Result<Validated, Ctap2Error> {
        Ok(match command {
            Command::MakeCredential(req) => {
                Validated::MakeCredential(make_credential::validate(self, req, cancel)?)
            }
            Command::GetAssertion(req) => {
                Validated::GetAssertion(get_assertion::validate(self, req, cancel)?)
            }
            Command::GetInfo => Validated::GetInfo,
            Command::ClientPin(req) => Validated::ClientPin(req),
            Command::Reset => {
                self.require_gesture(GestureKind::Presence, &Prompt::reset(), cancel)?;
                Validated::Reset
            }
            Command::CredentialManagement(req) => {
                Validated::CredentialManagement(credential_management::validate(self, req, cancel)?)
            }
        })
    }

    fn execute(&mut self, validated: Validated, cancel: &CancelToken) -> Result<Vec<ByteBuffer>, Ctap2Error> {
        match validated {
            Validated::MakeCredential(plan) => make_credential::execute(self, plan, cancel),
            Validated::GetAssertion(plan) => get_assertion::execute(self, plan, cancel),
            Validated::GetInfo => {
                let info = get_info::build_info(
                    &self.config,
                    self.store.group(),
                    self.pin.is_set(),
                    self.store.credential_count()?,
                )?;
                Ok(vec![ByteBuffer::from(info)])
            }
            Validated::ClientPin(req) => self.pin.handle(req),
            Validated::Reset => {
                if cancel.is_cancelled() {
                    return Err(Ctap2Error::KeepaliveCancel);
                }
                let removed = self.store.clear()?;
                self.pin = PinState::new(self.config.pin_retries);
                tracing::warn!(removed, "Authenticator reset");
                Ok(Vec::new())
            }
            Validated::CredentialManagement(plan) => credential_management::execute(self, plan),
        }
    }

    fn run(&mut self, bytes: &[u8], cancel: &CancelToken) -> Result<ByteBuffer, Ctap2Error> {
        self.transition(EngineState::Decoding);
        if bytes.len() > self.config.max_msg_size as usize {
            return Err(Ctap2Error::InvalidLength(bytes.len()));
        }
        let command = Command::decode(bytes)?;
        let name = command.name();
        tracing::debug!(command = name, "Command decoded");

        self.transition(EngineState::Validating);
        let validated = self.validate(command, cancel)?;

        self.transition(EngineState::Executing);
        let fields = self.execute(validated, cancel)?;

        self.transition(EngineState::Encoding);
        let mut response = ByteBuffer::from([CTAP2_OK]);
        response += serialise_byte_buffers(&fields).map_err(|e| Ctap2Error::Internal(e.to_string()))?;
        tracing::info!(command = name, len = response.len(), "Command completed");
        Ok(response)
    }
}

/// A virtual authenticator over a credential store and a user-gesture
/// source.
///
/// Commands are serialised: concurrent callers of [`process`] queue on one
/// lock, so credential creation, lookup and deletion are linearizable.
///
/// [`process`]: Authenticator::process
pub struct Authenticator<S, G> {
    engine: Mutex<Engine<S, G>>,
}

impl<S: CredentialStore, G: UserGesture> Authenticator<S, G> {
    pub fn new(store: S, gesture: G, config: AuthenticatorConfig) -> Self {
        tracing::info!(
            curve = store.group().name(),
            max_credentials = store.max_credentials(),
            "Authenticator ready"
        );
        let pin = PinState::new(config.pin_retries);
        Self {
            engine: Mutex::new(Engine {
                store,
                gesture,
                config,
                pin,
                state: EngineState::Idle,
            }),
        }
    }

    pub fn process(&self, command: &ByteBuffer) -> ByteBuffer {
        self.process_with_cancel(command, &CancelToken::new())
    }

    /// Handle one command. Cancelling `cancel` aborts a pending gesture and
    /// rolls back a registration that has not completed yet.
    ///
    /// Never fails: every error becomes a one-byte status response.
    pub fn process_with_cancel(&self, command: &ByteBuffer, cancel: &CancelToken) -> ByteBuffer {
        let mut engine = match self.engine.lock() {
            Ok(engine) => engine,
            Err(_) => {
                tracing::error!("Engine lock poisoned");
                return ByteBuffer::from([Ctap2Error::Internal(String::new()).status_byte()]);
            }
        };
        let response = match engine.run(command.as_slice(), cancel) {
            Ok(response) => response,
            Err(e) => {
                let status = e.status_byte();
                tracing::info!(status = format!("{status:#04x}"), error = %e, "Command failed");
                ByteBuffer::from([status])
            }
        };
        engine.transition(EngineState::Idle);
        response
    }

    /// Current engine state. Always `Idle` between commands.
    pub fn state(&self) -> Option<EngineState> {
        self.engine.lock().ok().map(|e| e.state)
    }

    /// Run `f` against the credential store under the engine lock.
    pub fn with_store<T>(&self, f: impl FnOnce(&S) -> T) -> Option<T> {
        self.engine.lock().ok().map(|e| f(&e.store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ec::EcGroup;
    use crate::store::SoftwareStore;
    use crate::up::AlwaysGrant;

    fn authenticator() -> Authenticator<SoftwareStore, AlwaysGrant> {
        Authenticator::new(
            SoftwareStore::in_memory(EcGroup::p256(), 8),
            AlwaysGrant,
            AuthenticatorConfig::default(),
        )
    }

    #[test]
    fn test_empty_command_is_decode_error() {
        let auth = authenticator();
        assert_eq!(auth.process(&ByteBuffer::new()), ByteBuffer::from([0x12]));
        assert_eq!(auth.state(), Some(EngineState::Idle));
    }

    #[test]
    fn test_unknown_tag() {
        let auth = authenticator();
        assert_eq!(auth.process(&ByteBuffer::from([0x55])), ByteBuffer::from([0x01]));
    }

    #[test]
    fn test_oversized_command() {
        let auth = authenticator();
        let mut cmd = ByteBuffer::from([CTAP2_CMD_GET_INFO]);
        cmd.pad_right(2000, 0).unwrap();
        assert_eq!(auth.process(&cmd), ByteBuffer::from([0x03]));
    }

    #[test]
    fn test_get_info_success_framing() {
        let auth = authenticator();
        let response = auth.process(&ByteBuffer::from([CTAP2_CMD_GET_INFO]));
        assert_eq!(response[0], CTAP2_OK);
        let fields = crate::buffer::deserialise_byte_buffers(
            &ByteBuffer::from(&response.as_slice()[1..]),
        )
        .unwrap();
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn test_user_verification_rules() {
        let auth = authenticator();
        let engine = auth.engine.lock().unwrap();
        assert_eq!(
            engine.user_verification(None, &[0u8; 32], false, true).unwrap(),
            Verification::None
        );
        assert_eq!(
            engine.user_verification(None, &[0u8; 32], true, true).unwrap(),
            Verification::Gesture
        );
        let auth_param = PinAuth { param: [0u8; 16] };
        assert!(matches!(
            engine.user_verification(Some(&auth_param), &[0u8; 32], false, false),
            Err(Ctap2Error::PinNotSet)
        ));
    }

    fn framed(tag: u8, fields: &[ByteBuffer]) -> ByteBuffer {
        let mut cmd = ByteBuffer::from([tag]);
        cmd += serialise_byte_buffers(fields).unwrap();
        cmd
    }

    fn fields(response: &ByteBuffer) -> Vec<ByteBuffer> {
        assert_eq!(response[0], CTAP2_OK, "status {:#04x}", response[0]);
        crate::buffer::deserialise_byte_buffers(&ByteBuffer::from(&response.as_slice()[1..])).unwrap()
    }

    fn make_credential(user: &str, pin_auth: Option<[u8; 16]>) -> ByteBuffer {
        let mut f = vec![
            ByteBuffer::filled(32, 0x22),
            ByteBuffer::from_text("example.com"),
            ByteBuffer::new(),
            ByteBuffer::from_text(user),
            ByteBuffer::new(),
            ByteBuffer::new(),
            serialise_byte_buffers(&[ByteBuffer::from((-7i32).to_be_bytes())]).unwrap(),
            ByteBuffer::new(),
            ByteBuffer::from([OPTION_UP]),
        ];
        if let Some(param) = pin_auth {
            f.push(ByteBuffer::from(param));
            f.push(ByteBuffer::from([1]));
        }
        framed(CTAP2_CMD_MAKE_CREDENTIAL, &f)
    }

    #[test]
    fn test_pin_gates_registration_and_sets_uv() {
        use client_pin::authenticate;
        use client_pin::platform::{get_token, set_pin};

        let auth = authenticator();
        let token = {
            let mut engine = auth.engine.lock().unwrap();
            set_pin(&mut engine.pin, "4321").unwrap();
            get_token(&mut engine.pin, "4321").unwrap()
        };

        assert_eq!(auth.process(&make_credential("alice", None)), ByteBuffer::from([0x36]));
        assert_eq!(
            auth.process(&make_credential("alice", Some([0u8; 16]))),
            ByteBuffer::from([0x33])
        );

        let pin_auth = authenticate(&token, &[0x22; 32]).unwrap();
        let id = fields(&auth.process(&make_credential("alice", Some(pin_auth))))[1].clone();

        // Silent assertion backed by the PIN token: UV without UP.
        let assertion = framed(
            CTAP2_CMD_GET_ASSERTION,
            &[
                ByteBuffer::from_text("example.com"),
                ByteBuffer::filled(32, 0x22),
                serialise_byte_buffers(&[id]).unwrap(),
                ByteBuffer::from([0]),
                ByteBuffer::from(pin_auth),
                ByteBuffer::from([1]),
            ],
        );
        let out = fields(&auth.process(&assertion));
        assert_eq!(out[1][32], 0x04);
    }

    #[test]
    fn test_client_pin_command_and_reset() {
        let auth = authenticator();
        let retries = framed(CTAP2_CMD_CLIENT_PIN, &[ByteBuffer::from([1]), ByteBuffer::from([0x01])]);
        assert_eq!(fields(&auth.process(&retries)), vec![ByteBuffer::from([8])]);

        let bad_protocol = framed(CTAP2_CMD_CLIENT_PIN, &[ByteBuffer::from([2]), ByteBuffer::from([0x01])]);
        assert_eq!(auth.process(&bad_protocol), ByteBuffer::from([0x02]));

        client_pin::platform::set_pin(&mut auth.engine.lock().unwrap().pin, "4321").unwrap();
        assert!(fields(&auth.process(&ByteBuffer::from([CTAP2_CMD_RESET]))).is_empty());
        assert!(!auth.engine.lock().unwrap().pin.is_set());
    }
}
