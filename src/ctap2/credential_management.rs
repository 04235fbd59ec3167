//! authenticatorCredentialManagement: list and delete stored credentials.
//!
//! With a PIN set every sub-command is authorised by
//! `HMAC(pinToken, subCommand || parameter)[..16]`; without one the user
//! confirms through a verification gesture.

use super::Engine;
use super::types::{CredentialManagementRequest, Ctap2Error};
use crate::buffer::{ByteBuffer, serialise_byte_buffers, uint32_to_bb};
use crate::store::CredentialStore;
use crate::up::{CancelToken, GestureKind, Prompt, UserGesture};

pub const SUB_GET_CREDS_METADATA: u8 = 0x01;
pub const SUB_ENUMERATE_RPS: u8 = 0x02;
pub const SUB_ENUMERATE_CREDENTIALS: u8 = 0x04;
pub const SUB_DELETE_CREDENTIAL: u8 = 0x06;

pub(crate) enum Plan {
    Metadata,
    EnumerateRps,
    EnumerateCredentials(ByteBuffer),
    Delete(ByteBuffer),
}

fn sequence(items: &[ByteBuffer]) -> Result<ByteBuffer, Ctap2Error> {
    serialise_byte_buffers(items).map_err(|e| Ctap2Error::Internal(e.to_string()))
}

fn text_or_empty(value: &Option<String>) -> ByteBuffer {
    value.as_deref().map(ByteBuffer::from_text).unwrap_or_default()
}

pub(crate) fn validate<S: CredentialStore, G: UserGesture>(
    engine: &Engine<S, G>,
    req: CredentialManagementRequest,
    cancel: &CancelToken,
) -> Result<Plan, Ctap2Error> {
    let plan = match req.sub_command {
        SUB_GET_CREDS_METADATA => Plan::Metadata,
        SUB_ENUMERATE_RPS => Plan::EnumerateRps,
        SUB_ENUMERATE_CREDENTIALS => {
            let hash = req
                .parameter
                .clone()
                .ok_or(Ctap2Error::MissingParameter("rpIdHash"))?;
            if hash.len() != 32 {
                return Err(Ctap2Error::InvalidParameter("rpIdHash"));
            }
            Plan::EnumerateCredentials(hash)
        }
        SUB_DELETE_CREDENTIAL => Plan::Delete(
            req.parameter
                .clone()
                .ok_or(Ctap2Error::MissingParameter("credentialId"))?,
        ),
        other => return Err(Ctap2Error::InvalidSubcommand(other)),
    };

    if engine.pin.is_set() {
        let param = req.pin_auth.ok_or(Ctap2Error::PinRequired)?;
        let mut message = vec![req.sub_command];
        if let Some(parameter) = &req.parameter {
            message.extend_from_slice(parameter.as_slice());
        }
        engine.pin.verify_token_auth(&message, &param)?;
    } else {
        engine.require_gesture(GestureKind::Verification, &Prompt::manage_credentials(), cancel)?;
    }
    Ok(plan)
}

pub(crate) fn execute<S: CredentialStore, G: UserGesture>(
    engine: &Engine<S, G>,
    plan: Plan,
) -> Result<Vec<ByteBuffer>, Ctap2Error> {
    let store = &engine.store;
    match plan {
        Plan::Metadata => {
            let count = store.credential_count()?;
            let remaining = store.max_credentials().saturating_sub(count);
            Ok(vec![uint32_to_bb(count as u32), uint32_to_bb(remaining as u32)])
        }
        Plan::EnumerateRps => {
            let (ids, hashes): (Vec<_>, Vec<_>) = store
                .relying_parties()?
                .into_iter()
                .map(|(id, hash)| (ByteBuffer::from_text(&id), hash))
                .unzip();
            Ok(vec![sequence(&ids)?, sequence(&hashes)?])
        }
        Plan::EnumerateCredentials(hash) => {
            let records = store.find_by_rp_hash(&hash)?;
            if records.is_empty() {
                return Err(Ctap2Error::NoCredentials);
            }
            let ids: Vec<_> = records.iter().map(|r| r.credential_id.clone()).collect();
            let users: Vec<_> = records.iter().map(|r| r.user_id.clone()).collect();
            let names: Vec<_> = records.iter().map(|r| text_or_empty(&r.user_name)).collect();
            let keys: Vec<_> = records.iter().map(|r| r.public_key.clone()).collect();
            Ok(vec![
                sequence(&ids)?,
                sequence(&users)?,
                sequence(&names)?,
                sequence(&keys)?,
            ])
        }
        Plan::Delete(id) => {
            if store.get(&id)?.is_none() {
                return Err(Ctap2Error::NoCredentials);
            }
            store.delete_key(&id)?;
            tracing::info!(cred_id = %id, "Credential deleted");
            Ok(Vec::new())
        }
    }
}
