use crate::buffer::{BufferError, ByteBuffer, ByteReader, deserialise_byte_buffers};
use crate::ec::EcError;
use crate::store::StoreError;
use crate::tpm::TpmError;

pub const CTAP2_CMD_MAKE_CREDENTIAL: u8 = 0x01;
pub const CTAP2_CMD_GET_ASSERTION: u8 = 0x02;
pub const CTAP2_CMD_GET_INFO: u8 = 0x04;
pub const CTAP2_CMD_CLIENT_PIN: u8 = 0x06;
pub const CTAP2_CMD_RESET: u8 = 0x07;
pub const CTAP2_CMD_CREDENTIAL_MANAGEMENT: u8 = 0x0A;

pub const CTAP2_OK: u8 = 0x00;

/// Options byte bits.
pub const OPTION_UP: u8 = 0x01;
pub const OPTION_RK: u8 = 0x02;
pub const OPTION_UV: u8 = 0x04;

pub const CLIENT_DATA_HASH_LEN: usize = 32;
pub const MAX_USER_ID_LEN: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum Ctap2Error {
    #[error("invalid command {0:#04x}")]
    InvalidCommand(u8),
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("command of {0} bytes exceeds the message size limit")]
    InvalidLength(usize),
    #[error("malformed command: {0}")]
    Decode(#[from] BufferError),
    #[error("missing parameter {0}")]
    MissingParameter(&'static str),
    #[error("excluded credential present")]
    CredentialExcluded,
    #[error("credential already registered for this user")]
    AlreadyRegistered,
    #[error("unsupported algorithm")]
    UnsupportedAlgorithm,
    #[error("operation denied")]
    OperationDenied,
    #[error("credential store full")]
    KeyStoreFull,
    #[error("keepalive cancel")]
    KeepaliveCancel,
    #[error("no credentials")]
    NoCredentials,
    #[error("user action timeout")]
    UserActionTimeout,
    #[error("not allowed: {0}")]
    NotAllowed(String),
    #[error("PIN invalid")]
    PinInvalid,
    #[error("PIN blocked")]
    PinBlocked,
    #[error("PIN auth invalid")]
    PinAuthInvalid,
    #[error("PIN not set")]
    PinNotSet,
    #[error("PIN required")]
    PinRequired,
    #[error("PIN policy violation")]
    PinPolicyViolation,
    #[error("invalid subcommand {0:#04x}")]
    InvalidSubcommand(u8),
    #[error("crypto: {0}")]
    Crypto(#[from] EcError),
    #[error("cbor: {0}")]
    Cbor(String),
    #[error("store: {0}")]
    Store(StoreError),
    #[error("{0}")]
    Internal(String),
}

impl Ctap2Error {
    pub fn status_byte(&self) -> u8 {
        match self {
            Self::InvalidCommand(_) => 0x01,
            Self::InvalidParameter(_) => 0x02,
            Self::InvalidLength(_) => 0x03,
            Self::Decode(BufferError::OutOfRange { .. }) => 0x7F,
            Self::Decode(_) => 0x12,
            Self::MissingParameter(_) => 0x14,
            Self::CredentialExcluded | Self::AlreadyRegistered => 0x19,
            Self::UnsupportedAlgorithm => 0x26,
            Self::OperationDenied => 0x27,
            Self::KeyStoreFull => 0x28,
            Self::KeepaliveCancel => 0x2D,
            Self::NoCredentials => 0x2E,
            Self::UserActionTimeout => 0x2F,
            Self::NotAllowed(_) => 0x30,
            Self::PinInvalid => 0x31,
            Self::PinBlocked => 0x32,
            Self::PinAuthInvalid => 0x33,
            Self::PinNotSet => 0x35,
            Self::PinRequired => 0x36,
            Self::PinPolicyViolation => 0x37,
            Self::InvalidSubcommand(_) => 0x3E,
            Self::Crypto(_) => 0x02,
            Self::Cbor(_) | Self::Store(_) | Self::Internal(_) => 0x7F,
        }
    }
}

impl From<StoreError> for Ctap2Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AlreadyRegistered => Self::AlreadyRegistered,
            StoreError::UnknownCredential => Self::NoCredentials,
            StoreError::ResourceExhausted(_) => Self::KeyStoreFull,
            StoreError::Tpm(TpmError::Denied(msg)) => Self::NotAllowed(msg),
            StoreError::Crypto(e) => Self::Crypto(e),
            other => Self::Store(other),
        }
    }
}

/// Positional fields of a command body.
///
/// Trailing optional fields may be omitted entirely; an empty field means
/// the value is absent.
#[derive(Debug)]
pub struct Fields(Vec<ByteBuffer>);

impl Fields {
    /// An empty body carries no fields.
    pub fn parse(body: &[u8]) -> Result<Self, Ctap2Error> {
        if body.is_empty() {
            return Ok(Self(Vec::new()));
        }
        Ok(Self(deserialise_byte_buffers(&ByteBuffer::from(body))?))
    }

    pub fn optional(&self, index: usize) -> Option<&ByteBuffer> {
        self.0.get(index).filter(|f| !f.is_empty())
    }

    pub fn required(&self, index: usize, name: &'static str) -> Result<&ByteBuffer, Ctap2Error> {
        self.optional(index).ok_or(Ctap2Error::MissingParameter(name))
    }

    pub fn fixed<const N: usize>(
        &self,
        index: usize,
        name: &'static str,
    ) -> Result<[u8; N], Ctap2Error> {
        self.required(index, name)?
            .as_slice()
            .try_into()
            .map_err(|_| Ctap2Error::InvalidParameter(name))
    }

    pub fn byte(&self, index: usize, name: &'static str) -> Result<u8, Ctap2Error> {
        let [b] = self.fixed::<1>(index, name)?;
        Ok(b)
    }

    pub fn text(&self, index: usize, name: &'static str) -> Result<String, Ctap2Error> {
        self.required(index, name)?
            .to_utf8()
            .map_err(|_| Ctap2Error::InvalidParameter(name))
    }

    pub fn optional_text(&self, index: usize, name: &'static str) -> Result<Option<String>, Ctap2Error> {
        self.optional(index)
            .map(|f| f.to_utf8().map_err(|_| Ctap2Error::InvalidParameter(name)))
            .transpose()
    }

    /// A framed sequence. Absent means empty.
    pub fn sequence(&self, index: usize) -> Result<Vec<ByteBuffer>, Ctap2Error> {
        match self.optional(index) {
            Some(f) => Ok(deserialise_byte_buffers(f)?),
            None => Ok(Vec::new()),
        }
    }
}

/// `pinUvAuthParam` plus its protocol. Only protocol 1 is supported.
#[derive(Debug, Clone)]
pub struct PinAuth {
    pub param: [u8; 16],
}

fn pin_auth(fields: &Fields, param: usize, protocol: usize) -> Result<Option<PinAuth>, Ctap2Error> {
    if fields.optional(param).is_none() {
        return Ok(None);
    }
    let param = fields.fixed::<16>(param, "pinUvAuthParam")?;
    if fields.byte(protocol, "pinUvAuthProtocol")? != 1 {
        return Err(Ctap2Error::InvalidParameter("pinUvAuthProtocol"));
    }
    Ok(Some(PinAuth { param }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub up: bool,
    pub rk: bool,
    pub uv: bool,
}

impl Options {
    /// Absent options default to presence only.
    fn parse(fields: &Fields, index: usize) -> Result<Self, Ctap2Error> {
        let bits = match fields.optional(index) {
            Some(_) => fields.byte(index, "options")?,
            None => OPTION_UP,
        };
        if bits & !(OPTION_UP | OPTION_RK | OPTION_UV) != 0 {
            return Err(Ctap2Error::InvalidParameter("options"));
        }
        Ok(Self {
            up: bits & OPTION_UP != 0,
            rk: bits & OPTION_RK != 0,
            uv: bits & OPTION_UV != 0,
        })
    }
}

#[derive(Debug)]
pub struct MakeCredentialRequest {
    pub client_data_hash: [u8; 32],
    pub rp_id: String,
    pub rp_name: Option<String>,
    pub user_id: ByteBuffer,
    pub user_name: Option<String>,
    pub user_display: Option<String>,
    pub algorithms: Vec<i32>,
    pub exclude_list: Vec<ByteBuffer>,
    pub options: Options,
    pub pin_auth: Option<PinAuth>,
}

impl TryFrom<&Fields> for MakeCredentialRequest {
    type Error = Ctap2Error;

    fn try_from(fields: &Fields) -> Result<Self, Self::Error> {
        let client_data_hash = fields.fixed::<CLIENT_DATA_HASH_LEN>(0, "clientDataHash")?;
        let rp_id = fields.text(1, "rpId")?;
        let rp_name = fields.optional_text(2, "rpName")?;
        let user_id = fields.required(3, "userId")?.clone();
        if user_id.len() > MAX_USER_ID_LEN {
            return Err(Ctap2Error::InvalidParameter("userId"));
        }
        let user_name = fields.optional_text(4, "userName")?;
        let user_display = fields.optional_text(5, "userDisplayName")?;

        let algorithms = fields.sequence(6)?;
        if algorithms.is_empty() {
            return Err(Ctap2Error::MissingParameter("algorithms"));
        }
        let algorithms = algorithms
            .iter()
            .map(|a| {
                let mut reader = ByteReader::new(a.as_slice());
                let alg = reader.read_u32()? as i32;
                reader.finish()?;
                Ok(alg)
            })
            .collect::<Result<Vec<i32>, BufferError>>()?;

        Ok(Self {
            client_data_hash,
            rp_id,
            rp_name,
            user_id,
            user_name,
            user_display,
            algorithms,
            exclude_list: fields.sequence(7)?,
            options: Options::parse(fields, 8)?,
            pin_auth: pin_auth(fields, 9, 10)?,
        })
    }
}

#[derive(Debug)]
pub struct GetAssertionRequest {
    pub rp_id: String,
    pub client_data_hash: [u8; 32],
    pub allow_list: Vec<ByteBuffer>,
    pub options: Options,
    pub pin_auth: Option<PinAuth>,
}

impl TryFrom<&Fields> for GetAssertionRequest {
    type Error = Ctap2Error;

    fn try_from(fields: &Fields) -> Result<Self, Self::Error> {
        Ok(Self {
            rp_id: fields.text(0, "rpId")?,
            client_data_hash: fields.fixed::<CLIENT_DATA_HASH_LEN>(1, "clientDataHash")?,
            allow_list: fields.sequence(2)?,
            options: Options::parse(fields, 3)?,
            pin_auth: pin_auth(fields, 4, 5)?,
        })
    }
}

#[derive(Debug)]
pub struct ClientPinRequest {
    pub protocol: u8,
    pub sub_command: u8,
    pub key_agreement: Option<ByteBuffer>,
    pub pin_auth: Option<[u8; 16]>,
    pub new_pin_enc: Option<ByteBuffer>,
    pub pin_hash_enc: Option<ByteBuffer>,
}

impl TryFrom<&Fields> for ClientPinRequest {
    type Error = Ctap2Error;

    fn try_from(fields: &Fields) -> Result<Self, Self::Error> {
        let pin_auth = match fields.optional(3) {
            Some(_) => Some(fields.fixed::<16>(3, "pinUvAuthParam")?),
            None => None,
        };
        Ok(Self {
            protocol: fields.byte(0, "pinUvAuthProtocol")?,
            sub_command: fields.byte(1, "subCommand")?,
            key_agreement: fields.optional(2).cloned(),
            pin_auth,
            new_pin_enc: fields.optional(4).cloned(),
            pin_hash_enc: fields.optional(5).cloned(),
        })
    }
}

#[derive(Debug)]
pub struct CredentialManagementRequest {
    pub sub_command: u8,
    pub parameter: Option<ByteBuffer>,
    pub pin_auth: Option<[u8; 16]>,
}

impl TryFrom<&Fields> for CredentialManagementRequest {
    type Error = Ctap2Error;

    fn try_from(fields: &Fields) -> Result<Self, Self::Error> {
        let pin_auth = match fields.optional(2) {
            Some(_) => Some(fields.fixed::<16>(2, "pinUvAuthParam")?),
            None => None,
        };
        Ok(Self {
            sub_command: fields.byte(0, "subCommand")?,
            parameter: fields.optional(1).cloned(),
            pin_auth,
        })
    }
}
