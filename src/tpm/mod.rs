pub mod context;
pub mod keys;
pub mod seal;

pub use context::{EsapiConnector, TpmContext};

use crate::buffer::ByteBuffer;
use tss_esapi::constants::response_code::Tss2ResponseCodeKind;

#[derive(Debug, thiserror::Error)]
pub enum TpmError {
    /// Transient: the device is busy, out of memory or unreachable.
    #[error("TPM unavailable: {0}")]
    Unavailable(String),
    /// Authorization or lockout failure; retrying will not help.
    #[error("TPM denied the operation: {0}")]
    Denied(String),
    #[error("TPM key error: {0}")]
    Key(String),
    #[error("TPM seal error: {0}")]
    Seal(String),
}

impl TpmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TpmError::Unavailable(_))
    }

    /// Map a tss-esapi error onto the transient/denied split, wrapping
    /// anything else with `fallback`.
    pub(crate) fn classify(e: tss_esapi::Error, fallback: fn(String) -> TpmError) -> TpmError {
        let kind = if let tss_esapi::Error::Tss2Error(rc) = &e {
            rc.kind()
        } else {
            None
        };
        match kind {
            Some(
                Tss2ResponseCodeKind::AuthFail
                | Tss2ResponseCodeKind::BadAuth
                | Tss2ResponseCodeKind::PolicyFail
                | Tss2ResponseCodeKind::Lockout,
            ) => TpmError::Denied(e.to_string()),
            Some(
                Tss2ResponseCodeKind::Retry
                | Tss2ResponseCodeKind::Yielded
                | Tss2ResponseCodeKind::Canceled
                | Tss2ResponseCodeKind::Testing
                | Tss2ResponseCodeKind::Memory
                | Tss2ResponseCodeKind::ObjectMemory
                | Tss2ResponseCodeKind::SessionMemory
                | Tss2ResponseCodeKind::ObjectHandles
                | Tss2ResponseCodeKind::SessionHandles,
            ) => TpmError::Unavailable(e.to_string()),
            _ => fallback(e.to_string()),
        }
    }
}

/// One open connection to a TPM holding a signing parent key.
///
/// Handles are opaque blobs only meaningful to the TPM that created them.
pub trait TpmSession: Send {
    /// Create a P-256 signing key. Returns the handle blob and the SEC1
    /// public point.
    fn generate_key(&mut self) -> Result<(ByteBuffer, ByteBuffer), TpmError>;

    /// ECDSA over a 32-byte digest. Returns `(r, s)`.
    fn sign(&mut self, handle: &ByteBuffer, digest: &[u8])
    -> Result<(ByteBuffer, ByteBuffer), TpmError>;

    fn delete(&mut self, handle: &ByteBuffer) -> Result<(), TpmError>;
}

/// Opens fresh sessions, e.g. after a transient failure.
pub trait TpmConnector: Send + Sync {
    type Session: TpmSession;

    fn open(&self) -> Result<Self::Session, TpmError>;
}
