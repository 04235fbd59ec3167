use tss_esapi::handles::{KeyHandle, ObjectHandle};
use tss_esapi::{Context, TctiNameConf};

use super::{TpmConnector, TpmError, TpmSession, keys};
use crate::buffer::{ByteBuffer, deserialise_byte_buffers, serialise_byte_buffers};

/// An ESAPI context plus the owner-hierarchy primary that parents every
/// signing and sealed object. The primary is flushed on drop.
pub struct TpmContext {
    ctx: Context,
    primary: KeyHandle,
}

impl TpmContext {
    pub fn new(device_path: &str) -> Result<Self, TpmError> {
        let tcti = format!("device:{device_path}")
            .parse::<TctiNameConf>()
            .map_err(|e| TpmError::Unavailable(e.to_string()))?;
        Self::with_tcti(tcti)
    }

    pub fn with_tcti(tcti: TctiNameConf) -> Result<Self, TpmError> {
        let mut ctx = Context::new(tcti).map_err(|e| TpmError::Unavailable(e.to_string()))?;
        let primary = keys::create_primary(&mut ctx)?;
        tracing::debug!("TPM primary key ready");
        Ok(Self { ctx, primary })
    }

    /// Run a synchronous operation against the context and primary.
    pub fn with_ctx<F, T>(&mut self, f: F) -> Result<T, TpmError>
    where
        F: FnOnce(&mut Context, KeyHandle) -> Result<T, TpmError>,
    {
        f(&mut self.ctx, self.primary)
    }

    /// Load a signing key, run `f` with it and always flush it afterwards.
    fn with_loaded_key<F, T>(&mut self, handle: &ByteBuffer, f: F) -> Result<T, TpmError>
    where
        F: FnOnce(&mut Context, KeyHandle) -> Result<T, TpmError>,
    {
        let (private, public) = split_handle(handle)?;
        let key = keys::load_key(&mut self.ctx, self.primary, private.as_slice(), public.as_slice())?;
        let result = f(&mut self.ctx, key);
        let flushed = keys::flush(&mut self.ctx, key);
        let value = result?;
        flushed?;
        Ok(value)
    }
}

impl Drop for TpmContext {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.flush_context(ObjectHandle::from(self.primary)) {
            tracing::warn!(error = %e, "Failed to flush TPM primary");
        }
    }
}

/// A handle is the framed (private, public) pair returned by TPM2_Create.
fn split_handle(handle: &ByteBuffer) -> Result<(ByteBuffer, ByteBuffer), TpmError> {
    let mut parts = deserialise_byte_buffers(handle)
        .map_err(|e| TpmError::Key(format!("malformed key handle: {e}")))?;
    if parts.len() != 2 {
        return Err(TpmError::Key(format!(
            "malformed key handle: {} parts",
            parts.len()
        )));
    }
    let public = parts.remove(1);
    let private = parts.remove(0);
    Ok((private, public))
}

impl TpmSession for TpmContext {
    fn generate_key(&mut self) -> Result<(ByteBuffer, ByteBuffer), TpmError> {
        let (private, public) = keys::create_signing_key(&mut self.ctx, self.primary)?;
        let point = keys::public_point(&public)?;
        let handle = serialise_byte_buffers(&[ByteBuffer::from(private), ByteBuffer::from(public)])
            .map_err(|e| TpmError::Key(e.to_string()))?;
        tracing::debug!(handle_len = handle.len(), "TPM signing key created");
        Ok((handle, point))
    }

    fn sign(
        &mut self,
        handle: &ByteBuffer,
        digest: &[u8],
    ) -> Result<(ByteBuffer, ByteBuffer), TpmError> {
        self.with_loaded_key(handle, |ctx, key| keys::sign_digest(ctx, key, digest))
    }

    /// Child keys are never made persistent, so dropping the blob is enough;
    /// the blob is still checked so a corrupt handle is reported.
    fn delete(&mut self, handle: &ByteBuffer) -> Result<(), TpmError> {
        split_handle(handle).map(|_| ())
    }
}

/// Opens [`TpmContext`] sessions on a character device such as `/dev/tpmrm0`.
#[derive(Debug, Clone)]
pub struct EsapiConnector {
    device: String,
}

impl EsapiConnector {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl TpmConnector for EsapiConnector {
    type Session = TpmContext;

    fn open(&self) -> Result<TpmContext, TpmError> {
        tracing::info!(device = %self.device, "Opening TPM session");
        TpmContext::new(&self.device)
    }
}
