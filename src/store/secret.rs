use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use rand::RngCore;
use zeroize::Zeroizing;

use super::StoreError;
use crate::buffer::{ByteBuffer, deserialise_byte_buffers, serialise_byte_buffers};
use crate::tpm::{TpmContext, seal};

/// Name of the secret that encrypts software credential records.
pub const MASTER_KEY_NAME: &str = "credential-master-key";

/// Key-ring boundary for long-lived secrets.
pub trait SecretStore: Send + Sync {
    fn load_secret(&self, name: &str) -> Result<Option<Zeroizing<ByteBuffer>>, StoreError>;

    fn store_secret(&self, name: &str, secret: &ByteBuffer) -> Result<(), StoreError>;
}

/// Load the 32-byte master key, creating and storing a random one on first
/// use. Any failure of the key-ring is reported as unavailable.
pub fn load_or_create_master_key(
    secrets: &dyn SecretStore,
) -> Result<Zeroizing<[u8; 32]>, StoreError> {
    let unavailable = |e: StoreError| StoreError::Unavailable(format!("key-ring: {e}"));

    if let Some(existing) = secrets.load_secret(MASTER_KEY_NAME).map_err(unavailable)? {
        let key: [u8; 32] = existing.as_slice().try_into().map_err(|_| {
            StoreError::Unavailable(format!(
                "key-ring: master key must be 32 bytes, got {}",
                existing.len()
            ))
        })?;
        return Ok(Zeroizing::new(key));
    }

    let mut key = Zeroizing::new([0u8; 32]);
    rand::thread_rng().fill_bytes(key.as_mut());
    secrets
        .store_secret(MASTER_KEY_NAME, &ByteBuffer::from(&*key))
        .map_err(unavailable)?;
    tracing::info!("Created new credential master key");
    Ok(key)
}

/// Process-local key-ring. Secrets are lost when it is dropped.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<String, Zeroizing<ByteBuffer>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn load_secret(&self, name: &str) -> Result<Option<Zeroizing<ByteBuffer>>, StoreError> {
        let secrets = self.secrets.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(secrets.get(name).cloned())
    }

    fn store_secret(&self, name: &str, secret: &ByteBuffer) -> Result<(), StoreError> {
        let mut secrets = self.secrets.lock().map_err(|_| StoreError::Poisoned)?;
        secrets.insert(name.to_string(), Zeroizing::new(secret.clone()));
        Ok(())
    }
}

/// Secrets sealed to the TPM owner hierarchy. The sealed blobs live in
/// `dir/{name}.sealed` and are useless without the TPM that produced them.
pub struct TpmSealedSecrets {
    tpm: Mutex<TpmContext>,
    dir: PathBuf,
}

impl TpmSealedSecrets {
    pub fn new(tpm: TpmContext, dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            tpm: Mutex::new(tpm),
            dir,
        })
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.sealed"))
    }
}

impl SecretStore for TpmSealedSecrets {
    fn load_secret(&self, name: &str) -> Result<Option<Zeroizing<ByteBuffer>>, StoreError> {
        let path = self.blob_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let blob = ByteBuffer::from(std::fs::read(&path)?);
        let parts = deserialise_byte_buffers(&blob)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?;
        let [private, public] = parts.as_slice() else {
            return Err(StoreError::Corrupt(format!(
                "{}: expected 2 sealed parts, got {}",
                path.display(),
                parts.len()
            )));
        };

        let mut tpm = self.tpm.lock().map_err(|_| StoreError::Poisoned)?;
        let secret = tpm.with_ctx(|ctx, primary| {
            seal::unseal(ctx, primary, private.as_slice(), public.as_slice())
        })?;
        tracing::debug!(name, "Unsealed secret");
        Ok(Some(Zeroizing::new(ByteBuffer::from(secret.as_slice()))))
    }

    fn store_secret(&self, name: &str, secret: &ByteBuffer) -> Result<(), StoreError> {
        let mut tpm = self.tpm.lock().map_err(|_| StoreError::Poisoned)?;
        let (private, public) =
            tpm.with_ctx(|ctx, primary| seal::seal(ctx, primary, secret.as_slice()))?;
        let blob = serialise_byte_buffers(&[ByteBuffer::from(private), ByteBuffer::from(public)])?;
        std::fs::write(self.blob_path(name), blob.as_slice())?;
        tracing::debug!(name, "Sealed secret");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl SecretStore for Broken {
        fn load_secret(&self, _: &str) -> Result<Option<Zeroizing<ByteBuffer>>, StoreError> {
            Err(StoreError::Corrupt("locked".into()))
        }

        fn store_secret(&self, _: &str, _: &ByteBuffer) -> Result<(), StoreError> {
            Err(StoreError::Corrupt("locked".into()))
        }
    }

    #[test]
    fn test_master_key_is_created_once() {
        let secrets = MemorySecretStore::new();
        let first = load_or_create_master_key(&secrets).unwrap();
        let second = load_or_create_master_key(&secrets).unwrap();
        assert_eq!(*first, *second);
        assert_ne!(*first, [0u8; 32]);
    }

    #[test]
    fn test_key_ring_failure_is_unavailable() {
        assert!(matches!(
            load_or_create_master_key(&Broken),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn test_wrong_sized_master_key_is_unavailable() {
        let secrets = MemorySecretStore::new();
        secrets.store_secret(MASTER_KEY_NAME, &ByteBuffer::with_len(16)).unwrap();
        assert!(matches!(
            load_or_create_master_key(&secrets),
            Err(StoreError::Unavailable(_))
        ));
    }
}
