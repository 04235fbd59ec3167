//! Credential storage: key generation, signing and lookup for every
//! credential the authenticator has created.
//!
//! Two backends share one contract. [`SoftwareStore`] keeps private scalars
//! in memory and optionally persists encrypted records; [`TpmStore`] keeps
//! only TPM handle blobs and delegates key operations to the TPM.

pub mod credential;
pub mod disk;
pub mod index;
pub mod secret;
pub mod software;
pub mod tpm;

pub use credential::{CREDENTIAL_ID_LEN, CredentialRecord, KeyMaterial, NewCredential, rp_id_hash};
pub use disk::RecordDir;
pub use index::{CredentialIndex, RecordSet};
pub use secret::{MemorySecretStore, SecretStore, TpmSealedSecrets};
pub use software::SoftwareStore;
pub use tpm::TpmStore;

use crate::buffer::{BufferError, ByteBuffer};
use crate::ec::{EcError, EcGroup};
use crate::tpm::{EsapiConnector, TpmConnector, TpmError};
use crate::up::UserPresenceProof;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing: {0}")]
    Buffer(#[from] BufferError),
    #[error("crypto: {0}")]
    Crypto(#[from] EcError),
    #[error(transparent)]
    Tpm(#[from] TpmError),
    #[error("Encrypt: {0}")]
    Encryption(String),
    #[error("Corrupt: {0}")]
    Corrupt(String),
    #[error("unknown credential")]
    UnknownCredential,
    #[error("a credential for this RP and user already exists")]
    AlreadyRegistered,
    #[error("credential limit of {0} reached")]
    ResourceExhausted(usize),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("curve {0} is not supported by this store")]
    UnsupportedCurve(&'static str),
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn new_credential_id() -> ByteBuffer {
    use rand::RngCore;
    let mut id = ByteBuffer::with_len(CREDENTIAL_ID_LEN);
    rand::thread_rng().fill_bytes(id.as_mut_slice());
    id
}

/// Key lifecycle contract shared by both backends.
///
/// Implementors provide key generation, signing and key deletion; lookups
/// and counters come from the shared [`RecordSet`].
pub trait CredentialStore: Send + Sync {
    fn records(&self) -> &RecordSet;

    fn group(&self) -> &'static EcGroup;

    /// Create and persist a key for `(rp, user)`.
    ///
    /// Fails with `AlreadyRegistered` if the pair is taken and with
    /// `ResourceExhausted` once the configured maximum is reached.
    fn generate_key(&self, params: NewCredential) -> Result<CredentialRecord, StoreError>;

    /// ECDSA over `digest` with the credential's key. Returns `(r, s)`.
    fn sign(
        &self,
        credential_id: &ByteBuffer,
        digest: &[u8],
        proof: &UserPresenceProof,
    ) -> Result<(ByteBuffer, ByteBuffer), StoreError>;

    /// Delete a credential and its key. Unknown ids are not an error.
    fn delete_key(&self, credential_id: &ByteBuffer) -> Result<(), StoreError>;

    fn export_public_key(&self, credential_id: &ByteBuffer) -> Result<ByteBuffer, StoreError> {
        Ok(self.records().require(credential_id)?.public_key)
    }

    /// Increment and persist the signature counter, returning the new value.
    fn next_sign_count(&self, credential_id: &ByteBuffer) -> Result<u32, StoreError> {
        self.records().bump_counter(credential_id)
    }

    fn get(&self, credential_id: &ByteBuffer) -> Result<Option<CredentialRecord>, StoreError> {
        self.records().get(credential_id)
    }

    /// Most recently created first.
    fn find_by_rp_hash(&self, rp_id_hash: &ByteBuffer) -> Result<Vec<CredentialRecord>, StoreError> {
        self.records().by_rp_hash(rp_id_hash)
    }

    fn find_by_user(
        &self,
        rp_id_hash: &ByteBuffer,
        user_id: &ByteBuffer,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        self.records().find_user(rp_id_hash, user_id)
    }

    fn credential_count(&self) -> Result<usize, StoreError> {
        self.records().len()
    }

    fn max_credentials(&self) -> usize {
        self.records().max_credentials()
    }

    fn relying_parties(&self) -> Result<Vec<(String, ByteBuffer)>, StoreError> {
        self.records().relying_parties()
    }

    /// Delete every credential. Returns how many were removed.
    fn clear(&self) -> Result<usize, StoreError> {
        let removed = self.records().clear()?;
        tracing::info!(count = removed.len(), "Credential store cleared");
        Ok(removed.len())
    }
}

/// Store chosen at start-up.
pub enum Backend<C: TpmConnector = EsapiConnector> {
    Software(SoftwareStore),
    Tpm(TpmStore<C>),
}

impl<C: TpmConnector> Backend<C> {
    fn inner(&self) -> &dyn CredentialStore {
        match self {
            Backend::Software(s) => s,
            Backend::Tpm(t) => t,
        }
    }
}

impl<C: TpmConnector + 'static> CredentialStore for Backend<C> {
    fn records(&self) -> &RecordSet {
        self.inner().records()
    }

    fn group(&self) -> &'static EcGroup {
        self.inner().group()
    }

    fn generate_key(&self, params: NewCredential) -> Result<CredentialRecord, StoreError> {
        self.inner().generate_key(params)
    }

    fn sign(
        &self,
        credential_id: &ByteBuffer,
        digest: &[u8],
        proof: &UserPresenceProof,
    ) -> Result<(ByteBuffer, ByteBuffer), StoreError> {
        self.inner().sign(credential_id, digest, proof)
    }

    fn delete_key(&self, credential_id: &ByteBuffer) -> Result<(), StoreError> {
        self.inner().delete_key(credential_id)
    }

    fn clear(&self) -> Result<usize, StoreError> {
        self.inner().clear()
    }
}
