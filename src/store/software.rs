use std::path::PathBuf;

use super::secret::load_or_create_master_key;
use super::{
    CredentialRecord, CredentialStore, KeyMaterial, NewCredential, RecordDir, RecordSet,
    SecretStore, StoreError, new_credential_id, now_unix,
};
use crate::buffer::ByteBuffer;
use crate::config::AuthenticatorConfig;
use crate::ec::EcGroup;
use crate::up::UserPresenceProof;

/// Private scalars held in process memory, signing through the EC layer.
pub struct SoftwareStore {
    group: &'static EcGroup,
    records: RecordSet,
}

impl SoftwareStore {
    /// Nothing is written to disk; credentials die with the process.
    pub fn in_memory(group: &'static EcGroup, max_credentials: usize) -> Self {
        Self {
            group,
            records: RecordSet::in_memory(max_credentials),
        }
    }

    /// Records under `dir`, encrypted with the master key from `secrets`.
    /// The key is created on first use.
    pub fn open(
        group: &'static EcGroup,
        dir: impl Into<PathBuf>,
        secrets: &dyn SecretStore,
        max_credentials: usize,
    ) -> Result<Self, StoreError> {
        let key = load_or_create_master_key(secrets)?;
        let records = RecordSet::load(RecordDir::encrypted(dir, key)?, max_credentials)?;
        Ok(Self { group, records })
    }

    /// Curve, limit and persistence taken from `config`.
    pub fn from_config(config: &AuthenticatorConfig, secrets: &dyn SecretStore) -> Result<Self, StoreError> {
        let group = EcGroup::by_name(&config.curve)?;
        match &config.store_dir {
            Some(dir) => Self::open(group, dir, secrets, config.max_credentials),
            None => Ok(Self::in_memory(group, config.max_credentials)),
        }
    }
}

impl CredentialStore for SoftwareStore {
    fn records(&self) -> &RecordSet {
        &self.records
    }

    fn group(&self) -> &'static EcGroup {
        self.group
    }

    fn generate_key(&self, params: NewCredential) -> Result<CredentialRecord, StoreError> {
        self.records.check_new(&params.rp_id_hash(), &params.user_id)?;

        let pair = self.group.generate_key_pair();
        let record = CredentialRecord::new(
            new_credential_id(),
            params,
            pair.public.clone(),
            KeyMaterial::new((*pair.private).clone()),
            now_unix(),
        );
        self.records.insert(record.clone())?;
        tracing::info!(
            cred_id = %record.credential_id,
            rp_id = %record.rp_id,
            curve = self.group.name(),
            "Software credential created"
        );
        Ok(record)
    }

    fn sign(
        &self,
        credential_id: &ByteBuffer,
        digest: &[u8],
        _proof: &UserPresenceProof,
    ) -> Result<(ByteBuffer, ByteBuffer), StoreError> {
        let record = self.records.require(credential_id)?;
        let signature = self.group.sign_digest(record.key_material.expose(), digest)?;
        tracing::debug!(cred_id = %credential_id, "Signed with software key");
        Ok(signature)
    }

    fn delete_key(&self, credential_id: &ByteBuffer) -> Result<(), StoreError> {
        if self.records.remove(credential_id)?.is_some() {
            tracing::info!(cred_id = %credential_id, "Software credential deleted");
        }
        Ok(())
    }
}
