use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use super::{
    CredentialRecord, CredentialStore, KeyMaterial, NewCredential, RecordDir, RecordSet,
    StoreError, new_credential_id, now_unix,
};
use crate::buffer::ByteBuffer;
use crate::config::AuthenticatorConfig;
use crate::ec::{Curve, EcGroup};
use crate::tpm::{EsapiConnector, TpmConnector, TpmError, TpmSession};
use crate::up::UserPresenceProof;

/// Keys live inside the TPM; records hold only the handle blob and the
/// public point.
///
/// A transient TPM failure drops the session and retries the operation once
/// on a freshly opened one. Denials are returned immediately.
pub struct TpmStore<C: TpmConnector> {
    connector: C,
    session: Mutex<Option<C::Session>>,
    records: RecordSet,
}

impl TpmStore<EsapiConnector> {
    /// Store on the configured TPM device. The configured curve must be one
    /// the TPM backend supports.
    pub fn from_config(config: &AuthenticatorConfig) -> Result<Self, StoreError> {
        Self::check_group(EcGroup::by_name(&config.curve)?)?;
        let connector = EsapiConnector::new(config.tpm_device.as_str());
        match &config.store_dir {
            Some(dir) => Self::open(connector, dir, config.max_credentials),
            None => Ok(Self::in_memory(connector, config.max_credentials)),
        }
    }
}

impl<C: TpmConnector> TpmStore<C> {
    pub fn in_memory(connector: C, max_credentials: usize) -> Self {
        Self {
            connector,
            session: Mutex::new(None),
            records: RecordSet::in_memory(max_credentials),
        }
    }

    /// Records under `dir`, in plaintext framing.
    pub fn open(
        connector: C,
        dir: impl Into<PathBuf>,
        max_credentials: usize,
    ) -> Result<Self, StoreError> {
        let records = RecordSet::load(RecordDir::plaintext(dir)?, max_credentials)?;
        Ok(Self {
            connector,
            session: Mutex::new(None),
            records,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<C::Session>>, StoreError> {
        self.session.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Run `op` on the cached session, opening one if needed.
    fn with_session<T>(
        &self,
        what: &'static str,
        mut op: impl FnMut(&mut C::Session) -> Result<T, TpmError>,
    ) -> Result<T, StoreError> {
        let mut slot = self.lock()?;
        let mut retried = false;
        loop {
            let result = match slot.as_mut() {
                Some(session) => op(session),
                None => match self.connector.open() {
                    Ok(session) => op(slot.insert(session)),
                    Err(e) => Err(e),
                },
            };
            match result {
                Err(e) if e.is_transient() && !retried => {
                    tracing::warn!(op = what, error = %e, "TPM unavailable, retrying with a fresh session");
                    *slot = None;
                    retried = true;
                }
                Err(e) => {
                    if e.is_transient() {
                        *slot = None;
                    }
                    return Err(e.into());
                }
                Ok(value) => return Ok(value),
            }
        }
    }
}

impl<C: TpmConnector> CredentialStore for TpmStore<C> {
    fn records(&self) -> &RecordSet {
        &self.records
    }

    fn group(&self) -> &'static EcGroup {
        EcGroup::p256()
    }

    fn generate_key(&self, params: NewCredential) -> Result<CredentialRecord, StoreError> {
        self.records.check_new(&params.rp_id_hash(), &params.user_id)?;

        let (handle, public) = self.with_session("generate_key", |s| s.generate_key())?;
        let record = CredentialRecord::new(
            new_credential_id(),
            params,
            public,
            KeyMaterial::new(handle),
            now_unix(),
        );

        if let Err(e) = self.records.insert(record.clone()) {
            let handle = record.key_material.expose();
            if let Err(cleanup) = self.with_session("delete", |s| s.delete(handle)) {
                tracing::warn!(error = %cleanup, "Failed to delete orphaned TPM key");
            }
            return Err(e);
        }
        tracing::info!(cred_id = %record.credential_id, rp_id = %record.rp_id, "TPM credential created");
        Ok(record)
    }

    fn sign(
        &self,
        credential_id: &ByteBuffer,
        digest: &[u8],
        _proof: &UserPresenceProof,
    ) -> Result<(ByteBuffer, ByteBuffer), StoreError> {
        let record = self.records.require(credential_id)?;
        let handle = record.key_material.expose();
        let signature = self.with_session("sign", |s| s.sign(handle, digest))?;
        tracing::debug!(cred_id = %credential_id, "Signed with TPM key");
        Ok(signature)
    }

    /// The TPM key goes first; the record is only dropped once it is gone.
    fn delete_key(&self, credential_id: &ByteBuffer) -> Result<(), StoreError> {
        let Some(record) = self.records.get(credential_id)? else {
            return Ok(());
        };
        let handle = record.key_material.expose();
        self.with_session("delete", |s| s.delete(handle))?;
        self.records.remove(credential_id)?;
        tracing::info!(cred_id = %credential_id, "TPM credential deleted");
        Ok(())
    }

    /// Records are removed even when a TPM key cannot be deleted; the
    /// orphaned key is unusable without its record.
    fn clear(&self) -> Result<usize, StoreError> {
        let removed = self.records.clear()?;
        for record in &removed {
            let handle = record.key_material.expose();
            if let Err(e) = self.with_session("delete", |s| s.delete(handle)) {
                tracing::warn!(cred_id = %record.credential_id, error = %e, "Failed to delete TPM key");
            }
        }
        tracing::info!(count = removed.len(), "TPM credential store cleared");
        Ok(removed.len())
    }
}

impl<C: TpmConnector> TpmStore<C> {
    /// The TPM signs P-256 digests only.
    pub fn check_group(group: &EcGroup) -> Result<(), StoreError> {
        match group.curve() {
            Curve::P256 => Ok(()),
            Curve::P384 => Err(StoreError::UnsupportedCurve(group.name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Scripted failures, consumed one per TPM call.
    #[derive(Clone, Default)]
    struct Script {
        failures: Arc<Mutex<VecDeque<TpmError>>>,
        opened: Arc<AtomicUsize>,
    }

    impl Script {
        fn fail_with(&self, e: TpmError) {
            self.failures.lock().unwrap().push_back(e);
        }

        fn next(&self) -> Result<(), TpmError> {
            match self.failures.lock().unwrap().pop_front() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    struct MockSession {
        script: Script,
    }

    impl TpmSession for MockSession {
        fn generate_key(&mut self) -> Result<(ByteBuffer, ByteBuffer), TpmError> {
            self.script.next()?;
            let pair = EcGroup::p256().generate_key_pair();
            Ok(((*pair.private).clone(), pair.public))
        }

        fn sign(
            &mut self,
            handle: &ByteBuffer,
            digest: &[u8],
        ) -> Result<(ByteBuffer, ByteBuffer), TpmError> {
            self.script.next()?;
            EcGroup::p256()
                .sign_digest(handle, digest)
                .map_err(|e| TpmError::Key(e.to_string()))
        }

        fn delete(&mut self, _handle: &ByteBuffer) -> Result<(), TpmError> {
            self.script.next()
        }
    }

    struct MockConnector(Script);

    impl TpmConnector for MockConnector {
        type Session = MockSession;

        fn open(&self) -> Result<MockSession, TpmError> {
            self.0.opened.fetch_add(1, Ordering::SeqCst);
            Ok(MockSession {
                script: self.0.clone(),
            })
        }
    }

    fn params() -> NewCredential {
        NewCredential {
            rp_id: "example.com".into(),
            rp_name: None,
            user_id: ByteBuffer::from_text("alice"),
            user_name: None,
            user_display: None,
            discoverable: false,
        }
    }

    #[test]
    fn test_transient_failure_retried_once() {
        let script = Script::default();
        let store = TpmStore::in_memory(MockConnector(script.clone()), 4);
        script.fail_with(TpmError::Unavailable("busy".into()));

        let record = store.generate_key(params()).unwrap();
        assert_eq!(script.opened.load(Ordering::SeqCst), 2);

        let digest = EcGroup::p256().digest(b"data");
        let (r, s) = store
            .sign(&record.credential_id, digest.as_slice(), &UserPresenceProof::test_only())
            .unwrap();
        assert!(EcGroup::p256().verify(&record.public_key, digest.as_slice(), &r, &s).unwrap());
        // The healthy session is reused.
        assert_eq!(script.opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_second_transient_failure_surfaces() {
        let script = Script::default();
        let store = TpmStore::in_memory(MockConnector(script.clone()), 4);
        script.fail_with(TpmError::Unavailable("busy".into()));
        script.fail_with(TpmError::Unavailable("still busy".into()));

        assert!(matches!(
            store.generate_key(params()),
            Err(StoreError::Tpm(TpmError::Unavailable(_)))
        ));
        assert_eq!(store.credential_count().unwrap(), 0);
    }

    #[test]
    fn test_denied_is_not_retried() {
        let script = Script::default();
        let store = TpmStore::in_memory(MockConnector(script.clone()), 4);
        let record = store.generate_key(params()).unwrap();

        script.fail_with(TpmError::Denied("lockout".into()));
        assert!(matches!(
            store.sign(&record.credential_id, &[0u8; 32], &UserPresenceProof::test_only()),
            Err(StoreError::Tpm(TpmError::Denied(_)))
        ));
        assert_eq!(script.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = TpmStore::in_memory(MockConnector(Script::default()), 4);
        let record = store.generate_key(params()).unwrap();
        store.delete_key(&record.credential_id).unwrap();
        store.delete_key(&record.credential_id).unwrap();
        assert!(store.get(&record.credential_id).unwrap().is_none());
    }

    #[test]
    fn test_failed_tpm_delete_keeps_record() {
        let script = Script::default();
        let store = TpmStore::in_memory(MockConnector(script.clone()), 4);
        let record = store.generate_key(params()).unwrap();

        script.fail_with(TpmError::Denied("lockout".into()));
        assert!(matches!(
            store.delete_key(&record.credential_id),
            Err(StoreError::Tpm(TpmError::Denied(_)))
        ));
        assert!(store.get(&record.credential_id).unwrap().is_some());

        store.delete_key(&record.credential_id).unwrap();
        assert!(store.get(&record.credential_id).unwrap().is_none());
    }

    #[test]
    fn test_clear_removes_all_records() {
        let script = Script::default();
        let store = TpmStore::in_memory(MockConnector(script.clone()), 4);
        store.generate_key(params()).unwrap();
        let mut other = params();
        other.user_id = ByteBuffer::from_text("bob");
        store.generate_key(other).unwrap();

        script.fail_with(TpmError::Denied("lockout".into()));
        assert_eq!(store.clear().unwrap(), 2);
        assert_eq!(store.credential_count().unwrap(), 0);
        assert_eq!(store.clear().unwrap(), 0);
    }

    #[test]
    fn test_only_p256_is_supported() {
        assert!(TpmStore::<MockConnector>::check_group(EcGroup::p256()).is_ok());
        assert!(matches!(
            TpmStore::<MockConnector>::check_group(EcGroup::p384()),
            Err(StoreError::UnsupportedCurve(_))
        ));
    }
}
