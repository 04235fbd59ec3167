use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{CredentialRecord, RecordDir, StoreError};
use crate::buffer::ByteBuffer;

/// In-memory lookup tables over the loaded records.
#[derive(Default)]
pub struct CredentialIndex {
    by_id: HashMap<ByteBuffer, CredentialRecord>,
    by_rp: HashMap<ByteBuffer, Vec<ByteBuffer>>,
}

impl CredentialIndex {
    pub fn insert(&mut self, record: CredentialRecord) {
        let id = record.credential_id.clone();
        self.by_rp
            .entry(record.rp_id_hash.clone())
            .or_default()
            .push(id.clone());
        self.by_id.insert(id, record);
    }

    pub fn get(&self, id: &ByteBuffer) -> Option<&CredentialRecord> {
        self.by_id.get(id)
    }

    pub fn get_mut(&mut self, id: &ByteBuffer) -> Option<&mut CredentialRecord> {
        self.by_id.get_mut(id)
    }

    /// Credentials for an RP id hash, most recently created first. Ties keep
    /// the newest insertion first.
    pub fn by_rp_hash(&self, rp_id_hash: &ByteBuffer) -> Vec<&CredentialRecord> {
        let Some(ids) = self.by_rp.get(rp_id_hash) else {
            return Vec::new();
        };
        let mut records: Vec<&CredentialRecord> =
            ids.iter().rev().filter_map(|id| self.by_id.get(id)).collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub fn find_user(&self, rp_id_hash: &ByteBuffer, user_id: &ByteBuffer) -> Option<&CredentialRecord> {
        self.by_rp
            .get(rp_id_hash)?
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .find(|r| &r.user_id == user_id)
    }

    pub fn remove(&mut self, id: &ByteBuffer) -> Option<CredentialRecord> {
        let record = self.by_id.remove(id)?;
        if let Some(ids) = self.by_rp.get_mut(&record.rp_id_hash) {
            ids.retain(|i| i != id);
            if ids.is_empty() {
                self.by_rp.remove(&record.rp_id_hash);
            }
        }
        Some(record)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn drain(&mut self) -> Vec<CredentialRecord> {
        self.by_rp.clear();
        self.by_id.drain().map(|(_, r)| r).collect()
    }

    /// One `(rp_id, rp_id_hash)` per relying party, ordered by RP id.
    pub fn relying_parties(&self) -> Vec<(String, ByteBuffer)> {
        let mut rps: Vec<(String, ByteBuffer)> = self
            .by_rp
            .values()
            .filter_map(|ids| ids.first().and_then(|id| self.by_id.get(id)))
            .map(|r| (r.rp_id.clone(), r.rp_id_hash.clone()))
            .collect();
        rps.sort();
        rps
    }
}

struct Inner {
    index: CredentialIndex,
    dir: Option<RecordDir>,
}

/// Index plus optional persistence, behind one lock. Shared by both store
/// backends; every mutation is written to disk before it is indexed.
pub struct RecordSet {
    inner: Mutex<Inner>,
    max_credentials: usize,
}

impl RecordSet {
    pub fn in_memory(max_credentials: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                index: CredentialIndex::default(),
                dir: None,
            }),
            max_credentials,
        }
    }

    /// Load every readable record from `dir`.
    pub fn load(dir: RecordDir, max_credentials: usize) -> Result<Self, StoreError> {
        let mut index = CredentialIndex::default();
        for record in dir.load_all()? {
            index.insert(record);
        }
        tracing::info!(
            count = index.len(),
            path = %dir.path().display(),
            "Credential records loaded"
        );
        Ok(Self {
            inner: Mutex::new(Inner {
                index,
                dir: Some(dir),
            }),
            max_credentials,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn max_credentials(&self) -> usize {
        self.max_credentials
    }

    /// Fail if (RP, user) is taken or the store is full.
    pub fn check_new(&self, rp_id_hash: &ByteBuffer, user_id: &ByteBuffer) -> Result<(), StoreError> {
        let inner = self.lock()?;
        if inner.index.find_user(rp_id_hash, user_id).is_some() {
            return Err(StoreError::AlreadyRegistered);
        }
        if inner.index.len() >= self.max_credentials {
            return Err(StoreError::ResourceExhausted(self.max_credentials));
        }
        Ok(())
    }

    pub fn insert(&self, record: CredentialRecord) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.index.find_user(&record.rp_id_hash, &record.user_id).is_some() {
            return Err(StoreError::AlreadyRegistered);
        }
        if inner.index.len() >= self.max_credentials {
            return Err(StoreError::ResourceExhausted(self.max_credentials));
        }
        if let Some(dir) = &inner.dir {
            dir.write(&record)?;
        }
        inner.index.insert(record);
        Ok(())
    }

    pub fn get(&self, id: &ByteBuffer) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.lock()?.index.get(id).cloned())
    }

    pub fn require(&self, id: &ByteBuffer) -> Result<CredentialRecord, StoreError> {
        self.get(id)?.ok_or(StoreError::UnknownCredential)
    }

    pub fn by_rp_hash(&self, rp_id_hash: &ByteBuffer) -> Result<Vec<CredentialRecord>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.index.by_rp_hash(rp_id_hash).into_iter().cloned().collect())
    }

    pub fn find_user(
        &self,
        rp_id_hash: &ByteBuffer,
        user_id: &ByteBuffer,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.lock()?.index.find_user(rp_id_hash, user_id).cloned())
    }

    pub fn relying_parties(&self) -> Result<Vec<(String, ByteBuffer)>, StoreError> {
        Ok(self.lock()?.index.relying_parties())
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.index.len())
    }

    /// Increment and persist the signature counter, returning the new value.
    /// Saturates at `u32::MAX`.
    pub fn bump_counter(&self, id: &ByteBuffer) -> Result<u32, StoreError> {
        let mut inner = self.lock()?;
        let Inner { index, dir } = &mut *inner;
        let record = index.get_mut(id).ok_or(StoreError::UnknownCredential)?;
        let next = record.sign_count.saturating_add(1);
        let previous = std::mem::replace(&mut record.sign_count, next);
        if let Some(dir) = dir {
            if let Err(e) = dir.write(record) {
                record.sign_count = previous;
                return Err(e);
            }
        }
        Ok(next)
    }

    /// Remove from disk and index. Returns the record if it existed.
    pub fn remove(&self, id: &ByteBuffer) -> Result<Option<CredentialRecord>, StoreError> {
        let mut inner = self.lock()?;
        if inner.index.get(id).is_none() {
            return Ok(None);
        }
        if let Some(dir) = &inner.dir {
            dir.delete(id)?;
        }
        Ok(inner.index.remove(id))
    }

    /// Remove everything, returning the removed records.
    pub fn clear(&self) -> Result<Vec<CredentialRecord>, StoreError> {
        let mut inner = self.lock()?;
        let removed = inner.index.drain();
        if let Some(dir) = &inner.dir {
            for record in &removed {
                dir.delete(&record.credential_id)?;
            }
        }
        Ok(removed)
    }
}
