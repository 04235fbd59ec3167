use std::path::{Path, PathBuf};

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::RngCore;
use zeroize::Zeroizing;

use super::{CredentialRecord, StoreError};
use crate::buffer::ByteBuffer;

const NONCE_LEN: usize = 12;
const EXTENSION: &str = "bin";

/// One file per credential, `{credential_id_hex}.bin`.
///
/// With a master key each file is `nonce(12) || AES-256-GCM(record)`;
/// without one the framed record is written as is.
pub struct RecordDir {
    dir: PathBuf,
    key: Option<Zeroizing<[u8; 32]>>,
}

impl RecordDir {
    pub fn encrypted(dir: impl Into<PathBuf>, key: Zeroizing<[u8; 32]>) -> Result<Self, StoreError> {
        Self::open(dir.into(), Some(key))
    }

    pub fn plaintext(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open(dir.into(), None)
    }

    fn open(dir: PathBuf, key: Option<Zeroizing<[u8; 32]>>) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, key })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, credential_id: &ByteBuffer) -> PathBuf {
        self.dir
            .join(format!("{}.{EXTENSION}", credential_id.to_hex_string()))
    }

    pub fn write(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        let plain = record.to_bytes()?;
        let contents = match &self.key {
            Some(key) => encrypt(key, plain.as_slice())?,
            None => plain.as_slice().to_vec(),
        };
        std::fs::write(self.file_for(&record.credential_id), contents)?;
        Ok(())
    }

    /// Missing files are not an error.
    pub fn delete(&self, credential_id: &ByteBuffer) -> Result<(), StoreError> {
        match std::fs::remove_file(self.file_for(credential_id)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn read(&self, path: &Path) -> Result<CredentialRecord, StoreError> {
        let bytes = std::fs::read(path)?;
        let plain = match &self.key {
            Some(key) => decrypt(key, &bytes)?,
            None => Zeroizing::new(bytes),
        };
        CredentialRecord::from_bytes(&ByteBuffer::from(plain.as_slice()))
    }

    /// Every readable record. Corrupt or undecryptable files are logged and
    /// skipped; files without the record extension are ignored.
    pub fn load_all(&self) -> Result<Vec<CredentialRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            match self.read(&path) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping corrupt credential file");
                }
            }
        }
        Ok(records)
    }
}

fn encrypt(key: &[u8; 32], plain: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| StoreError::Encryption(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plain)
        .map_err(|e| StoreError::Encryption(e.to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn decrypt(key: &[u8; 32], bytes: &[u8]) -> Result<Zeroizing<Vec<u8>>, StoreError> {
    if bytes.len() < NONCE_LEN {
        return Err(StoreError::Corrupt("file too short".into()));
    }
    let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| StoreError::Encryption(e.to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|e| StoreError::Encryption(e.to_string()))
}
