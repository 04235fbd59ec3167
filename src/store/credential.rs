use zeroize::Zeroizing;

use super::StoreError;
use crate::buffer::{ByteBuffer, ByteReader, deserialise_byte_buffers, serialise_byte_buffers};

pub const RECORD_VERSION: u8 = 1;
pub const CREDENTIAL_ID_LEN: usize = 32;

/// Private scalar (software) or TPM handle blob (TPM). Wiped on drop and
/// never printed.
#[derive(Clone)]
pub struct KeyMaterial(Zeroizing<ByteBuffer>);

impl KeyMaterial {
    pub fn new(bytes: ByteBuffer) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn expose(&self) -> &ByteBuffer {
        &self.0
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyMaterial(<{} bytes>)", self.0.len())
    }
}

#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub version: u8,
    pub credential_id: ByteBuffer,
    pub rp_id: String,
    pub rp_id_hash: ByteBuffer,
    pub rp_name: Option<String>,
    pub user_id: ByteBuffer,
    pub user_name: Option<String>,
    pub user_display: Option<String>,
    /// SEC1 uncompressed public point.
    pub public_key: ByteBuffer,
    pub key_material: KeyMaterial,
    pub sign_count: u32,
    /// Unix seconds.
    pub created_at: u64,
    pub discoverable: bool,
}

/// Caller-supplied part of a new credential.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub rp_id: String,
    pub rp_name: Option<String>,
    pub user_id: ByteBuffer,
    pub user_name: Option<String>,
    pub user_display: Option<String>,
    pub discoverable: bool,
}

impl NewCredential {
    pub fn rp_id_hash(&self) -> ByteBuffer {
        rp_id_hash(&self.rp_id)
    }
}

pub fn rp_id_hash(rp_id: &str) -> ByteBuffer {
    use sha2::{Digest, Sha256};
    ByteBuffer::from(Sha256::digest(rp_id.as_bytes()).as_slice())
}

fn opt_text(value: &Option<String>) -> ByteBuffer {
    value.as_deref().map(ByteBuffer::from_text).unwrap_or_default()
}

fn text(bb: &ByteBuffer, field: &str) -> Result<String, StoreError> {
    bb.to_utf8()
        .map_err(|_| StoreError::Corrupt(format!("{field} is not UTF-8")))
}

fn opt(bb: &ByteBuffer, field: &str) -> Result<Option<String>, StoreError> {
    if bb.is_empty() { Ok(None) } else { text(bb, field).map(Some) }
}

fn fixed<const N: usize>(bb: &ByteBuffer, field: &str) -> Result<[u8; N], StoreError> {
    bb.as_slice()
        .try_into()
        .map_err(|_| StoreError::Corrupt(format!("{field} must be {N} bytes, got {}", bb.len())))
}

impl CredentialRecord {
    pub fn new(
        credential_id: ByteBuffer,
        params: NewCredential,
        public_key: ByteBuffer,
        key_material: KeyMaterial,
        created_at: u64,
    ) -> Self {
        Self {
            version: RECORD_VERSION,
            credential_id,
            rp_id_hash: params.rp_id_hash(),
            rp_id: params.rp_id,
            rp_name: params.rp_name,
            user_id: params.user_id,
            user_name: params.user_name,
            user_display: params.user_display,
            public_key,
            key_material,
            sign_count: 0,
            created_at,
            discoverable: params.discoverable,
        }
    }

    /// Persisted form: a framed sequence of every field in declaration order.
    /// Absent text fields are written as empty buffers.
    pub fn to_bytes(&self) -> Result<Zeroizing<ByteBuffer>, StoreError> {
        let fields = Zeroizing::new(vec![
            ByteBuffer::from([self.version]),
            self.credential_id.clone(),
            ByteBuffer::from_text(&self.rp_id),
            self.rp_id_hash.clone(),
            opt_text(&self.rp_name),
            self.user_id.clone(),
            opt_text(&self.user_name),
            opt_text(&self.user_display),
            self.public_key.clone(),
            self.key_material.expose().clone(),
            ByteBuffer::from(self.sign_count.to_be_bytes()),
            ByteBuffer::from(self.created_at.to_be_bytes()),
            ByteBuffer::from([self.discoverable as u8]),
        ]);
        Ok(Zeroizing::new(serialise_byte_buffers(&fields)?))
    }

    pub fn from_bytes(bytes: &ByteBuffer) -> Result<Self, StoreError> {
        let fields = Zeroizing::new(deserialise_byte_buffers(bytes)?);
        let [
            version,
            credential_id,
            rp_id,
            rp_id_hash,
            rp_name,
            user_id,
            user_name,
            user_display,
            public_key,
            key_material,
            sign_count,
            created_at,
            discoverable,
        ] = fields.as_slice()
        else {
            return Err(StoreError::Corrupt(format!(
                "expected 13 record fields, got {}",
                fields.len()
            )));
        };

        let [version] = fixed::<1>(version, "version")?;
        if version != RECORD_VERSION {
            return Err(StoreError::Corrupt(format!("unsupported record version {version}")));
        }
        fixed::<CREDENTIAL_ID_LEN>(credential_id, "credential_id")?;
        fixed::<32>(rp_id_hash, "rp_id_hash")?;
        let [discoverable] = fixed::<1>(discoverable, "discoverable")?;

        let mut counter = ByteReader::new(sign_count.as_slice());
        let sign_count_value = counter.read_u32()?;
        counter.finish()?;

        Ok(Self {
            version,
            credential_id: credential_id.clone(),
            rp_id: text(rp_id, "rp_id")?,
            rp_id_hash: rp_id_hash.clone(),
            rp_name: opt(rp_name, "rp_name")?,
            user_id: user_id.clone(),
            user_name: opt(user_name, "user_name")?,
            user_display: opt(user_display, "user_display")?,
            public_key: public_key.clone(),
            key_material: KeyMaterial::new(key_material.clone()),
            sign_count: sign_count_value,
            created_at: u64::from_be_bytes(fixed::<8>(created_at, "created_at")?),
            discoverable: discoverable != 0,
        })
    }
}
