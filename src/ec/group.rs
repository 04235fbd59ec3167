use lazy_static::lazy_static;
use sha2::{Digest, Sha256, Sha384};
use zeroize::Zeroizing;

use super::EcError;
use super::curve::{nist_p256, nist_p384};
use crate::buffer::ByteBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    P256,
    P384,
}

/// Immutable description of one supported curve group.
#[derive(Debug)]
pub struct EcGroup {
    curve: Curve,
    name: &'static str,
    field_size: usize,
    cose_alg: i64,
    cose_crv: i64,
}

lazy_static! {
    static ref P256_GROUP: EcGroup = EcGroup {
        curve: Curve::P256,
        name: "prime256v1",
        field_size: nist_p256::FIELD_SIZE,
        cose_alg: -7,
        cose_crv: 1,
    };
    static ref P384_GROUP: EcGroup = EcGroup {
        curve: Curve::P384,
        name: "secp384r1",
        field_size: nist_p384::FIELD_SIZE,
        cose_alg: -35,
        cose_crv: 2,
    };
}

macro_rules! dispatch {
    ($group:expr, $op:ident($($arg:expr),*)) => {
        match $group.curve {
            Curve::P256 => nist_p256::$op($($arg),*),
            Curve::P384 => nist_p384::$op($($arg),*),
        }
    };
}

/// Private scalar plus SEC1 public point.
pub struct KeyPair {
    pub private: Zeroizing<ByteBuffer>,
    pub public: ByteBuffer,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("private", &"<redacted>")
            .field("public", &self.public)
            .finish()
    }
}

impl EcGroup {
    /// Look up a group by OpenSSL, SEC or NIST name.
    pub fn by_name(name: &str) -> Result<&'static EcGroup, EcError> {
        match name.to_ascii_lowercase().as_str() {
            "prime256v1" | "secp256r1" | "p-256" | "p256" => Ok(&*P256_GROUP),
            "secp384r1" | "p-384" | "p384" => Ok(&*P384_GROUP),
            _ => Err(EcError::UnknownCurve(name.to_string())),
        }
    }

    pub fn p256() -> &'static EcGroup {
        &*P256_GROUP
    }

    pub fn p384() -> &'static EcGroup {
        &*P384_GROUP
    }

    /// Group for a COSE algorithm identifier, if supported.
    pub fn by_cose_algorithm(alg: i64) -> Option<&'static EcGroup> {
        [&*P256_GROUP, &*P384_GROUP]
            .into_iter()
            .find(|g| g.cose_alg == alg)
    }

    pub fn curve(&self) -> Curve {
        self.curve
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Byte length of a field element and of a scalar.
    pub fn field_size(&self) -> usize {
        self.field_size
    }

    pub fn cose_algorithm(&self) -> i64 {
        self.cose_alg
    }

    pub fn cose_curve(&self) -> i64 {
        self.cose_crv
    }

    pub fn point_is_on_curve(&self, p: &ByteBuffer) -> bool {
        dispatch!(self, validate(p)).is_ok()
    }

    /// `Ok(true)` only for the infinity encoding; undecodable input is an error.
    pub fn point_is_at_infinity(&self, p: &ByteBuffer) -> Result<bool, EcError> {
        dispatch!(self, is_identity(p))
    }

    pub fn point_add(&self, a: &ByteBuffer, b: &ByteBuffer) -> Result<ByteBuffer, EcError> {
        dispatch!(self, add(a, b))
    }

    pub fn generator_mul(&self, k: &ByteBuffer) -> Result<ByteBuffer, EcError> {
        dispatch!(self, generator_mul(k))
    }

    pub fn point_mul(&self, k: &ByteBuffer, p: &ByteBuffer) -> Result<ByteBuffer, EcError> {
        dispatch!(self, mul(k, p))
    }

    pub fn point_invert(&self, p: &ByteBuffer) -> Result<ByteBuffer, EcError> {
        dispatch!(self, invert(p))
    }

    /// Affine x-coordinate, left-padded to the field size.
    pub fn point_x(&self, p: &ByteBuffer) -> Result<ByteBuffer, EcError> {
        dispatch!(self, x_coordinate(p))
    }

    pub fn infinity(&self) -> ByteBuffer {
        ByteBuffer::from([0x00])
    }

    pub fn generate_key_pair(&self) -> KeyPair {
        let (private, public) = dispatch!(self, generate());
        KeyPair {
            private: Zeroizing::new(private),
            public,
        }
    }

    pub fn public_from_private(&self, private: &ByteBuffer) -> Result<ByteBuffer, EcError> {
        dispatch!(self, public_from_private(private))
    }

    /// Deterministic ECDSA over an already-hashed message. Returns `(r, s)`.
    pub fn sign_digest(
        &self,
        private: &ByteBuffer,
        digest: &[u8],
    ) -> Result<(ByteBuffer, ByteBuffer), EcError> {
        check_digest(digest)?;
        dispatch!(self, sign(private, digest))
    }

    pub fn verify(
        &self,
        public: &ByteBuffer,
        digest: &[u8],
        r: &ByteBuffer,
        s: &ByteBuffer,
    ) -> Result<bool, EcError> {
        check_digest(digest)?;
        dispatch!(self, verify(public, digest, r, s))
    }

    /// Hash `data` with the curve's paired hash function.
    pub fn digest(&self, data: &[u8]) -> ByteBuffer {
        match self.curve {
            Curve::P256 => ByteBuffer::from(Sha256::digest(data).as_slice()),
            Curve::P384 => ByteBuffer::from(Sha384::digest(data).as_slice()),
        }
    }
}

fn check_digest(digest: &[u8]) -> Result<(), EcError> {
    match digest.len() {
        32 | 48 | 64 => Ok(()),
        n => Err(EcError::InvalidDigest(n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name() {
        for name in ["prime256v1", "secp256r1", "P-256"] {
            assert_eq!(EcGroup::by_name(name).unwrap().curve(), Curve::P256);
        }
        assert_eq!(EcGroup::by_name("secp384r1").unwrap().curve(), Curve::P384);
        assert!(matches!(
            EcGroup::by_name("secp256k1"),
            Err(EcError::UnknownCurve(_))
        ));
        assert!(std::ptr::eq(EcGroup::p256(), EcGroup::by_name("P-256").unwrap()));
    }

    #[test]
    fn test_cose_identifiers() {
        assert_eq!(EcGroup::p256().cose_algorithm(), -7);
        assert_eq!(EcGroup::p384().cose_curve(), 2);
        assert_eq!(EcGroup::by_cose_algorithm(-35).unwrap().curve(), Curve::P384);
        assert!(EcGroup::by_cose_algorithm(-257).is_none());
    }

    #[test]
    fn test_generated_point_sizes() {
        let g = EcGroup::p384();
        let kp = g.generate_key_pair();
        assert_eq!(kp.private.len(), 48);
        assert_eq!(kp.public.len(), 97);
        assert_eq!(kp.public[0], 0x04);
        assert_eq!(g.public_from_private(&kp.private).unwrap(), kp.public);
        assert!(!format!("{kp:?}").contains(&kp.private.to_hex_string()));
    }

    #[test]
    fn test_digest_lengths() {
        assert_eq!(EcGroup::p256().digest(b"abc").len(), 32);
        assert_eq!(EcGroup::p384().digest(b"abc").len(), 48);
        let kp = EcGroup::p256().generate_key_pair();
        assert!(matches!(
            EcGroup::p256().sign_digest(&kp.private, &[0u8; 20]),
            Err(EcError::InvalidDigest(20))
        ));
    }
}
