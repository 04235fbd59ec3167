//! Per-curve arithmetic over the RustCrypto prime-order curve types.
//!
//! Each backend takes and returns SEC1-encoded points and big-endian
//! scalars, so callers never see curve-specific types.

macro_rules! curve_backend {
    ($name:ident, $krate:ident, $uint:ident, $field_size:expr) => {
        pub(super) mod $name {
            use $krate::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
            use $krate::ecdsa::{Signature, SigningKey, VerifyingKey};
            use $krate::elliptic_curve::bigint::$uint;
            use $krate::elliptic_curve::group::{Curve as _, Group as _};
            use $krate::elliptic_curve::ops::Reduce;
            use $krate::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
            use $krate::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar, SecretKey};
            use rand::rngs::OsRng;

            use crate::buffer::ByteBuffer;
            use crate::ec::EcError;

            pub(crate) const FIELD_SIZE: usize = $field_size;

            fn decode(bytes: &ByteBuffer) -> Result<ProjectivePoint, EcError> {
                let encoded =
                    EncodedPoint::from_bytes(bytes.as_slice()).map_err(|_| EcError::InvalidPoint)?;
                Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
                    .map(ProjectivePoint::from)
                    .ok_or(EcError::InvalidPoint)
            }

            fn encode(point: &ProjectivePoint) -> ByteBuffer {
                ByteBuffer::from(point.to_affine().to_encoded_point(false).as_bytes())
            }

            fn field_bytes(value: &ByteBuffer, err: EcError) -> Result<FieldBytes, EcError> {
                if value.len() > FIELD_SIZE {
                    return Err(err);
                }
                let mut repr = FieldBytes::default();
                repr[FIELD_SIZE - value.len()..].copy_from_slice(value.as_slice());
                Ok(repr)
            }

            fn scalar(k: &ByteBuffer) -> Result<Scalar, EcError> {
                let repr = field_bytes(k, EcError::InvalidScalar)?;
                Ok(<Scalar as Reduce<$uint>>::reduce_bytes(&repr))
            }

            fn secret(private: &ByteBuffer) -> Result<SecretKey, EcError> {
                let repr = field_bytes(private, EcError::InvalidScalar)?;
                SecretKey::from_bytes(&repr).map_err(|_| EcError::InvalidScalar)
            }

            pub(crate) fn validate(p: &ByteBuffer) -> Result<(), EcError> {
                decode(p).map(|_| ())
            }

            pub(crate) fn is_identity(p: &ByteBuffer) -> Result<bool, EcError> {
                Ok(bool::from(decode(p)?.is_identity()))
            }

            pub(crate) fn add(a: &ByteBuffer, b: &ByteBuffer) -> Result<ByteBuffer, EcError> {
                Ok(encode(&(decode(a)? + decode(b)?)))
            }

            pub(crate) fn generator_mul(k: &ByteBuffer) -> Result<ByteBuffer, EcError> {
                Ok(encode(&(ProjectivePoint::GENERATOR * scalar(k)?)))
            }

            pub(crate) fn mul(k: &ByteBuffer, p: &ByteBuffer) -> Result<ByteBuffer, EcError> {
                let point = decode(p)?;
                Ok(encode(&(point * scalar(k)?)))
            }

            pub(crate) fn invert(p: &ByteBuffer) -> Result<ByteBuffer, EcError> {
                Ok(encode(&(-decode(p)?)))
            }

            pub(crate) fn x_coordinate(p: &ByteBuffer) -> Result<ByteBuffer, EcError> {
                let encoded = decode(p)?.to_affine().to_encoded_point(false);
                encoded
                    .x()
                    .map(|x| ByteBuffer::from(x.as_slice()))
                    .ok_or(EcError::InvalidPoint)
            }

            pub(crate) fn generate() -> (ByteBuffer, ByteBuffer) {
                let secret = SecretKey::random(&mut OsRng);
                let public = secret.public_key().to_encoded_point(false);
                (
                    ByteBuffer::from(secret.to_bytes().as_slice()),
                    ByteBuffer::from(public.as_bytes()),
                )
            }

            pub(crate) fn public_from_private(private: &ByteBuffer) -> Result<ByteBuffer, EcError> {
                let public = secret(private)?.public_key().to_encoded_point(false);
                Ok(ByteBuffer::from(public.as_bytes()))
            }

            pub(crate) fn sign(
                private: &ByteBuffer,
                digest: &[u8],
            ) -> Result<(ByteBuffer, ByteBuffer), EcError> {
                let repr = field_bytes(private, EcError::InvalidScalar)?;
                let key = SigningKey::from_bytes(&repr).map_err(|_| EcError::InvalidScalar)?;
                let sig: Signature = key
                    .sign_prehash(digest)
                    .map_err(|_| EcError::InvalidDigest(digest.len()))?;
                let (r, s) = sig.split_bytes();
                Ok((ByteBuffer::from(r.as_slice()), ByteBuffer::from(s.as_slice())))
            }

            pub(crate) fn verify(
                public: &ByteBuffer,
                digest: &[u8],
                r: &ByteBuffer,
                s: &ByteBuffer,
            ) -> Result<bool, EcError> {
                let point = decode(public)?;
                if bool::from(point.is_identity()) {
                    return Err(EcError::InvalidPoint);
                }
                let key = VerifyingKey::from_affine(point.to_affine())
                    .map_err(|_| EcError::InvalidPoint)?;
                let sig = Signature::from_scalars(
                    field_bytes(r, EcError::InvalidSignature)?,
                    field_bytes(s, EcError::InvalidSignature)?,
                )
                .map_err(|_| EcError::InvalidSignature)?;
                Ok(key.verify_prehash(digest, &sig).is_ok())
            }
        }
    };
}

curve_backend!(nist_p256, p256, U256, 32);
curve_backend!(nist_p384, p384, U384, 48);
