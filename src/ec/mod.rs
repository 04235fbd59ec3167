//! Elliptic-curve primitives for one NIST prime curve selected by name.
//!
//! Points cross this boundary in SEC1 form: `04 || X || Y` for finite points
//! and the single byte `00` for the point at infinity. Every decoded point is
//! checked for curve membership before use.

mod curve;
mod ecdsa;
mod group;

pub use ecdsa::{encode_der_signature, verify_ecdsa};
pub use group::{Curve, EcGroup, KeyPair};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EcError {
    #[error("point is not a valid encoding of a curve point")]
    InvalidPoint,
    #[error("scalar is out of range")]
    InvalidScalar,
    #[error("signature components are out of range")]
    InvalidSignature,
    #[error("unsupported digest length {0}")]
    InvalidDigest(usize),
    #[error("unknown curve {0:?}")]
    UnknownCurve(String),
}
