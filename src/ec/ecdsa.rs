use super::{EcError, EcGroup};
use crate::buffer::ByteBuffer;

/// Verify an ECDSA signature given as raw big-endian `r` and `s`.
///
/// A well-formed signature that does not match yields `Ok(false)`. Malformed
/// input (unknown curve, bad digest length, off-curve or infinite public key,
/// `r`/`s` outside `[1, n-1]`) is an error.
pub fn verify_ecdsa(
    curve_name: &str,
    public_key: &ByteBuffer,
    digest: &ByteBuffer,
    r: &ByteBuffer,
    s: &ByteBuffer,
) -> Result<bool, EcError> {
    EcGroup::by_name(curve_name)?.verify(public_key, digest.as_slice(), r, s)
}

/// DER-encode a raw ECDSA signature as `SEQUENCE { INTEGER r, INTEGER s }`.
pub fn encode_der_signature(r: &[u8], s: &[u8]) -> Vec<u8> {
    let r_der = der_integer(r);
    let s_der = der_integer(s);
    let inner_len = r_der.len() + s_der.len();
    let mut out = vec![0x30u8];
    der_length(&mut out, inner_len);
    out.extend_from_slice(&r_der);
    out.extend_from_slice(&s_der);
    out
}

fn der_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else {
        out.push(0x81);
        out.push(len as u8);
    }
}

fn der_integer(n: &[u8]) -> Vec<u8> {
    let n: Vec<u8> = n.iter().skip_while(|&&b| b == 0).copied().collect();
    let n = if n.is_empty() { vec![0u8] } else { n };
    let pad = n[0] & 0x80 != 0;
    let mut out = vec![0x02u8];
    der_length(&mut out, n.len() + pad as usize);
    if pad {
        out.push(0);
    }
    out.extend_from_slice(&n);
    out
}
