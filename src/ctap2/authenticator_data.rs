use ciborium::value::Value;

use super::types::Ctap2Error;
use crate::buffer::ByteBuffer;
use crate::ec::EcGroup;

pub const FLAG_UP: u8 = 0x01;
pub const FLAG_UV: u8 = 0x04;
pub const FLAG_AT: u8 = 0x40;

/// authenticatorData for MakeCredential: header plus attested credential
/// data (AAGUID, credential id and COSE public key). AT is always set.
pub(crate) fn build_make_cred_auth_data(
    rp_id_hash: &ByteBuffer,
    flags: u8,
    sign_count: u32,
    aaguid: &[u8; 16],
    credential_id: &ByteBuffer,
    cose_key: &[u8],
) -> Result<ByteBuffer, Ctap2Error> {
    let cred_id_len = u16::try_from(credential_id.len())
        .map_err(|_| Ctap2Error::Internal("credential id too long".into()))?;
    let mut data = build_assertion_auth_data(rp_id_hash, flags | FLAG_AT, sign_count);
    data.extend_from_slice(aaguid);
    data.extend_from_slice(&cred_id_len.to_be_bytes());
    data += credential_id;
    data.extend_from_slice(cose_key);
    Ok(data)
}

/// authenticatorData for GetAssertion: `rpIdHash || flags || signCount`.
pub(crate) fn build_assertion_auth_data(rp_id_hash: &ByteBuffer, flags: u8, sign_count: u32) -> ByteBuffer {
    let mut data = rp_id_hash.clone();
    data.push(flags);
    data.extend_from_slice(&sign_count.to_be_bytes());
    data
}

/// Encode a SEC1 uncompressed public point as a COSE_Key map
/// (kty=2, alg, crv, x, y) for the group's curve.
pub(crate) fn encode_cose_key(group: &EcGroup, public_point: &ByteBuffer) -> Result<Vec<u8>, Ctap2Error> {
    let n = group.field_size();
    let bytes = public_point.as_slice();
    if bytes.len() != 1 + 2 * n || bytes[0] != 0x04 {
        return Err(Ctap2Error::Internal("public key is not an uncompressed point".into()));
    }
    let map = Value::Map(vec![
        (Value::Integer(1i64.into()), Value::Integer(2i64.into())),
        (Value::Integer(3i64.into()), Value::Integer(group.cose_algorithm().into())),
        (Value::Integer((-1i64).into()), Value::Integer(group.cose_curve().into())),
        (Value::Integer((-2i64).into()), Value::Bytes(bytes[1..1 + n].to_vec())),
        (Value::Integer((-3i64).into()), Value::Bytes(bytes[1 + n..].to_vec())),
    ]);
    let mut buf = Vec::new();
    ciborium::into_writer(&map, &mut buf).map_err(|e| Ctap2Error::Cbor(e.to_string()))?;
    Ok(buf)
}
