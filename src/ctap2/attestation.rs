use ciborium::value::Value;

use super::types::Ctap2Error;

/// Build a "packed" self-attestation object: the credential key signs its
/// own creation and no certificate chain is included.
pub(crate) fn build_attestation_object(
    alg: i64,
    auth_data: &[u8],
    der_sig: &[u8],
) -> Result<Vec<u8>, Ctap2Error> {
    let map = Value::Map(vec![
        (Value::Integer(1i64.into()), Value::Text("packed".to_string())),
        (Value::Integer(2i64.into()), Value::Bytes(auth_data.to_vec())),
        (
            Value::Integer(3i64.into()),
            Value::Map(vec![
                (Value::Text("alg".to_string()), Value::Integer(alg.into())),
                (Value::Text("sig".to_string()), Value::Bytes(der_sig.to_vec())),
            ]),
        ),
    ]);
    let mut buf = Vec::new();
    ciborium::into_writer(&map, &mut buf).map_err(|e| Ctap2Error::Cbor(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attestation_object_shape() {
        let encoded = build_attestation_object(-35, &[1, 2, 3], &[0x30, 0x00]).unwrap();
        let Value::Map(map) = ciborium::from_reader(encoded.as_slice()).unwrap() else {
            panic!("not a map")
        };
        assert_eq!(map.len(), 3);
        assert_eq!(map[0].1, Value::Text("packed".into()));
        assert_eq!(map[1].1, Value::Bytes(vec![1, 2, 3]));
        let Value::Map(stmt) = &map[2].1 else {
            panic!("attStmt is not a map")
        };
        assert_eq!(stmt[0].1, Value::Integer((-35i64).into()));
        assert_eq!(stmt[1].1, Value::Bytes(vec![0x30, 0x00]));
    }
}
