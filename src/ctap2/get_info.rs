use ciborium::value::Value;

use super::client_pin::PIN_PROTOCOL;
use super::types::Ctap2Error;
use crate::config::AuthenticatorConfig;
use crate::ec::EcGroup;

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn int(i: i64) -> Value {
    Value::Integer(i.into())
}

/// CBOR authenticatorGetInfo map.
///
/// Key 0x14 reports how many more credentials fit in the store.
pub(crate) fn build_info(
    config: &AuthenticatorConfig,
    group: &EcGroup,
    pin_set: bool,
    stored: usize,
) -> Result<Vec<u8>, Ctap2Error> {
    let remaining = config.max_credentials.saturating_sub(stored) as i64;
    let map = Value::Map(vec![
        (int(1), Value::Array(vec![text("FIDO_2_0")])),
        (int(2), Value::Array(vec![])),
        (int(3), Value::Bytes(config.aaguid.to_vec())),
        (
            int(4),
            Value::Map(vec![
                (text("rk"), Value::Bool(true)),
                (text("up"), Value::Bool(true)),
                (text("uv"), Value::Bool(true)),
                (text("plat"), Value::Bool(false)),
                (text("clientPin"), Value::Bool(pin_set)),
                (text("credMgmt"), Value::Bool(true)),
            ]),
        ),
        (int(5), int(config.max_msg_size as i64)),
        (int(6), Value::Array(vec![int(PIN_PROTOCOL as i64)])),
        (
            int(0x0A),
            Value::Array(vec![Value::Map(vec![
                (text("alg"), int(group.cose_algorithm())),
                (text("type"), text("public-key")),
            ])]),
        ),
        (int(0x14), int(remaining)),
    ]);
    let mut buf = Vec::new();
    ciborium::into_writer(&map, &mut buf).map_err(|e| Ctap2Error::Cbor(e.to_string()))?;
    Ok(buf)
}
