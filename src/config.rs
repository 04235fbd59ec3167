use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const AAGUID: [u8; 16] = [
    0xf1, 0xd0, 0x6b, 0x4e, 0x3a, 0x17, 0x4c, 0x80, 0xb1, 0xd2, 0x9e, 0x3f, 0x00, 0x00, 0x00, 0x02,
];
pub const DEFAULT_MAX_CREDENTIALS: usize = 256;
pub const DEFAULT_PIN_RETRIES: u8 = 8;
pub const DEFAULT_MAX_MSG_SIZE: u16 = 1200;
pub const GESTURE_TIMEOUT_SECS: u64 = 30;

/// Settings fixed for the lifetime of one authenticator.
///
/// Callers build this themselves; there is no file format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthenticatorConfig {
    pub aaguid: [u8; 16],
    /// Curve name understood by [`crate::ec::EcGroup::by_name`].
    pub curve: String,
    pub max_credentials: usize,
    pub gesture_timeout: Duration,
    pub pinentry: String,
    pub tpm_device: String,
    /// Directory for persisted records; `None` keeps credentials in memory.
    pub store_dir: Option<PathBuf>,
    pub pin_retries: u8,
    pub max_msg_size: u16,
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self {
            aaguid: AAGUID,
            curve: "prime256v1".to_string(),
            max_credentials: DEFAULT_MAX_CREDENTIALS,
            gesture_timeout: Duration::from_secs(GESTURE_TIMEOUT_SECS),
            pinentry: "pinentry".to_string(),
            tpm_device: "/dev/tpmrm0".to_string(),
            store_dir: None,
            pin_retries: DEFAULT_PIN_RETRIES,
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AuthenticatorConfig::default();
        assert_eq!(cfg.aaguid, AAGUID);
        assert_eq!(cfg.pin_retries, 8);
        assert!(crate::ec::EcGroup::by_name(&cfg.curve).is_ok());
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        use ciborium::value::Value;
        let partial = Value::Map(vec![
            (Value::Text("curve".into()), Value::Text("secp384r1".into())),
            (Value::Text("max_credentials".into()), Value::Integer(4i64.into())),
        ]);
        let mut buf = Vec::new();
        ciborium::into_writer(&partial, &mut buf).unwrap();

        let cfg: AuthenticatorConfig = ciborium::from_reader(buf.as_slice()).unwrap();
        assert_eq!(cfg.curve, "secp384r1");
        assert_eq!(cfg.max_credentials, 4);
        assert_eq!(cfg.pin_retries, DEFAULT_PIN_RETRIES);
        assert_eq!(cfg.store_dir, None);
    }
}
