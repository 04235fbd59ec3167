//! ClientPIN, PIN/UV auth protocol 1.
//!
//! The platform and authenticator agree on a shared secret through ECDH on
//! P-256 (`SHA-256(x(k·P))`). PINs travel AES-256-CBC encrypted under that
//! secret with a zero IV, and requests are authenticated with the first 16
//! bytes of HMAC-SHA-256.

use aes::Aes256;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::types::{ClientPinRequest, Ctap2Error};
use crate::buffer::ByteBuffer;
use crate::ec::{EcGroup, KeyPair};

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub const SUB_GET_RETRIES: u8 = 0x01;
pub const SUB_GET_KEY_AGREEMENT: u8 = 0x02;
pub const SUB_SET_PIN: u8 = 0x03;
pub const SUB_CHANGE_PIN: u8 = 0x04;
pub const SUB_GET_PIN_TOKEN: u8 = 0x05;

pub const PIN_PROTOCOL: u8 = 1;
pub const MIN_PIN_LEN: usize = 4;
pub const MAX_PIN_LEN: usize = 63;
const PIN_BLOCK_LEN: usize = 64;
const PIN_HASH_LEN: usize = 16;

pub(crate) fn authenticate(key: &[u8], data: &[u8]) -> Result<[u8; 16], Ctap2Error> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| Ctap2Error::Internal(e.to_string()))?;
    mac.update(data);
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes()[..16]);
    Ok(out)
}

pub(crate) fn verify_auth(key: &[u8], data: &[u8], expected: &[u8; 16]) -> Result<bool, Ctap2Error> {
    Ok(authenticate(key, data)?.ct_eq(expected).into())
}

pub(crate) fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, Ctap2Error> {
    if plaintext.len() % 16 != 0 {
        return Err(Ctap2Error::Internal("plaintext is not block aligned".into()));
    }
    let mut buffer = plaintext.to_vec();
    let len = buffer.len();
    Aes256CbcEnc::new(key.into(), &[0u8; 16].into())
        .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
        .map_err(|_| Ctap2Error::Internal("AES-CBC encryption failed".into()))?;
    Ok(buffer)
}

pub(crate) fn decrypt(key: &[u8; 32], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, Ctap2Error> {
    let mut buffer = Zeroizing::new(ciphertext.to_vec());
    Aes256CbcDec::new(key.into(), &[0u8; 16].into())
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|_| Ctap2Error::InvalidParameter("ciphertext length"))?;
    Ok(buffer)
}

/// PIN state for one power cycle. Nothing here is persisted.
pub struct PinState {
    key_agreement: KeyPair,
    pin_token: Zeroizing<[u8; 32]>,
    pin_hash: Option<[u8; PIN_HASH_LEN]>,
    retries: u8,
    max_retries: u8,
}

impl PinState {
    pub fn new(max_retries: u8) -> Self {
        let mut pin_token = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(pin_token.as_mut());
        Self {
            key_agreement: Self::agreement_group().generate_key_pair(),
            pin_token,
            pin_hash: None,
            retries: max_retries,
            max_retries,
        }
    }

    /// Protocol 1 always agrees on P-256, whatever curve credentials use.
    fn agreement_group() -> &'static EcGroup {
        EcGroup::p256()
    }

    pub fn is_set(&self) -> bool {
        self.pin_hash.is_some()
    }

    pub fn retries(&self) -> u8 {
        self.retries
    }

    pub fn key_agreement_public(&self) -> &ByteBuffer {
        &self.key_agreement.public
    }

    /// Check `HMAC(pinToken, message)[..16]`.
    pub fn verify_token_auth(&self, message: &[u8], param: &[u8; 16]) -> Result<(), Ctap2Error> {
        if !self.is_set() {
            return Err(Ctap2Error::PinNotSet);
        }
        if verify_auth(self.pin_token.as_ref(), message, param)? {
            Ok(())
        } else {
            Err(Ctap2Error::PinAuthInvalid)
        }
    }

    fn regenerate_key_agreement(&mut self) {
        self.key_agreement = Self::agreement_group().generate_key_pair();
    }

    fn shared_secret(&self, platform_key: &ByteBuffer) -> Result<Zeroizing<[u8; 32]>, Ctap2Error> {
        let group = Self::agreement_group();
        if group.point_is_at_infinity(platform_key)? {
            return Err(Ctap2Error::InvalidParameter("keyAgreement"));
        }
        let point = group.point_mul(&self.key_agreement.private, platform_key)?;
        let x = Zeroizing::new(group.point_x(&point)?);
        Ok(Zeroizing::new(Sha256::digest(x.as_slice()).into()))
    }

    /// Decrypt and validate a new PIN, then store its hash.
    fn install_pin(&mut self, shared: &[u8; 32], new_pin_enc: &ByteBuffer) -> Result<(), Ctap2Error> {
        if new_pin_enc.len() != PIN_BLOCK_LEN {
            return Err(Ctap2Error::PinPolicyViolation);
        }
        let block = decrypt(shared, new_pin_enc.as_slice())?;
        let mut pin = Zeroizing::new(ByteBuffer::from(block.as_slice()));
        pin.truncate();
        if !(MIN_PIN_LEN..=MAX_PIN_LEN).contains(&pin.len()) || std::str::from_utf8(pin.as_slice()).is_err() {
            return Err(Ctap2Error::PinPolicyViolation);
        }
        let mut hash = [0u8; PIN_HASH_LEN];
        hash.copy_from_slice(&Sha256::digest(pin.as_slice())[..PIN_HASH_LEN]);
        self.pin_hash = Some(hash);
        self.retries = self.max_retries;
        rand::thread_rng().fill_bytes(self.pin_token.as_mut());
        Ok(())
    }

    /// Consume one retry and compare the decrypted PIN hash.
    fn check_pin_hash(&mut self, shared: &[u8; 32], pin_hash_enc: &ByteBuffer) -> Result<(), Ctap2Error> {
        let Some(stored) = self.pin_hash else {
            return Err(Ctap2Error::PinNotSet);
        };
        if self.retries == 0 {
            return Err(Ctap2Error::PinBlocked);
        }
        if pin_hash_enc.len() != PIN_HASH_LEN {
            return Err(Ctap2Error::InvalidParameter("pinHashEnc"));
        }
        self.retries -= 1;
        let hash = decrypt(shared, pin_hash_enc.as_slice())?;
        if bool::from(hash.as_slice().ct_eq(&stored)) {
            self.retries = self.max_retries;
            return Ok(());
        }
        self.regenerate_key_agreement();
        tracing::warn!(retries = self.retries, "Wrong PIN");
        if self.retries == 0 {
            Err(Ctap2Error::PinBlocked)
        } else {
            Err(Ctap2Error::PinInvalid)
        }
    }

    pub fn handle(&mut self, req: ClientPinRequest) -> Result<Vec<ByteBuffer>, Ctap2Error> {
        if req.protocol != PIN_PROTOCOL {
            return Err(Ctap2Error::InvalidParameter("pinUvAuthProtocol"));
        }
        match req.sub_command {
            SUB_GET_RETRIES => Ok(vec![ByteBuffer::from([self.retries])]),
            SUB_GET_KEY_AGREEMENT => Ok(vec![self.key_agreement.public.clone()]),
            SUB_SET_PIN => {
                let platform_key = req.key_agreement.ok_or(Ctap2Error::MissingParameter("keyAgreement"))?;
                let pin_auth = req.pin_auth.ok_or(Ctap2Error::MissingParameter("pinUvAuthParam"))?;
                let new_pin_enc = req.new_pin_enc.ok_or(Ctap2Error::MissingParameter("newPinEnc"))?;
                if self.is_set() {
                    return Err(Ctap2Error::PinAuthInvalid);
                }
                let shared = self.shared_secret(&platform_key)?;
                if !verify_auth(shared.as_ref(), new_pin_enc.as_slice(), &pin_auth)? {
                    return Err(Ctap2Error::PinAuthInvalid);
                }
                self.install_pin(&shared, &new_pin_enc)?;
                tracing::info!("PIN set");
                Ok(Vec::new())
            }
            SUB_CHANGE_PIN => {
                let platform_key = req.key_agreement.ok_or(Ctap2Error::MissingParameter("keyAgreement"))?;
                let pin_auth = req.pin_auth.ok_or(Ctap2Error::MissingParameter("pinUvAuthParam"))?;
                let new_pin_enc = req.new_pin_enc.ok_or(Ctap2Error::MissingParameter("newPinEnc"))?;
                let pin_hash_enc = req.pin_hash_enc.ok_or(Ctap2Error::MissingParameter("pinHashEnc"))?;
                if !self.is_set() {
                    return Err(Ctap2Error::PinNotSet);
                }
                if self.retries == 0 {
                    return Err(Ctap2Error::PinBlocked);
                }
                let shared = self.shared_secret(&platform_key)?;
                let signed = new_pin_enc.clone() + pin_hash_enc.clone();
                if !verify_auth(shared.as_ref(), signed.as_slice(), &pin_auth)? {
                    return Err(Ctap2Error::PinAuthInvalid);
                }
                self.check_pin_hash(&shared, &pin_hash_enc)?;
                self.install_pin(&shared, &new_pin_enc)?;
                tracing::info!("PIN changed");
                Ok(Vec::new())
            }
            SUB_GET_PIN_TOKEN => {
                let platform_key = req.key_agreement.ok_or(Ctap2Error::MissingParameter("keyAgreement"))?;
                let pin_hash_enc = req.pin_hash_enc.ok_or(Ctap2Error::MissingParameter("pinHashEnc"))?;
                if !self.is_set() {
                    return Err(Ctap2Error::PinNotSet);
                }
                let shared = self.shared_secret(&platform_key)?;
                self.check_pin_hash(&shared, &pin_hash_enc)?;
                let token = encrypt(&shared, self.pin_token.as_ref())?;
                tracing::debug!("PIN token released");
                Ok(vec![ByteBuffer::from(token)])
            }
            other => Err(Ctap2Error::InvalidSubcommand(other)),
        }
    }
}

/// Platform half of protocol 1, as a client library would implement it.
#[cfg(test)]
pub(crate) mod platform {
    use super::*;

    pub struct Platform {
        pub key: KeyPair,
        pub shared: [u8; 32],
    }

    impl Platform {
        pub fn agree(authenticator_key: &ByteBuffer) -> Self {
            let group = EcGroup::p256();
            let key = group.generate_key_pair();
            let point = group.point_mul(&key.private, authenticator_key).unwrap();
            let shared = Sha256::digest(group.point_x(&point).unwrap().as_slice()).into();
            Self { key, shared }
        }

        pub fn pin_block(&self, pin: &str) -> ByteBuffer {
            let mut block = ByteBuffer::from_text(pin);
            block.pad_right(PIN_BLOCK_LEN, 0).unwrap();
            ByteBuffer::from(encrypt(&self.shared, block.as_slice()).unwrap())
        }

        pub fn pin_hash(&self, pin: &str) -> ByteBuffer {
            let hash = Sha256::digest(pin.as_bytes());
            ByteBuffer::from(encrypt(&self.shared, &hash[..PIN_HASH_LEN]).unwrap())
        }

        pub fn mac(&self, data: &[u8]) -> [u8; 16] {
            authenticate(&self.shared, data).unwrap()
        }

        pub fn decrypt_token(&self, token_enc: &ByteBuffer) -> Vec<u8> {
            decrypt(&self.shared, token_enc.as_slice()).unwrap().to_vec()
        }
    }

    pub fn request(sub_command: u8) -> ClientPinRequest {
        ClientPinRequest {
            protocol: PIN_PROTOCOL,
            sub_command,
            key_agreement: None,
            pin_auth: None,
            new_pin_enc: None,
            pin_hash_enc: None,
        }
    }

    pub fn set_pin(state: &mut PinState, pin: &str) -> Result<Vec<ByteBuffer>, Ctap2Error> {
        let platform = Platform::agree(state.key_agreement_public());
        let new_pin_enc = platform.pin_block(pin);
        state.handle(ClientPinRequest {
            key_agreement: Some(platform.key.public.clone()),
            pin_auth: Some(platform.mac(new_pin_enc.as_slice())),
            new_pin_enc: Some(new_pin_enc),
            ..request(SUB_SET_PIN)
        })
    }

    pub fn get_token(state: &mut PinState, pin: &str) -> Result<Vec<u8>, Ctap2Error> {
        let platform = Platform::agree(state.key_agreement_public());
        let out = state.handle(ClientPinRequest {
            key_agreement: Some(platform.key.public.clone()),
            pin_hash_enc: Some(platform.pin_hash(pin)),
            ..request(SUB_GET_PIN_TOKEN)
        })?;
        Ok(platform.decrypt_token(&out[0]))
    }
}

#[cfg(test)]
mod tests {
    use super::platform::{Platform, get_token, request, set_pin};
    use super::*;

    #[test]
    fn test_cbc_roundtrip_without_padding() {
        let key = [0x42u8; 32];
        let plain = [0x11u8; 32];
        let ct = encrypt(&key, &plain).unwrap();
        assert_eq!(ct.len(), 32);
        assert_ne!(ct, plain);
        assert_eq!(decrypt(&key, &ct).unwrap().as_slice(), &plain);
        assert!(decrypt(&key, &ct[..15]).is_err());
    }

    #[test]
    fn test_set_pin_then_token() {
        let mut state = PinState::new(8);
        assert!(!state.is_set());
        set_pin(&mut state, "1234").unwrap();
        assert!(state.is_set());

        let token = get_token(&mut state, "1234").unwrap();
        assert_eq!(token.len(), 32);
        let cdh = [0x5Au8; 32];
        let param = authenticate(&token, &cdh).unwrap();
        state.verify_token_auth(&cdh, &param).unwrap();
        assert!(matches!(
            state.verify_token_auth(&[0u8; 32], &param),
            Err(Ctap2Error::PinAuthInvalid)
        ));
    }

    #[test]
    fn test_set_pin_twice_is_rejected() {
        let mut state = PinState::new(8);
        set_pin(&mut state, "1234").unwrap();
        assert!(matches!(set_pin(&mut state, "5678"), Err(Ctap2Error::PinAuthInvalid)));
    }

    #[test]
    fn test_pin_length_policy() {
        let mut state = PinState::new(8);
        assert!(matches!(set_pin(&mut state, "123"), Err(Ctap2Error::PinPolicyViolation)));
        assert!(!state.is_set());
    }

    #[test]
    fn test_wrong_pin_regenerates_key_and_blocks() {
        let mut state = PinState::new(3);
        set_pin(&mut state, "1234").unwrap();

        let before = state.key_agreement_public().clone();
        assert!(matches!(get_token(&mut state, "0000"), Err(Ctap2Error::PinInvalid)));
        assert_ne!(state.key_agreement_public(), &before);
        assert_eq!(state.retries(), 2);

        assert!(matches!(get_token(&mut state, "0000"), Err(Ctap2Error::PinInvalid)));
        assert!(matches!(get_token(&mut state, "0000"), Err(Ctap2Error::PinBlocked)));
        assert_eq!(state.retries(), 0);
        assert!(matches!(get_token(&mut state, "1234"), Err(Ctap2Error::PinBlocked)));
    }

    #[test]
    fn test_correct_pin_restores_retries() {
        let mut state = PinState::new(8);
        set_pin(&mut state, "1234").unwrap();
        let _ = get_token(&mut state, "9999");
        assert_eq!(state.retries(), 7);
        get_token(&mut state, "1234").unwrap();
        assert_eq!(state.retries(), 8);
    }

    #[test]
    fn test_change_pin() {
        let mut state = PinState::new(8);
        set_pin(&mut state, "1234").unwrap();

        let platform = Platform::agree(state.key_agreement_public());
        let new_pin_enc = platform.pin_block("87654321");
        let pin_hash_enc = platform.pin_hash("1234");
        let signed = new_pin_enc.clone() + pin_hash_enc.clone();
        state
            .handle(ClientPinRequest {
                key_agreement: Some(platform.key.public.clone()),
                pin_auth: Some(platform.mac(signed.as_slice())),
                new_pin_enc: Some(new_pin_enc),
                pin_hash_enc: Some(pin_hash_enc),
                ..request(SUB_CHANGE_PIN)
            })
            .unwrap();

        assert!(matches!(get_token(&mut state, "1234"), Err(Ctap2Error::PinInvalid)));
        assert!(get_token(&mut state, "87654321").is_ok());
    }

    #[test]
    fn test_token_without_pin_set() {
        let mut state = PinState::new(8);
        assert!(matches!(get_token(&mut state, "1234"), Err(Ctap2Error::PinNotSet)));
    }

    #[test]
    fn test_retries_and_unknown_subcommand() {
        let mut state = PinState::new(8);
        assert_eq!(state.handle(request(SUB_GET_RETRIES)).unwrap(), vec![ByteBuffer::from([8])]);
        assert!(matches!(
            state.handle(request(0x09)),
            Err(Ctap2Error::InvalidSubcommand(0x09))
        ));
        assert!(matches!(
            state.handle(ClientPinRequest { protocol: 2, ..request(SUB_GET_RETRIES) }),
            Err(Ctap2Error::InvalidParameter(_))
        ));
    }
}
