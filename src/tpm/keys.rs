use std::convert::TryFrom;
use std::convert::TryInto;

use tss_esapi::Context;
use tss_esapi::attributes::{ObjectAttributes, ObjectAttributesBuilder};
use tss_esapi::constants::tss::{TPM2_RH_NULL, TPM2_ST_HASHCHECK};
use tss_esapi::handles::{KeyHandle, ObjectHandle};
use tss_esapi::interface_types::algorithm::{HashingAlgorithm, PublicAlgorithm};
use tss_esapi::interface_types::ecc::EccCurve;
use tss_esapi::interface_types::resource_handles::Hierarchy;
use tss_esapi::structures::{
    Digest, EccPoint, EccScheme, HashScheme, HashcheckTicket, Private, Public, PublicBuilder,
    PublicEccParameters, PublicEccParametersBuilder, Signature, SignatureScheme,
    SymmetricDefinitionObject,
};
use tss_esapi::traits::{Marshall, UnMarshall};
use tss_esapi::tss2_esys::TPMT_TK_HASHCHECK;

use super::TpmError;
use crate::buffer::ByteBuffer;

/// P-256 coordinate width.
const COORD_LEN: usize = 32;

fn key_err(e: tss_esapi::Error) -> TpmError {
    TpmError::classify(e, TpmError::Key)
}

fn ecc_template(
    attrs: ObjectAttributes,
    params: PublicEccParameters,
) -> Result<Public, TpmError> {
    PublicBuilder::new()
        .with_public_algorithm(PublicAlgorithm::Ecc)
        .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
        .with_object_attributes(attrs)
        .with_ecc_parameters(params)
        .with_ecc_unique_identifier(EccPoint::default())
        .build()
        .map_err(key_err)
}

/// Owner-hierarchy storage primary. Deterministic for a given TPM, so the
/// same parent is recreated on every start.
pub fn create_primary(ctx: &mut Context) -> Result<KeyHandle, TpmError> {
    let params = PublicEccParametersBuilder::new_restricted_decryption_key(
        SymmetricDefinitionObject::AES_128_CFB,
        EccCurve::NistP256,
    )
    .build()
    .map_err(key_err)?;

    let attrs = ObjectAttributesBuilder::new()
        .with_fixed_tpm(true)
        .with_fixed_parent(true)
        .with_sensitive_data_origin(true)
        .with_user_with_auth(true)
        .with_restricted(true)
        .with_decrypt(true)
        .build()
        .map_err(key_err)?;

    let template = ecc_template(attrs, params)?;
    let result = ctx
        .execute_with_nullauth_session(|ctx| {
            ctx.create_primary(Hierarchy::Owner, template, None, None, None, None)
        })
        .map_err(key_err)?;
    Ok(result.key_handle)
}

/// Create an ECDSA-SHA256 signing key under `primary`.
/// Returns the marshalled (private, public) blobs.
pub fn create_signing_key(
    ctx: &mut Context,
    primary: KeyHandle,
) -> Result<(Vec<u8>, Vec<u8>), TpmError> {
    let scheme = EccScheme::EcDsa(HashScheme::new(HashingAlgorithm::Sha256));
    let params = PublicEccParametersBuilder::new_unrestricted_signing_key(scheme, EccCurve::NistP256)
        .build()
        .map_err(key_err)?;

    let attrs = ObjectAttributesBuilder::new()
        .with_fixed_tpm(true)
        .with_fixed_parent(true)
        .with_sensitive_data_origin(true)
        .with_user_with_auth(true)
        .with_sign_encrypt(true)
        .with_no_da(true)
        .build()
        .map_err(key_err)?;

    let template = ecc_template(attrs, params)?;
    let result = ctx
        .execute_with_nullauth_session(|ctx| ctx.create(primary, template, None, None, None, None))
        .map_err(key_err)?;

    let public = result.out_public.marshall().map_err(key_err)?;
    Ok((result.out_private.value().to_vec(), public))
}

pub fn load_key(
    ctx: &mut Context,
    primary: KeyHandle,
    private: &[u8],
    public: &[u8],
) -> Result<KeyHandle, TpmError> {
    let private = Private::try_from(private.to_vec()).map_err(key_err)?;
    let public = Public::unmarshall(public).map_err(key_err)?;
    ctx.execute_with_nullauth_session(|ctx| ctx.load(primary, private, public))
        .map_err(key_err)
}

/// Sign a SHA-256 digest with a loaded key. Returns `(r, s)`, each
/// left-padded to 32 bytes.
pub fn sign_digest(
    ctx: &mut Context,
    key: KeyHandle,
    digest: &[u8],
) -> Result<(ByteBuffer, ByteBuffer), TpmError> {
    if digest.len() != COORD_LEN {
        return Err(TpmError::Key(format!(
            "expected a 32-byte digest, got {}",
            digest.len()
        )));
    }
    let digest = Digest::try_from(digest.to_vec()).map_err(key_err)?;

    // The key is unrestricted, so an empty NULL-hierarchy ticket suffices.
    let validation: HashcheckTicket = TPMT_TK_HASHCHECK {
        tag: TPM2_ST_HASHCHECK,
        hierarchy: TPM2_RH_NULL,
        digest: Default::default(),
    }
    .try_into()
    .map_err(key_err)?;

    let signature = ctx
        .execute_with_nullauth_session(|ctx| {
            ctx.sign(key, digest, SignatureScheme::Null, validation)
        })
        .map_err(key_err)?;

    match signature {
        Signature::EcDsa(sig) => Ok((
            fixed_width(sig.signature_r().value())?,
            fixed_width(sig.signature_s().value())?,
        )),
        _ => Err(TpmError::Key("expected an ECDSA signature".into())),
    }
}

pub fn flush(ctx: &mut Context, handle: KeyHandle) -> Result<(), TpmError> {
    ctx.flush_context(ObjectHandle::from(handle)).map_err(key_err)
}

/// SEC1 uncompressed point from a marshalled TPM2B_PUBLIC blob.
pub fn public_point(public: &[u8]) -> Result<ByteBuffer, TpmError> {
    match Public::unmarshall(public).map_err(key_err)? {
        Public::Ecc { unique, .. } => {
            let mut point = ByteBuffer::from([0x04]);
            point += fixed_width(unique.x().value())?;
            point += fixed_width(unique.y().value())?;
            Ok(point)
        }
        _ => Err(TpmError::Key("not an ECC key".into())),
    }
}

fn fixed_width(bytes: &[u8]) -> Result<ByteBuffer, TpmError> {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    let mut out = ByteBuffer::from(&bytes[start..]);
    out.pad_left(COORD_LEN, 0)
        .map_err(|_| TpmError::Key(format!("{}-byte value does not fit a P-256 coordinate", bytes.len())))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_pads_and_strips() {
        assert_eq!(fixed_width(&[0x01]).unwrap().len(), 32);
        let mut wide = vec![0u8; 33];
        wide[32] = 7;
        let out = fixed_width(&wide).unwrap();
        assert_eq!(out.len(), 32);
        assert_eq!(out[31], 7);
        assert!(fixed_width(&[0xff; 33]).is_err());
    }
}
