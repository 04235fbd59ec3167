use std::convert::TryFrom;

use tss_esapi::Context;
use tss_esapi::attributes::ObjectAttributesBuilder;
use tss_esapi::handles::{KeyHandle, ObjectHandle};
use tss_esapi::interface_types::algorithm::{HashingAlgorithm, PublicAlgorithm};
use tss_esapi::structures::{
    KeyedHashScheme, Private, Public, PublicBuilder, PublicKeyedHashParameters, SensitiveData,
};
use tss_esapi::traits::{Marshall, UnMarshall};
use zeroize::Zeroizing;

use super::TpmError;

fn seal_err(e: tss_esapi::Error) -> TpmError {
    TpmError::classify(e, TpmError::Seal)
}

/// Seal `secret` under `primary`. Returns the (private, public) blobs
/// needed to load it again.
pub fn seal(
    ctx: &mut Context,
    primary: KeyHandle,
    secret: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), TpmError> {
    let sensitive = SensitiveData::try_from(secret.to_vec()).map_err(seal_err)?;

    let attrs = ObjectAttributesBuilder::new()
        .with_fixed_tpm(true)
        .with_fixed_parent(true)
        .with_user_with_auth(true)
        .with_no_da(true)
        .build()
        .map_err(seal_err)?;

    let template = PublicBuilder::new()
        .with_public_algorithm(PublicAlgorithm::KeyedHash)
        .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
        .with_object_attributes(attrs)
        .with_keyed_hash_parameters(PublicKeyedHashParameters::new(KeyedHashScheme::Null))
        .with_keyed_hash_unique_identifier(Default::default())
        .build()
        .map_err(seal_err)?;

    let result = ctx
        .execute_with_nullauth_session(|ctx| {
            ctx.create(primary, template, None, Some(sensitive), None, None)
        })
        .map_err(seal_err)?;

    let public = result.out_public.marshall().map_err(seal_err)?;
    Ok((result.out_private.value().to_vec(), public))
}

/// Load a sealed object and recover its contents. The object is flushed
/// whether or not unsealing succeeds.
pub fn unseal(
    ctx: &mut Context,
    primary: KeyHandle,
    private: &[u8],
    public: &[u8],
) -> Result<Zeroizing<Vec<u8>>, TpmError> {
    let private = Private::try_from(private.to_vec()).map_err(seal_err)?;
    let public = Public::unmarshall(public).map_err(seal_err)?;

    let sealed = ctx
        .execute_with_nullauth_session(|ctx| ctx.load(primary, private, public))
        .map_err(seal_err)?;

    let unsealed = ctx.execute_with_nullauth_session(|ctx| ctx.unseal(ObjectHandle::from(sealed)));
    let flushed = ctx.flush_context(ObjectHandle::from(sealed));

    let sensitive = unsealed.map_err(seal_err)?;
    flushed.map_err(seal_err)?;
    Ok(Zeroizing::new(sensitive.value().to_vec()))
}
