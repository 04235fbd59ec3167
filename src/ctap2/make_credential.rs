use super::attestation::build_attestation_object;
use super::authenticator_data::{FLAG_UP, FLAG_UV, build_make_cred_auth_data, encode_cose_key};
use super::types::{Ctap2Error, MakeCredentialRequest};
use super::{Engine, Verification};
use crate::buffer::ByteBuffer;
use crate::ec::encode_der_signature;
use crate::store::{CredentialStore, NewCredential, rp_id_hash};
use crate::up::{CancelToken, GestureKind, Prompt, UserGesture, UserPresenceProof};

pub(crate) struct Plan {
    params: NewCredential,
    client_data_hash: [u8; 32],
    flags: u8,
    proof: UserPresenceProof,
}

/// Deletes a freshly generated credential unless the command completes.
struct Registration<'a, S: CredentialStore> {
    store: &'a S,
    credential_id: Option<ByteBuffer>,
}

impl<'a, S: CredentialStore> Registration<'a, S> {
    fn new(store: &'a S, credential_id: ByteBuffer) -> Self {
        Self {
            store,
            credential_id: Some(credential_id),
        }
    }

    fn confirm(mut self) {
        self.credential_id = None;
    }
}

impl<S: CredentialStore> Drop for Registration<'_, S> {
    fn drop(&mut self) {
        let Some(id) = self.credential_id.take() else {
            return;
        };
        match self.store.delete_key(&id) {
            Ok(()) => tracing::info!(cred_id = %id, "Registration rolled back"),
            Err(e) => tracing::error!(cred_id = %id, error = %e, "Failed to roll back registration"),
        }
    }
}

pub(crate) fn validate<S: CredentialStore, G: UserGesture>(
    engine: &Engine<S, G>,
    req: MakeCredentialRequest,
    cancel: &CancelToken,
) -> Result<Plan, Ctap2Error> {
    let group = engine.store.group();
    if !req.algorithms.iter().any(|&alg| i64::from(alg) == group.cose_algorithm()) {
        return Err(Ctap2Error::UnsupportedAlgorithm);
    }

    let rp_hash = rp_id_hash(&req.rp_id);
    for id in &req.exclude_list {
        if engine.store.get(id)?.is_some_and(|c| c.rp_id_hash == rp_hash) {
            tracing::info!(cred_id = %id, rp_id = %req.rp_id, "Excluded credential present");
            return Err(Ctap2Error::CredentialExcluded);
        }
    }
    if engine.store.find_by_user(&rp_hash, &req.user_id)?.is_some() {
        tracing::info!(rp_id = %req.rp_id, "Credential already registered for user");
        return Err(Ctap2Error::AlreadyRegistered);
    }
    if engine.store.credential_count()? >= engine.store.max_credentials() {
        return Err(Ctap2Error::KeyStoreFull);
    }

    let verification = engine.user_verification(
        req.pin_auth.as_ref(),
        &req.client_data_hash,
        req.options.uv,
        true,
    )?;
    let kind = match verification {
        Verification::Gesture => GestureKind::Verification,
        _ => GestureKind::Presence,
    };
    let prompt = Prompt::make_credential(
        &req.rp_id,
        req.rp_name.as_deref(),
        req.user_display.as_deref(),
    );
    let proof = engine.require_gesture(kind, &prompt, cancel)?;

    let mut flags = FLAG_UP;
    if verification != Verification::None {
        flags |= FLAG_UV;
    }

    Ok(Plan {
        params: NewCredential {
            rp_id: req.rp_id,
            rp_name: req.rp_name,
            user_id: req.user_id,
            user_name: req.user_name,
            user_display: req.user_display,
            discoverable: req.options.rk,
        },
        client_data_hash: req.client_data_hash,
        flags,
        proof,
    })
}

/// Response fields: attestation object, credential id, public point.
pub(crate) fn execute<S: CredentialStore, G: UserGesture>(
    engine: &Engine<S, G>,
    plan: Plan,
    cancel: &CancelToken,
) -> Result<Vec<ByteBuffer>, Ctap2Error> {
    let store = &engine.store;
    let group = store.group();

    let record = store.generate_key(plan.params)?;
    let registration = Registration::new(store, record.credential_id.clone());

    let cose_key = encode_cose_key(group, &record.public_key)?;
    let auth_data = build_make_cred_auth_data(
        &record.rp_id_hash,
        plan.flags,
        record.sign_count,
        &engine.config.aaguid,
        &record.credential_id,
        &cose_key,
    )?;

    let mut signed = auth_data.clone();
    signed.extend_from_slice(&plan.client_data_hash);
    let digest = group.digest(signed.as_slice());
    let (r, s) = store.sign(&record.credential_id, digest.as_slice(), &plan.proof)?;
    let der_sig = encode_der_signature(r.as_slice(), s.as_slice());
    let attestation = build_attestation_object(group.cose_algorithm(), auth_data.as_slice(), &der_sig)?;

    if cancel.is_cancelled() {
        return Err(Ctap2Error::KeepaliveCancel);
    }
    registration.confirm();

    tracing::info!(
        cred_id = %record.credential_id,
        rp_id = %record.rp_id,
        discoverable = record.discoverable,
        "Credential registered"
    );
    Ok(vec![
        ByteBuffer::from(attestation),
        record.credential_id,
        record.public_key,
    ])
}
