use super::authenticator_data::{FLAG_UP, FLAG_UV, build_assertion_auth_data};
use super::types::{Ctap2Error, GetAssertionRequest};
use super::{Engine, Verification};
use crate::buffer::{ByteBuffer, uint32_to_bb};
use crate::ec::encode_der_signature;
use crate::store::{CredentialRecord, CredentialStore, rp_id_hash};
use crate::up::{CancelToken, GestureKind, Prompt, UserGesture, UserPresenceProof};

pub(crate) struct Plan {
    credential: CredentialRecord,
    client_data_hash: [u8; 32],
    flags: u8,
    candidates: u32,
    proof: UserPresenceProof,
}

fn account_label(record: &CredentialRecord) -> String {
    record
        .user_display
        .clone()
        .or_else(|| record.user_name.clone())
        .unwrap_or_else(|| record.user_id.to_hex_string())
}

/// Credentials that may answer this request: the allow list filtered to
/// this RP, or every discoverable credential for the RP when there is no
/// allow list.
fn candidates<S: CredentialStore>(
    store: &S,
    req: &GetAssertionRequest,
) -> Result<Vec<CredentialRecord>, Ctap2Error> {
    let rp_hash = rp_id_hash(&req.rp_id);
    if req.allow_list.is_empty() {
        return Ok(store
            .find_by_rp_hash(&rp_hash)?
            .into_iter()
            .filter(|c| c.discoverable)
            .collect());
    }
    let mut found = Vec::new();
    for id in &req.allow_list {
        if let Some(record) = store.get(id)? {
            if record.rp_id_hash == rp_hash {
                found.push(record);
            }
        }
    }
    Ok(found)
}

pub(crate) fn validate<S: CredentialStore, G: UserGesture>(
    engine: &Engine<S, G>,
    req: GetAssertionRequest,
    cancel: &CancelToken,
) -> Result<Plan, Ctap2Error> {
    let mut found = candidates(&engine.store, &req)?;
    if found.is_empty() {
        tracing::info!(rp_id = %req.rp_id, "No matching credential");
        return Err(Ctap2Error::NoCredentials);
    }
    let count = found.len() as u32;

    let verification = engine.user_verification(
        req.pin_auth.as_ref(),
        &req.client_data_hash,
        req.options.uv,
        false,
    )?;
    // Silent assertions are only allowed once the PIN token vouched for the user.
    if !req.options.up && verification != Verification::PinToken {
        return Err(Ctap2Error::InvalidParameter("options"));
    }

    let index = if found.len() > 1 && req.allow_list.is_empty() {
        let accounts: Vec<String> = found.iter().map(account_label).collect();
        engine
            .gesture
            .select_credential(&Prompt::select_account(&req.rp_id), &accounts, cancel)
            .filter(|&i| i < found.len())
            .ok_or(Ctap2Error::OperationDenied)?
    } else {
        0
    };
    let credential = found.swap_remove(index);

    let mut flags = 0;
    let proof = if req.options.up || verification == Verification::Gesture {
        let kind = match verification {
            Verification::Gesture => GestureKind::Verification,
            _ => GestureKind::Presence,
        };
        let prompt = Prompt::get_assertion(&req.rp_id, credential.user_display.as_deref());
        let proof = engine.require_gesture(kind, &prompt, cancel)?;
        flags |= FLAG_UP;
        proof
    } else {
        UserPresenceProof::granted()
    };
    if verification != Verification::None {
        flags |= FLAG_UV;
    }

    Ok(Plan {
        credential,
        client_data_hash: req.client_data_hash,
        flags,
        candidates: count,
        proof,
    })
}

/// Response fields: credential id, authenticator data, DER signature, user
/// id, number of matching credentials.
pub(crate) fn execute<S: CredentialStore, G: UserGesture>(
    engine: &Engine<S, G>,
    plan: Plan,
    cancel: &CancelToken,
) -> Result<Vec<ByteBuffer>, Ctap2Error> {
    if cancel.is_cancelled() {
        return Err(Ctap2Error::KeepaliveCancel);
    }
    let store = &engine.store;
    let group = store.group();
    let credential = plan.credential;

    let count = store.next_sign_count(&credential.credential_id)?;
    let auth_data = build_assertion_auth_data(&credential.rp_id_hash, plan.flags, count);

    let mut signed = auth_data.clone();
    signed.extend_from_slice(&plan.client_data_hash);
    let digest = group.digest(signed.as_slice());
    let (r, s) = store.sign(&credential.credential_id, digest.as_slice(), &plan.proof)?;
    let der_sig = encode_der_signature(r.as_slice(), s.as_slice());

    tracing::info!(
        cred_id = %credential.credential_id,
        rp_id = %credential.rp_id,
        sign_count = count,
        "Assertion signed"
    );
    Ok(vec![
        credential.credential_id,
        auth_data,
        ByteBuffer::from(der_sig),
        credential.user_id,
        uint32_to_bb(plan.candidates),
    ])
}
