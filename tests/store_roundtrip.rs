use dicekey::buffer::ByteBuffer;
use dicekey::ec::{EcGroup, verify_ecdsa};
use dicekey::store::{
    CredentialStore, MemorySecretStore, NewCredential, SecretStore, SoftwareStore, StoreError,
    rp_id_hash,
};
use dicekey::{AuthenticatorConfig, Backend, UserPresenceProof};

fn params(rp_id: &str, user: &str) -> NewCredential {
    NewCredential {
        rp_id: rp_id.to_string(),
        rp_name: Some(format!("{rp_id} name")),
        user_id: ByteBuffer::from_text(user),
        user_name: Some("alice".into()),
        user_display: Some("Alice".into()),
        discoverable: true,
    }
}

fn open(dir: &std::path::Path, secrets: &dyn SecretStore) -> SoftwareStore {
    SoftwareStore::open(EcGroup::p256(), dir, secrets, 16).unwrap()
}

#[test]
fn test_store_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let secrets = MemorySecretStore::new();

    let created = {
        let store = open(dir.path(), &secrets);
        let record = store.generate_key(params("example.com", "user1")).unwrap();
        store.next_sign_count(&record.credential_id).unwrap();
        record
    };

    // Reload from disk
    let store = open(dir.path(), &secrets);
    assert_eq!(store.credential_count().unwrap(), 1);

    let loaded = store.get(&created.credential_id).unwrap().expect("credential not found");
    assert_eq!(loaded.rp_id, "example.com");
    assert_eq!(loaded.user_id, ByteBuffer::from_text("user1"));
    assert_eq!(loaded.public_key, created.public_key);
    assert_eq!(loaded.sign_count, 1);
    assert!(loaded.discoverable);

    let digest = EcGroup::p256().digest(b"after reload");
    let (r, s) = store
        .sign(&created.credential_id, digest.as_slice(), &UserPresenceProof::test_only())
        .unwrap();
    assert!(verify_ecdsa("prime256v1", &loaded.public_key, &digest, &r, &s).unwrap());
}

#[test]
fn test_store_index() {
    let dir = tempfile::tempdir().unwrap();
    let secrets = MemorySecretStore::new();
    let store = open(dir.path(), &secrets);

    let first = store.generate_key(params("rp.example", "user1")).unwrap();
    let second = store.generate_key(params("rp.example", "user2")).unwrap();
    assert_eq!(store.credential_count().unwrap(), 2);

    let results = store.find_by_rp_hash(&rp_id_hash("rp.example")).unwrap();
    assert_eq!(results.len(), 2);
    // Most recent first
    assert_eq!(results[0].credential_id, second.credential_id);
    assert_eq!(results[1].credential_id, first.credential_id);

    assert!(matches!(
        store.generate_key(params("rp.example", "user1")),
        Err(StoreError::AlreadyRegistered)
    ));
}

#[test]
fn test_store_remove() {
    let dir = tempfile::tempdir().unwrap();
    let secrets = MemorySecretStore::new();
    let store = open(dir.path(), &secrets);
    let record = store.generate_key(params("remove.example", "user")).unwrap();

    store.delete_key(&record.credential_id).unwrap();
    assert_eq!(store.credential_count().unwrap(), 0);
    assert!(store.get(&record.credential_id).unwrap().is_none());

    // Deleting again is not an error
    store.delete_key(&record.credential_id).unwrap();

    // Disk file should be gone
    let reloaded = open(dir.path(), &secrets);
    assert_eq!(reloaded.credential_count().unwrap(), 0);
}

#[test]
fn test_store_wrong_key_skips_file() {
    // Written under one master key, reloaded under another: the GCM tag fails.
    let dir = tempfile::tempdir().unwrap();
    open(dir.path(), &MemorySecretStore::new())
        .generate_key(params("wrong-key.example", "user"))
        .unwrap();

    let store = open(dir.path(), &MemorySecretStore::new());
    assert_eq!(store.credential_count().unwrap(), 0, "wrong-key file must be skipped");
}

#[test]
fn test_store_skips_truncated_and_foreign_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("deadbeef.bin"), b"short").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"ignore me").unwrap();

    let store = open(dir.path(), &MemorySecretStore::new());
    assert_eq!(store.credential_count().unwrap(), 0);
}

#[test]
fn test_store_corrupt_file_does_not_affect_valid_ones() {
    let dir = tempfile::tempdir().unwrap();
    let secrets = MemorySecretStore::new();
    let record = open(dir.path(), &secrets)
        .generate_key(params("good.example", "user"))
        .unwrap();

    std::fs::write(dir.path().join("garbage.bin"), b"not encrypted").unwrap();

    let store = open(dir.path(), &secrets);
    assert_eq!(store.credential_count().unwrap(), 1);
    assert!(store.get(&record.credential_id).unwrap().is_some());
}

#[test]
fn test_backend_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = AuthenticatorConfig {
        curve: "secp384r1".into(),
        max_credentials: 1,
        store_dir: Some(dir.path().to_path_buf()),
        ..AuthenticatorConfig::default()
    };
    let store: Backend =
        Backend::Software(SoftwareStore::from_config(&config, &MemorySecretStore::new()).unwrap());
    assert_eq!(store.group().name(), EcGroup::p384().name());

    store.generate_key(params("a.example", "u1")).unwrap();
    assert!(matches!(
        store.generate_key(params("a.example", "u2")),
        Err(StoreError::ResourceExhausted(1))
    ));
    assert_eq!(store.clear().unwrap(), 1);
    assert_eq!(store.credential_count().unwrap(), 0);
}

#[test]
fn test_clear_removes_files() {
    let dir = tempfile::tempdir().unwrap();
    let secrets = MemorySecretStore::new();
    {
        let store = open(dir.path(), &secrets);
        store.generate_key(params("a.example", "u1")).unwrap();
        store.generate_key(params("b.example", "u2")).unwrap();
        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.relying_parties().unwrap().is_empty());
    }

    let store = open(dir.path(), &secrets);
    assert_eq!(store.credential_count().unwrap(), 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
