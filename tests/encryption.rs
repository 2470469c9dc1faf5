mod common;

use shard_core::crypto::key_store::{KeyMaterial, MasterKeyStore};
use shard_core::crypto::{Aes256GcmEncryptionService, EncryptionService};
use shard_core::models::DataClassification;
use tempfile::TempDir;

#[tokio::test]
async fn round_trips_plaintext() {
    let dir = TempDir::new().unwrap();
    let config = common::test_config(dir.path(), 1).encryption;
    let store = MasterKeyStore::new(dir.path());
    let service = Aes256GcmEncryptionService::from_key_material(
        config,
        store,
        KeyMaterial::random(32),
        vec![0u8; 32],
    );

    let plaintext = b"a memory about the user's favorite color";
    let record = service.encrypt(plaintext, DataClassification::Confidential).await.unwrap();
    let decrypted = service.decrypt(&record).await.unwrap();
    assert_eq!(decrypted, plaintext);
}

#[tokio::test]
async fn tampered_ciphertext_fails_integrity_check() {
    let dir = TempDir::new().unwrap();
    let config = common::test_config(dir.path(), 1).encryption;
    let store = MasterKeyStore::new(dir.path());
    let service = Aes256GcmEncryptionService::from_key_material(
        config,
        store,
        KeyMaterial::random(32),
        vec![0u8; 32],
    );

    let mut record = service.encrypt(b"secret value", DataClassification::Restricted).await.unwrap();
    record.tag = "AAAAAAAAAAAAAAAAAAAAAA==".to_string();

    let result = service.decrypt(&record).await;
    assert!(matches!(result, Err(shard_core::CoreError::IntegrityViolation)));
}

#[tokio::test]
async fn unknown_algorithm_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = common::test_config(dir.path(), 1).encryption;
    let store = MasterKeyStore::new(dir.path());
    let service = Aes256GcmEncryptionService::from_key_material(
        config,
        store,
        KeyMaterial::random(32),
        vec![0u8; 32],
    );

    let mut record = service.encrypt(b"value", DataClassification::Internal).await.unwrap();
    record.algorithm = "ROT13".to_string();

    let result = service.decrypt(&record).await;
    assert!(matches!(result, Err(shard_core::CoreError::AlgorithmUnsupported(_))));
}
