//! C4 — AEAD encryption, key derivation, and master key lifecycle.

pub mod kdf;
pub mod key_store;

use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::EncryptionConfig;
use crate::error::{CoreError, CoreResult};
use crate::models::{AuditOutcome, DataClassification};
use key_store::{random_bytes, KeyMaterial, MasterKeyStore};

pub const ALGORITHM_AES_256_GCM: &str = "AES-256-GCM";

/// An AEAD ciphertext envelope. Opaque to the storage layer except via its
/// shape: every field is base64 text so it round-trips through a SQLite TEXT
/// column without a BLOB binding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptionRecord {
    pub ciphertext: String,
    pub iv: String,
    pub salt: String,
    pub tag: String,
    pub algorithm: String,
}

struct MasterKeyState {
    key: KeyMaterial,
    salt: Vec<u8>,
}

#[async_trait]
pub trait EncryptionService: Send + Sync {
    async fn encrypt(&self, value: &[u8], classification: DataClassification) -> CoreResult<EncryptionRecord>;
    async fn decrypt(&self, record: &EncryptionRecord) -> CoreResult<Vec<u8>>;
    async fn change_passphrase(&self, old_passphrase: &str, new_passphrase: &str) -> CoreResult<()>;
    fn available(&self) -> bool;
}

/// AES-256-GCM implementation backed by PBKDF2-HMAC-SHA-512 key derivation
/// and an OS-wrapped master key (§4.4).
pub struct Aes256GcmEncryptionService {
    config: EncryptionConfig,
    store: MasterKeyStore,
    state: RwLock<MasterKeyState>,
}

impl Aes256GcmEncryptionService {
    pub fn initialize(
        config: EncryptionConfig,
        security_dir: &std::path::Path,
        passphrase: Option<&str>,
    ) -> CoreResult<Arc<Self>> {
        let store = MasterKeyStore::new(security_dir);
        let (key, salt) = store.load_or_init(
            passphrase,
            config.iterations,
            config.key_length,
            config.salt_length,
        )?;
        Ok(Arc::new(Self {
            config,
            store,
            state: RwLock::new(MasterKeyState { key, salt }),
        }))
    }

    /// Builds the service from already-derived key material, bypassing the
    /// OS secret store. For tests and for embedders that manage the master
    /// key themselves; `store` is still used for passphrase rotation.
    pub fn from_key_material(config: EncryptionConfig, store: MasterKeyStore, key: KeyMaterial, salt: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            state: RwLock::new(MasterKeyState { key, salt }),
        })
    }

    fn cipher_for(&self, data_key: &[u8]) -> CoreResult<Aes256Gcm> {
        let key = Key::<Aes256Gcm>::from_slice(data_key);
        Ok(Aes256Gcm::new(key))
    }
}

#[async_trait]
impl EncryptionService for Aes256GcmEncryptionService {
    async fn encrypt(&self, value: &[u8], _classification: DataClassification) -> CoreResult<EncryptionRecord> {
        let state = self.state.read().await;
        let per_record_salt = random_bytes(self.config.salt_length);
        let data_key = kdf::derive_key(
            state.key.as_bytes(),
            &per_record_salt,
            self.config.iterations,
            self.config.key_length,
        );
        let iv = random_bytes(self.config.iv_length);
        let cipher = self.cipher_for(&data_key)?;
        let nonce = Nonce::from_slice(&iv);

        let mut sealed = cipher
            .encrypt(nonce, Payload { msg: value, aad: &[] })
            .map_err(|_| CoreError::Internal(anyhow::anyhow!("AEAD encryption failed")))?;
        let tag = sealed.split_off(sealed.len() - self.config.tag_length);

        Ok(EncryptionRecord {
            ciphertext: STANDARD.encode(sealed),
            iv: STANDARD.encode(iv),
            salt: STANDARD.encode(per_record_salt),
            tag: STANDARD.encode(tag),
            algorithm: ALGORITHM_AES_256_GCM.to_string(),
        })
    }

    async fn decrypt(&self, record: &EncryptionRecord) -> CoreResult<Vec<u8>> {
        if record.algorithm != ALGORITHM_AES_256_GCM {
            return Err(CoreError::AlgorithmUnsupported(record.algorithm.clone()));
        }

        let state = self.state.read().await;
        let per_record_salt = STANDARD
            .decode(&record.salt)
            .map_err(|e| CoreError::ValidationError(e.to_string()))?;
        let iv = STANDARD
            .decode(&record.iv)
            .map_err(|e| CoreError::ValidationError(e.to_string()))?;
        let mut ciphertext = STANDARD
            .decode(&record.ciphertext)
            .map_err(|e| CoreError::ValidationError(e.to_string()))?;
        let tag = STANDARD
            .decode(&record.tag)
            .map_err(|e| CoreError::ValidationError(e.to_string()))?;
        ciphertext.extend_from_slice(&tag);

        let data_key = kdf::derive_key(
            state.key.as_bytes(),
            &per_record_salt,
            self.config.iterations,
            self.config.key_length,
        );
        let cipher = self.cipher_for(&data_key)?;
        let nonce = Nonce::from_slice(&iv);

        cipher
            .decrypt(nonce, Payload { msg: &ciphertext, aad: &[] })
            .map_err(|_| CoreError::IntegrityViolation)
    }

    async fn change_passphrase(&self, old_passphrase: &str, new_passphrase: &str) -> CoreResult<()> {
        let mut state = self.state.write().await;
        let (new_key, new_salt) = self.store.rotate(
            &state.key,
            &state.salt,
            old_passphrase,
            new_passphrase,
            self.config.iterations,
            self.config.key_length,
            self.config.salt_length,
        )?;
        state.key = new_key;
        state.salt = new_salt;
        Ok(())
    }

    fn available(&self) -> bool {
        true
    }
}

/// Outcome helper for audit logging classification/access events.
pub fn outcome_of<T>(result: &CoreResult<T>) -> AuditOutcome {
    if result.is_ok() {
        AuditOutcome::Success
    } else {
        AuditOutcome::Failure
    }
}
