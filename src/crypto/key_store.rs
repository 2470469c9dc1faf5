use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::TryRngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::kdf::derive_key;
use crate::error::{CoreError, CoreResult};

const SERVICE: &str = "shard_core";
const ACCOUNT: &str = "master_key";
const SALT_FILE: &str = "master.salt";

/// Cryptographic key material that is zeroed when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    pub fn random(len: usize) -> Self {
        let mut bytes = vec![0u8; len];
        rand::rngs::OsRng.try_fill_bytes(&mut bytes).expect("OS RNG failure");
        KeyMaterial(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        KeyMaterial(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Generates cryptographically random bytes for IVs and per-record salts.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.try_fill_bytes(&mut bytes).expect("OS RNG failure");
    bytes
}

/// Persists the master key wrapped in the platform's OS-level secret store,
/// with its salt kept alongside on disk (§4.4).
pub struct MasterKeyStore {
    salt_path: PathBuf,
}

impl MasterKeyStore {
    pub fn new(security_dir: &Path) -> Self {
        Self {
            salt_path: security_dir.join(SALT_FILE),
        }
    }

    fn entry(&self) -> CoreResult<keyring::Entry> {
        keyring::Entry::new(SERVICE, ACCOUNT)
            .map_err(|e| CoreError::EncryptionUnavailable(e.to_string()))
    }

    fn try_load(&self) -> CoreResult<Option<(KeyMaterial, Vec<u8>)>> {
        let entry = self.entry()?;
        match entry.get_password() {
            Ok(wrapped) => {
                let key_bytes = STANDARD
                    .decode(wrapped)
                    .map_err(|e| CoreError::EncryptionUnavailable(e.to_string()))?;
                let salt = std::fs::read(&self.salt_path)?;
                Ok(Some((KeyMaterial::from_bytes(key_bytes), salt)))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(CoreError::EncryptionUnavailable(e.to_string())),
        }
    }

    fn persist(&self, key: &KeyMaterial, salt: &[u8]) -> CoreResult<()> {
        if let Some(parent) = self.salt_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let entry = self.entry()?;
        entry
            .set_password(&STANDARD.encode(key.as_bytes()))
            .map_err(|e| CoreError::EncryptionUnavailable(e.to_string()))?;
        std::fs::write(&self.salt_path, salt)?;
        Ok(())
    }

    /// Loads the existing master key, or creates one on first run: derived
    /// from a passphrase if supplied, otherwise randomly generated.
    pub fn load_or_init(
        &self,
        passphrase: Option<&str>,
        iterations: u32,
        key_length: usize,
        salt_length: usize,
    ) -> CoreResult<(KeyMaterial, Vec<u8>)> {
        if let Some(existing) = self.try_load()? {
            return Ok(existing);
        }

        let salt = random_bytes(salt_length);
        let key = match passphrase {
            Some(p) => KeyMaterial::from_bytes(derive_key(p.as_bytes(), &salt, iterations, key_length)),
            None => KeyMaterial::random(key_length),
        };
        self.persist(&key, &salt)?;
        Ok((key, salt))
    }

    /// Verifies `old_passphrase` against the current key by re-deriving with
    /// the stored salt, then rotates to a key derived from `new_passphrase`
    /// with a freshly generated salt.
    pub fn rotate(
        &self,
        current: &KeyMaterial,
        current_salt: &[u8],
        old_passphrase: &str,
        new_passphrase: &str,
        iterations: u32,
        key_length: usize,
        salt_length: usize,
    ) -> CoreResult<(KeyMaterial, Vec<u8>)> {
        let candidate = derive_key(old_passphrase.as_bytes(), current_salt, iterations, key_length);
        if candidate != current.as_bytes() {
            return Err(CoreError::PassphraseMismatch);
        }

        let new_salt = random_bytes(salt_length);
        let new_key = KeyMaterial::from_bytes(derive_key(new_passphrase.as_bytes(), &new_salt, iterations, key_length));
        self.persist(&new_key, &new_salt)?;
        Ok((new_key, new_salt))
    }
}
