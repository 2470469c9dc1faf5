use pbkdf2::pbkdf2_hmac;
use sha2::Sha512;

/// PBKDF2-HMAC-SHA-512 key derivation, used both for the per-record data key
/// (`masterKey`, `perRecordSalt`) and for deriving a master key from a
/// passphrase (§4.4).
pub fn derive_key(secret: &[u8], salt: &[u8], iterations: u32, key_len: usize) -> Vec<u8> {
    let mut out = vec![0u8; key_len];
    pbkdf2_hmac::<Sha512>(secret, salt, iterations, &mut out);
    out
}
