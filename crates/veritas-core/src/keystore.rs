//! At-rest encryption of an agent's private key (password-based keystore).
//!
//! Format is deliberately close to the Ethereum UTC keystore: an scrypt KDF
//! stretches the password, half of the derived key drives an independent
//! SHA-256 MAC that is checked *before* attempting to decrypt (so a wrong
//! password fails fast and obviously, without needing to touch the cipher),
//! and the other half is the AEAD key.

use crate::error::{CoreError, CoreResult};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

const SCRYPT_LOG_N: u8 = 18; // N = 2^18 = 262144
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;
const SALT_LEN: usize = 32;
const DERIVED_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// scrypt tuning parameters, persisted alongside the ciphertext so a future
/// reader can reproduce the derivation without guessing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    pub n: u32,
    pub r: u32,
    pub p: u32,
    pub dklen: usize,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            n: 1u32 << SCRYPT_LOG_N,
            r: SCRYPT_R,
            p: SCRYPT_P,
            dklen: DERIVED_KEY_LEN,
        }
    }
}

/// An encrypted private key, safe to persist to disk or a database column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedKey {
    pub version: String,
    pub cipher: String,
    pub kdf: String,
    pub kdfparams: KdfParams,
    pub salt_hex: String,
    /// Ciphertext with the AEAD tag and nonce appended at the tail, hex-encoded.
    pub ciphertext_hex: String,
    /// SHA-256(derived_key[16:32] || ciphertext_hex bytes), checked before decrypt.
    pub mac: String,
    pub id: String,
    pub agent_id: String,
}

fn derive_key(password: &[u8], salt: &[u8]) -> CoreResult<Zeroizing<[u8; DERIVED_KEY_LEN]>> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, DERIVED_KEY_LEN)
        .map_err(|e| CoreError::KeyDerivation(e.to_string()))?;
    let mut out = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
    scrypt::scrypt(password, salt, &params, out.as_mut())
        .map_err(|e| CoreError::KeyDerivation(e.to_string()))?;
    Ok(out)
}

fn compute_mac(derived_key: &[u8; DERIVED_KEY_LEN], combined_ciphertext_hex: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(&derived_key[16..32]);
    hasher.update(combined_ciphertext_hex.as_bytes());
    hex::encode(hasher.finalize())
}

/// Encrypt a hex-encoded private key under `password`.
pub fn encrypt_private_key(
    password: &str,
    private_key_hex: &str,
    agent_id: &str,
) -> CoreResult<EncryptedKey> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    let derived = derive_key(password.as_bytes(), &salt)?;

    let cipher = Aes256Gcm::new_from_slice(&derived[0..32])
        .map_err(|e| CoreError::KeyDerivation(e.to_string()))?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext_and_tag = cipher
        .encrypt(nonce, private_key_hex.as_bytes())
        .map_err(|_| CoreError::KeyDerivation("encryption failed".to_string()))?;

    let mut combined = ciphertext_and_tag;
    combined.extend_from_slice(&nonce_bytes);
    let ciphertext_hex = hex::encode(&combined);

    let mac = compute_mac(&derived, &ciphertext_hex);

    Ok(EncryptedKey {
        version: "1".to_string(),
        cipher: "aes-256-gcm".to_string(),
        kdf: "scrypt".to_string(),
        kdfparams: KdfParams::default(),
        salt_hex: hex::encode(salt),
        ciphertext_hex,
        mac,
        id: uuid_v4_hex(),
        agent_id: agent_id.to_string(),
    })
}

/// Decrypt an [`EncryptedKey`], returning the hex-encoded private key
/// wrapped so it zeroizes on drop.
pub fn decrypt_private_key(
    encrypted: &EncryptedKey,
    password: &str,
) -> CoreResult<Zeroizing<String>> {
    if encrypted.version != "1" {
        return Err(CoreError::UnsupportedKeystoreVersion(
            encrypted.version.clone(),
        ));
    }

    let salt = hex::decode(&encrypted.salt_hex).map_err(|e| CoreError::InvalidHex(e.to_string()))?;
    let derived = derive_key(password.as_bytes(), &salt)?;

    let expected_mac = compute_mac(&derived, &encrypted.ciphertext_hex);
    if expected_mac != encrypted.mac {
        return Err(CoreError::KeystoreMacMismatch);
    }

    let combined =
        hex::decode(&encrypted.ciphertext_hex).map_err(|e| CoreError::InvalidHex(e.to_string()))?;
    if combined.len() < NONCE_LEN {
        return Err(CoreError::KeystoreDecryptionFailed);
    }
    let (ciphertext_and_tag, nonce_bytes) = combined.split_at(combined.len() - NONCE_LEN);

    let cipher = Aes256Gcm::new_from_slice(&derived[0..32])
        .map_err(|e| CoreError::KeyDerivation(e.to_string()))?;
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext_and_tag)
        .map_err(|_| CoreError::KeystoreDecryptionFailed)?;

    let private_key_hex = String::from_utf8(plaintext).map_err(|_| CoreError::KeystoreDecryptionFailed)?;
    Ok(Zeroizing::new(private_key_hex))
}

fn uuid_v4_hex() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    // Set version/variant bits per RFC 4122 without pulling in the uuid crate here.
    bytes[6] = (bytes[6] & 0x0F) | 0x40;
    bytes[8] = (bytes[8] & 0x3F) | 0x80;
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_succeeds_with_correct_password() {
        let enc = encrypt_private_key("correct horse battery staple", "deadbeef", "agent-1").unwrap();
        let dec = decrypt_private_key(&enc, "correct horse battery staple").unwrap();
        assert_eq!(&*dec, "deadbeef");
    }

    #[test]
    fn wrong_password_fails() {
        let enc = encrypt_private_key("right-password", "deadbeef", "agent-1").unwrap();
        let err = decrypt_private_key(&enc, "wrong-password").unwrap_err();
        assert!(matches!(err, CoreError::KeystoreMacMismatch));
    }

    #[test]
    fn corrupted_ciphertext_fails() {
        let mut enc = encrypt_private_key("right-password", "deadbeef", "agent-1").unwrap();
        let mut bytes = hex::decode(&enc.ciphertext_hex).unwrap();
        bytes[0] ^= 0xFF;
        enc.ciphertext_hex = hex::encode(bytes);
        let err = decrypt_private_key(&enc, "right-password").unwrap_err();
        assert!(matches!(err, CoreError::KeystoreMacMismatch));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut enc = encrypt_private_key("pw", "deadbeef", "agent-1").unwrap();
        enc.version = "2".to_string();
        let err = decrypt_private_key(&enc, "pw").unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedKeystoreVersion(_)));
    }
}
