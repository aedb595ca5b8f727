//! Ed25519 signing/verification and SHA-256 hashing over canonical bytes.

use crate::error::{CoreError, CoreResult};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

/// SHA-256 digest of `bytes`, rendered as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Decode a lowercase-hex string into raw bytes, rejecting anything that
/// isn't exactly `expected_len` bytes once decoded.
pub fn decode_hex_fixed(s: &str, expected_len: usize) -> CoreResult<Vec<u8>> {
    let bytes = hex::decode(s).map_err(|e| CoreError::InvalidHex(e.to_string()))?;
    if bytes.len() != expected_len {
        return Err(CoreError::InvalidHex(format!(
            "expected {} bytes, got {}",
            expected_len,
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Parse a 32-byte Ed25519 public key from hex.
pub fn parse_public_key(hex_str: &str) -> CoreResult<VerifyingKey> {
    let bytes = decode_hex_fixed(hex_str, 32).map_err(|_| {
        CoreError::InvalidPublicKeyLength(hex::decode(hex_str).map(|b| b.len()).unwrap_or(0))
    })?;
    let arr: [u8; 32] = bytes.try_into().expect("checked length above");
    VerifyingKey::from_bytes(&arr).map_err(|_| CoreError::InvalidPublicKeyLength(32))
}

/// Parse a 32-byte Ed25519 private (signing) key from hex.
pub fn parse_signing_key(hex_str: &str) -> CoreResult<SigningKey> {
    let bytes = decode_hex_fixed(hex_str, 32)?;
    let arr: [u8; 32] = bytes.try_into().expect("checked length above");
    Ok(SigningKey::from_bytes(&arr))
}

/// Sign `message` (already-canonical bytes) with `signing_key`, returning a
/// 64-byte signature.
pub fn sign(message: &[u8], signing_key: &SigningKey) -> [u8; 64] {
    signing_key.sign(message).to_bytes()
}

/// Verify a 64-byte signature over `message` under `public_key`.
///
/// Uses `verify_strict`, which additionally rejects non-canonical signature
/// encodings (the cofactor/malleability class of Ed25519 weak-key attacks),
/// not just forged ones.
pub fn verify(signature: &[u8], message: &[u8], public_key: &VerifyingKey) -> CoreResult<bool> {
    let sig_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| CoreError::InvalidSignatureLength(signature.len()))?;
    let sig = Signature::from_bytes(&sig_bytes);
    Ok(public_key.verify_strict(message, &sig).is_ok())
}

/// Verify a hex-encoded signature over `message` under a hex-encoded public key.
pub fn verify_hex(signature_hex: &str, message: &[u8], public_key_hex: &str) -> CoreResult<bool> {
    let sig_bytes = decode_hex_fixed(signature_hex, 64)?;
    let public_key = parse_public_key(public_key_hex)?;
    verify(&sig_bytes, message, &public_key)
}

/// Derive the agent identifier (lowercase hex SHA-256) from a raw public key.
pub fn agent_id_from_public_key(public_key_hex: &str) -> CoreResult<String> {
    let raw = decode_hex_fixed(public_key_hex, 32)
        .map_err(|_| CoreError::InvalidPublicKeyLength(public_key_hex.len() / 2))?;
    Ok(sha256_hex(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn keypair() -> SigningKey {
        SigningKey::generate(&mut OsRng)
    }

    #[test]
    fn sign_verify_roundtrip() {
        let sk = keypair();
        let vk = sk.verifying_key();
        let msg = b"canonical bytes";
        let sig = sign(msg, &sk);
        assert!(verify(&sig, msg, &vk).unwrap());
    }

    #[test]
    fn flipping_message_byte_fails_verification() {
        let sk = keypair();
        let vk = sk.verifying_key();
        let mut msg = b"canonical bytes".to_vec();
        let sig = sign(&msg, &sk);
        msg[0] ^= 0xFF;
        assert!(!verify(&sig, &msg, &vk).unwrap());
    }

    #[test]
    fn flipping_signature_byte_fails_verification() {
        let sk = keypair();
        let vk = sk.verifying_key();
        let msg = b"canonical bytes";
        let mut sig = sign(msg, &sk);
        sig[0] ^= 0xFF;
        assert!(!verify(&sig, msg, &vk).unwrap());
    }

    #[test]
    fn agent_id_is_sha256_of_public_key() {
        let sk = keypair();
        let pk_hex = hex::encode(sk.verifying_key().to_bytes());
        let expected = sha256_hex(&hex::decode(&pk_hex).unwrap());
        assert_eq!(agent_id_from_public_key(&pk_hex).unwrap(), expected);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use ed25519_dalek::Signer;
    use proptest::prelude::*;
    use rand::rngs::OsRng;

    proptest! {
        /// Any message signs and verifies under its own keypair, and flipping
        /// any single byte of either the message or the signature always
        /// breaks verification — the "flipping any byte" round-trip law.
        #[test]
        fn sign_verify_holds_and_breaks_under_any_single_bit_flip(
            msg in prop::collection::vec(any::<u8>(), 1..256),
            flip_msg_byte in any::<usize>(),
            flip_sig_byte in any::<usize>(),
        ) {
            let sk = SigningKey::generate(&mut OsRng);
            let vk = sk.verifying_key();
            let sig = sk.sign(&msg).to_bytes();
            prop_assert!(verify(&sig, &msg, &vk).unwrap());

            let mut tampered_msg = msg.clone();
            let i = flip_msg_byte % tampered_msg.len();
            tampered_msg[i] ^= 0xFF;
            prop_assert!(!verify(&sig, &tampered_msg, &vk).unwrap());

            let mut tampered_sig = sig;
            let j = flip_sig_byte % tampered_sig.len();
            tampered_sig[j] ^= 0xFF;
            prop_assert!(!verify(&tampered_sig, &msg, &vk).unwrap());
        }
    }
}
