use thiserror::Error;

/// Errors raised by the cryptographic and domain primitives in this crate.
///
/// The API layer maps these onto the HTTP error taxonomy; this crate itself
/// stays transport-agnostic.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("invalid public key: expected 32 bytes, got {0}")]
    InvalidPublicKeyLength(usize),

    #[error("invalid signature: expected 64 bytes, got {0}")]
    InvalidSignatureLength(usize),

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("canonicalization failed: {0}")]
    Canonicalization(String),

    #[error("unsupported keystore version: {0}")]
    UnsupportedKeystoreVersion(String),

    #[error("keystore mac check failed")]
    KeystoreMacMismatch,

    #[error("keystore decryption failed: wrong password or corrupted ciphertext")]
    KeystoreDecryptionFailed,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
