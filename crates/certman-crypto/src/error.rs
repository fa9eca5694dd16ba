//! Crypto error types.

/// Errors from certificate and bundle operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("Certificate parse error: {0}")]
    Certificate(String),

    #[error("Certificate generation error: {0}")]
    Generation(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
