//! Cryptographic primitives for vault creation

pub mod key_wrap;
pub mod keys;

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
///
/// Integrity violations (failed unwrap checksum, failed version MAC) mean
/// tampering, corruption, or a wrong key, and must never be silently
/// recovered from. The remaining variants are parameter or system errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The wrapped master key's integrity check failed during unwrapping.
    ///
    /// The wrong KEK was derived (typically a wrong passphrase) or the
    /// wrapped key was tampered with.
    #[error("Key unwrap integrity check failed - wrong passphrase or tampered key material")]
    KeyUnwrapIntegrityFailed,

    /// The version MAC did not verify after a successful unwrap.
    ///
    /// Distinct from [`CryptoError::KeyUnwrapIntegrityFailed`]: the keys
    /// unwrapped cleanly, so the passphrase was right, but the persisted
    /// format version does not match the MAC bound to it.
    #[error("Version MAC verification failed - masterkey file tampered")]
    HmacVerificationFailed,

    /// Key derivation failed, typically a scrypt computation error.
    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// Invalid scrypt parameters in the master key file.
    #[error("Invalid scrypt parameters: {0}")]
    InvalidScryptParams(String),

    /// The ciphertext length is invalid for AES key unwrapping.
    #[error("Invalid ciphertext length for key unwrap")]
    InvalidCiphertextLength,

    /// Array conversion failed due to unexpected length.
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Key access failed due to a memory protection error or lock poisoning.
    #[error("Key access failed: {0}")]
    KeyAccess(#[from] keys::KeyAccessError),
}

impl From<key_wrap::UnwrapError> for CryptoError {
    fn from(err: key_wrap::UnwrapError) -> Self {
        match err {
            key_wrap::UnwrapError::InvalidCiphertextLength
            | key_wrap::UnwrapError::CiphertextTooShort => CryptoError::InvalidCiphertextLength,
            key_wrap::UnwrapError::InvalidIntegrityCheck => CryptoError::KeyUnwrapIntegrityFailed,
        }
    }
}

// Re-export commonly used types
pub use keys::{KeyAccessError, MasterKey};
