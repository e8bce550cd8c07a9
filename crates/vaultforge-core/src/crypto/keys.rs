use std::sync::RwLock;

use generic_array::{GenericArray, typenum::U64};
use memsafe::MemSafe;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroize;

/// Error type for key access operations.
///
/// Raised when protected key material cannot be reached, either because a
/// memory protection syscall failed or because a thread panicked while
/// holding the key lock.
#[derive(Debug, Error)]
pub enum KeyAccessError {
    /// Memory protection operation failed (mlock, mprotect, etc.)
    #[error("Memory protection operation failed: {0}")]
    MemoryProtection(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Lock was poisoned (a thread panicked while holding it)
    #[error("Key lock was poisoned")]
    LockPoisoned,
}

impl KeyAccessError {
    /// Create a memory protection error from any error type.
    pub fn memory_protection<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        KeyAccessError::MemoryProtection(Box::new(err))
    }
}

/// Error type for JWT validation against the master key.
#[derive(Debug, Error)]
pub enum JwtValidationError {
    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),

    #[error("JWT validation failed: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),
}

/// The vault's master key pair: a 256-bit AES encryption key and a 256-bit
/// MAC key, 512 bits of key material in total.
///
/// # Security
///
/// Both keys live in `memsafe::MemSafe` containers: pinned in RAM via
/// `mlock`, protected with `mprotect(PROT_NONE)` while not in use, excluded
/// from core dumps on Linux, and zeroed on drop. The fields are private;
/// all access goes through scoped `with_*` methods that elevate memory
/// permissions only for the duration of a callback and wipe any transient
/// combined-key buffers afterwards.
///
/// Two combined-key orderings exist and must not be confused:
/// - [`with_raw_key`](Self::with_raw_key): AES key ∥ MAC key — the vault
///   config signing key.
/// - [`with_siv_key`](Self::with_siv_key): MAC key ∥ AES key — the AES-SIV
///   cipher key for directory identifiers.
#[derive(Debug)]
pub struct MasterKey {
    aes_master_key: RwLock<MemSafe<[u8; 32]>>,
    mac_master_key: RwLock<MemSafe<[u8; 32]>>,
}

impl MasterKey {
    /// Generate a new random master key pair from the OS secure RNG.
    ///
    /// # Errors
    ///
    /// Returns a `KeyAccessError` if memory protection initialization fails,
    /// e.g. when the system's mlock limit is exceeded.
    pub fn random() -> Result<Self, KeyAccessError> {
        let mut aes_master_key = [0u8; 32];
        let mut mac_master_key = [0u8; 32];
        rand::rng().fill_bytes(&mut aes_master_key);
        rand::rng().fill_bytes(&mut mac_master_key);
        Self::new(aes_master_key, mac_master_key)
    }

    /// Create a master key pair from raw key material.
    ///
    /// The arrays are copied into locked memory; the caller is responsible
    /// for zeroing its own copies if they are long-lived.
    pub fn new(aes_key: [u8; 32], mac_key: [u8; 32]) -> Result<Self, KeyAccessError> {
        Ok(MasterKey {
            aes_master_key: RwLock::new(
                MemSafe::new(aes_key).map_err(KeyAccessError::memory_protection)?,
            ),
            mac_master_key: RwLock::new(
                MemSafe::new(mac_key).map_err(KeyAccessError::memory_protection)?,
            ),
        })
    }

    /// Execute a function with the combined 512-bit key, AES key first.
    ///
    /// This ordering (AES ∥ MAC) is the signing key for the vault
    /// configuration JWT. The combined buffer is zeroed when the callback
    /// returns; the callback cannot retain a reference to it.
    pub fn with_raw_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&[u8]) -> R,
    {
        struct ZeroOnDrop([u8; 64]);
        impl Drop for ZeroOnDrop {
            fn drop(&mut self) {
                self.0.zeroize();
            }
        }

        let mut key = ZeroOnDrop([0u8; 64]);

        {
            let mut lock = self
                .aes_master_key
                .write()
                .map_err(|_| KeyAccessError::LockPoisoned)?;
            let guard = lock.read().map_err(KeyAccessError::memory_protection)?;
            key.0[..32].copy_from_slice(&*guard);
        }
        {
            let mut lock = self
                .mac_master_key
                .write()
                .map_err(|_| KeyAccessError::LockPoisoned)?;
            let guard = lock.read().map_err(KeyAccessError::memory_protection)?;
            key.0[32..].copy_from_slice(&*guard);
        }

        Ok(f(&key.0))
    }

    /// Execute a function with access to just the AES encryption key.
    pub fn with_aes_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&[u8; 32]) -> R,
    {
        let mut lock = self
            .aes_master_key
            .write()
            .map_err(|_| KeyAccessError::LockPoisoned)?;
        let guard = lock.read().map_err(KeyAccessError::memory_protection)?;
        Ok(f(&guard))
    }

    /// Execute a function with access to just the MAC key.
    pub fn with_mac_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&[u8; 32]) -> R,
    {
        let mut lock = self
            .mac_master_key
            .write()
            .map_err(|_| KeyAccessError::LockPoisoned)?;
        let guard = lock.read().map_err(KeyAccessError::memory_protection)?;
        Ok(f(&guard))
    }

    /// Execute a function with both keys in AES-SIV order (MAC ∥ AES).
    ///
    /// AES-SIV keys the S2V (MAC) half first, so the ordering here is the
    /// reverse of [`with_raw_key`](Self::with_raw_key). The combined buffer
    /// is zeroed after the callback completes.
    pub fn with_siv_key<F, R>(&self, f: F) -> Result<R, KeyAccessError>
    where
        F: FnOnce(&GenericArray<u8, U64>) -> R,
    {
        // GenericArray doesn't implement DefaultIsZeroes, hence the wrapper
        struct ZeroizeOnDrop(GenericArray<u8, U64>);
        impl Drop for ZeroizeOnDrop {
            fn drop(&mut self) {
                self.0.zeroize();
            }
        }

        let mut key = ZeroizeOnDrop(GenericArray::<u8, U64>::default());

        {
            let mut lock = self
                .mac_master_key
                .write()
                .map_err(|_| KeyAccessError::LockPoisoned)?;
            let guard = lock.read().map_err(KeyAccessError::memory_protection)?;
            key.0[..32].copy_from_slice(&*guard);
        }
        {
            let mut lock = self
                .aes_master_key
                .write()
                .map_err(|_| KeyAccessError::LockPoisoned)?;
            let guard = lock.read().map_err(KeyAccessError::memory_protection)?;
            key.0[32..].copy_from_slice(&*guard);
        }

        Ok(f(&key.0))
    }

    /// Create a JWT encoding key for signing the vault configuration.
    ///
    /// Note that `jsonwebtoken` copies the key material internally and does
    /// not zeroize it; keep the returned key short-lived.
    pub fn create_jwt_encoding_key(&self) -> Result<jsonwebtoken::EncodingKey, KeyAccessError> {
        self.with_raw_key(jsonwebtoken::EncodingKey::from_secret)
    }

    /// Validate and decode a JWT signed with the combined master key.
    ///
    /// Creates a temporary `DecodingKey` inside the scoped key access, so
    /// unprotected key material exists only for the duration of the decode.
    pub fn validate_jwt<T>(
        &self,
        token: &str,
        validation: &jsonwebtoken::Validation,
    ) -> Result<T, JwtValidationError>
    where
        T: serde::de::DeserializeOwned,
    {
        let jwt_result = self.with_raw_key(|key_bytes| {
            let decoding_key = jsonwebtoken::DecodingKey::from_secret(key_bytes);
            jsonwebtoken::decode::<T>(token, &decoding_key, validation)
                .map(|token_data| token_data.claims)
        })?;
        jwt_result.map_err(JwtValidationError::from)
    }
}
