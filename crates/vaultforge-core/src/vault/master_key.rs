//! The `masterkey.cryptomator` document: scrypt-based KEK derivation,
//! RFC 3394 wrapping of the two master keys, and the version MAC.

use std::path::Path;

use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use secrecy::SecretBox;
use thiserror::Error;
use zeroize::Zeroizing;

use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;
use unicode_normalization::UnicodeNormalization;

use crate::crypto::{
    CryptoError, key_wrap,
    keys::{KeyAccessError, MasterKey},
};
use crate::vault::{VAULT_FORMAT, persist_atomically};

/// Filename of the master key document inside a vault.
pub const MASTERKEY_FILENAME: &str = "masterkey.cryptomator";

/// Default scrypt parameters for new vaults:
/// salt 8 bytes, N = 2^15, r = 8, p = 1, 32-byte output.
const DEFAULT_SCRYPT_SALT_LENGTH: usize = 8;
const DEFAULT_SCRYPT_COST_PARAM_LOG2: u8 = 15; // 2^15 = 32768
const DEFAULT_SCRYPT_BLOCK_SIZE: u32 = 8;
const DEFAULT_SCRYPT_PARALLELIZATION: u32 = 1;

/// Fast scrypt cost parameter for test runs (N = 2^10).
///
/// Roughly 32x faster than the default. Enabled by setting the
/// `VAULTFORGE_FAST_KDF` environment variable to `1`; never use it for
/// vaults that are meant to hold data.
const FAST_SCRYPT_COST_PARAM_LOG2: u8 = 10;

fn is_fast_kdf_enabled() -> bool {
    std::env::var("VAULTFORGE_FAST_KDF")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn scrypt_cost_param_log2() -> u8 {
    if is_fast_kdf_enabled() {
        FAST_SCRYPT_COST_PARAM_LOG2
    } else {
        DEFAULT_SCRYPT_COST_PARAM_LOG2
    }
}

/// Errors that can occur when creating a master key file.
#[derive(Error, Debug)]
pub enum MasterKeyCreationError {
    #[error("RNG failed: {0}")]
    Rng(String),

    #[error("Invalid scrypt parameters: {0}")]
    InvalidScryptParams(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Key wrap failed: {0}")]
    KeyWrap(#[from] key_wrap::WrapError),

    #[error("JSON serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Derive a key encryption key from a passphrase via scrypt.
///
/// The passphrase is NFC-normalized first, so both Unicode spellings of the
/// same password derive the same KEK. The effective salt is `salt ∥ pepper`;
/// the pepper may be empty. Deterministic: identical inputs always produce
/// the same KEK, which is what lets a later unlock reconstruct it from the
/// stored salt.
pub(crate) fn derive_kek(
    passphrase: &str,
    salt: &[u8],
    pepper: &[u8],
    log2_n: u8,
    r: u32,
    p: u32,
) -> Result<SecretBox<[u8; 32]>, CryptoError> {
    let normalized_passphrase = Zeroizing::new(passphrase.nfc().collect::<String>());

    let scrypt_params = scrypt::Params::new(log2_n, r, p, 32).map_err(|e| {
        CryptoError::InvalidScryptParams(format!(
            "Invalid scrypt parameters (N=2^{log2_n}, r={r}, p={p}): {e}"
        ))
    })?;

    let mut salt_and_pepper = Zeroizing::new(Vec::with_capacity(salt.len() + pepper.len()));
    salt_and_pepper.extend_from_slice(salt);
    salt_and_pepper.extend_from_slice(pepper);

    let mut kek = Zeroizing::new([0u8; 32]);
    scrypt::scrypt(
        normalized_passphrase.as_bytes(),
        &salt_and_pepper,
        &scrypt_params,
        &mut kek[..],
    )
    .map_err(|e| CryptoError::KeyDerivationFailed(format!("Scrypt derivation failed: {e}")))?;

    Ok(SecretBox::new(Box::new(*kek)))
}

/// The persisted master key document (`masterkey.cryptomator`).
///
/// Contains the two master keys wrapped under a KEK derived from the user's
/// passphrase, plus the scrypt parameters needed to re-derive that KEK and
/// an HMAC binding the format version to the MAC key.
#[serde_as]
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterKeyFile {
    /// Vault format version; the MAC below is computed over its big-endian
    /// 4-byte encoding.
    pub version: u32,

    /// Salt for scrypt key derivation (8 bytes for new vaults).
    #[serde_as(as = "Base64")]
    pub scrypt_salt: Vec<u8>,

    /// Scrypt cost parameter N, a power of 2. New vaults use 32768 (2^15).
    pub scrypt_cost_param: i32,

    /// Scrypt block size parameter r. New vaults use 8.
    pub scrypt_block_size: i32,

    /// The wrapped (RFC 3394) AES encryption master key.
    #[serde_as(as = "Base64")]
    pub primary_master_key: Vec<u8>,

    /// The wrapped (RFC 3394) MAC master key.
    #[serde_as(as = "Base64")]
    pub hmac_master_key: Vec<u8>,

    /// HMAC-SHA256 of the big-endian format version under the MAC key.
    #[serde_as(as = "Base64")]
    pub version_mac: Vec<u8>,
}

impl MasterKeyFile {
    /// Derive the KEK for this file from a passphrase (empty pepper).
    pub fn derive_key(&self, passphrase: &str) -> Result<SecretBox<[u8; 32]>, CryptoError> {
        self.derive_key_with_pepper(passphrase, &[])
    }

    /// Derive the KEK for this file from a passphrase and pepper, using the
    /// scrypt parameters stored in the file.
    pub fn derive_key_with_pepper(
        &self,
        passphrase: &str,
        pepper: &[u8],
    ) -> Result<SecretBox<[u8; 32]>, CryptoError> {
        if self.scrypt_cost_param <= 1 {
            return Err(CryptoError::InvalidScryptParams(format!(
                "scrypt cost parameter must be a power of 2 greater than 1, got {}",
                self.scrypt_cost_param
            )));
        }
        let log2_n = log_2(self.scrypt_cost_param) as u8;
        let r = self.scrypt_block_size as u32;
        derive_kek(
            passphrase,
            &self.scrypt_salt,
            pepper,
            log2_n,
            r,
            DEFAULT_SCRYPT_PARALLELIZATION,
        )
    }

    /// Unlock the master keys with a passphrase (empty pepper).
    ///
    /// # Errors
    ///
    /// - `CryptoError::KeyUnwrapIntegrityFailed`: wrong passphrase or
    ///   tampered wrapped keys
    /// - `CryptoError::HmacVerificationFailed`: keys unwrapped but the
    ///   stored version MAC does not verify (format version tampered)
    pub fn unlock(&self, passphrase: &str) -> Result<MasterKey, CryptoError> {
        self.unlock_with_pepper(passphrase, &[])
    }

    /// Unlock the master keys with a passphrase and pepper.
    pub fn unlock_with_pepper(
        &self,
        passphrase: &str,
        pepper: &[u8],
    ) -> Result<MasterKey, CryptoError> {
        let kek = self.derive_key_with_pepper(passphrase, pepper)?;
        self.unlock_with_kek(&kek)
    }

    fn unlock_with_kek(&self, kek: &SecretBox<[u8; 32]>) -> Result<MasterKey, CryptoError> {
        // Unwrap the encryption key first, then the MAC key; unwrap failure
        // here is the wrong-password signal.
        let aes_key = key_wrap::unwrap_key(&self.primary_master_key, kek)?;
        let aes_key: [u8; 32] =
            aes_key
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: 32,
                    actual: aes_key.len(),
                })?;

        let mac_key = key_wrap::unwrap_key(&self.hmac_master_key, kek)?;
        let mac_key: [u8; 32] =
            mac_key
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: 32,
                    actual: mac_key.len(),
                })?;

        // With both keys unwrapped, a failing version MAC is tampering, not
        // a wrong password.
        self.check_version_mac(&mac_key)?;

        MasterKey::new(aes_key, mac_key).map_err(CryptoError::from)
    }

    /// Verify the version MAC over the big-endian 4-byte format version.
    fn check_version_mac(&self, mac_key: &[u8; 32]) -> Result<(), CryptoError> {
        let key = hmac::Key::new(hmac::HMAC_SHA256, mac_key);
        hmac::verify(&key, &self.version.to_be_bytes(), &self.version_mac)
            .map_err(|_| CryptoError::HmacVerificationFailed)
    }
}

const fn num_bits<T>() -> usize {
    std::mem::size_of::<T>() * 8
}

fn log_2(x: i32) -> u32 {
    assert!(x > 0);
    num_bits::<i32>() as u32 - x.leading_zeros() - 1
}

/// Build the master key file content with default parameters (no pepper).
pub fn create_masterkey_file(
    master_key: &MasterKey,
    passphrase: &str,
) -> Result<String, MasterKeyCreationError> {
    create_masterkey_file_with_pepper(master_key, passphrase, &[])
}

/// Build the master key file content, mixing a pepper into key derivation.
///
/// Generates a fresh 8-byte salt, derives the KEK, wraps both master keys
/// under it, computes the version MAC, and serializes the document to JSON.
/// The KEK exists only inside this call.
pub fn create_masterkey_file_with_pepper(
    master_key: &MasterKey,
    passphrase: &str,
    pepper: &[u8],
) -> Result<String, MasterKeyCreationError> {
    use crate::crypto::key_wrap::wrap_key;

    let mut salt = vec![0u8; DEFAULT_SCRYPT_SALT_LENGTH];
    SystemRandom::new()
        .fill(&mut salt)
        .map_err(|_| MasterKeyCreationError::Rng("Failed to generate salt".to_string()))?;

    let log2_n = scrypt_cost_param_log2();
    let r = DEFAULT_SCRYPT_BLOCK_SIZE;
    let p = DEFAULT_SCRYPT_PARALLELIZATION;

    let kek = derive_kek(passphrase, &salt, pepper, log2_n, r, p).map_err(|e| match e {
        CryptoError::InvalidScryptParams(msg) => MasterKeyCreationError::InvalidScryptParams(msg),
        other => MasterKeyCreationError::KeyDerivation(other.to_string()),
    })?;

    // Wrap the encryption key first, then the MAC key
    let wrapped_aes = master_key.with_aes_key(|key| wrap_key(key, &kek))??;
    let wrapped_mac = master_key.with_mac_key(|key| wrap_key(key, &kek))??;

    let version_mac = master_key.with_mac_key(|key| {
        let hmac_key = hmac::Key::new(hmac::HMAC_SHA256, key);
        let tag = hmac::sign(&hmac_key, &VAULT_FORMAT.to_be_bytes());
        tag.as_ref().to_vec()
    })?;

    let masterkey_file = MasterKeyFile {
        version: VAULT_FORMAT,
        scrypt_salt: salt,
        scrypt_cost_param: 1i32 << log2_n,
        scrypt_block_size: r as i32,
        primary_master_key: wrapped_aes,
        hmac_master_key: wrapped_mac,
        version_mac,
    };

    Ok(serde_json::to_string_pretty(&masterkey_file)?)
}

/// Build and atomically persist the master key file.
///
/// The document is written to a temporary file next to the target and
/// renamed into place, so a partially written file is never visible at the
/// final path.
pub fn write_masterkey_file(
    path: &Path,
    master_key: &MasterKey,
    passphrase: &str,
    pepper: &[u8],
) -> Result<(), MasterKeyCreationError> {
    let content = create_masterkey_file_with_pepper(master_key, passphrase, pepper)?;
    persist_atomically(path, content.as_bytes())?;
    Ok(())
}
