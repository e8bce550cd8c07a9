//! Vault creation.
//!
//! [`VaultCreator`] sequences the whole first-time creation flow: directory
//! layout, master key generation, the masterkey and configuration
//! documents, and the encrypted root. Any failure after the vault directory
//! exists rolls the filesystem back to its pre-call state; a partial vault
//! that looks valid is never left behind.

use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

use crate::{
    crypto::keys::{KeyAccessError, MasterKey},
    fs::dir::{DirInitError, initialize_root},
    vault::{
        config::{
            DEFAULT_SHORTENING_THRESHOLD, VAULT_CONFIG_FILENAME, VaultConfig,
            VaultConfigCreationError, write_vault_config,
        },
        master_key::{MASTERKEY_FILENAME, MasterKeyCreationError, write_masterkey_file},
    },
};

/// Name of the encrypted-data subdirectory inside a vault.
pub const DATA_DIR_NAME: &str = "d";

/// Name of the informational readme placed next to the vault files.
pub const README_FILENAME: &str = "IMPORTANT.rtf";

const README_RTF: &str = r"{\rtf1\ansi\ansicpg1252
{\fonttbl\f0\fswiss\fcharset0 Helvetica;}
\f0\fs24 Welcome to your new encrypted vault!\par
\par
The files in this folder are encrypted. Do not edit, rename or delete\par
them directly, or the vault may become unreadable.\par
\par
To access your data, unlock this vault with a compatible application\par
and the password you chose when creating it.\par
}";

/// Errors that can occur during vault creation.
#[derive(Error, Debug)]
pub enum VaultCreationError {
    /// The target path is occupied. Not retryable without a new path.
    #[error("Directory already exists")]
    AlreadyExists(PathBuf),

    /// Required cryptographic capabilities are missing at call time
    /// (secure memory or RNG initialization failed).
    #[error("Cryptographic backend unavailable: {0}")]
    CryptoUnavailable(#[from] KeyAccessError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to create masterkey file: {0}")]
    Masterkey(#[from] MasterKeyCreationError),

    #[error("Failed to create vault config: {0}")]
    Config(#[from] VaultConfigCreationError),

    #[error("Failed to initialize encrypted root: {0}")]
    RootInit(#[from] DirInitError),
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailurePoint {
    ConfigWrite,
    RootInit,
}

/// Builder for creating new vaults.
///
/// # Example
///
/// ```no_run
/// use vaultforge_core::vault::creator::VaultCreator;
/// use std::path::Path;
///
/// VaultCreator::new(Path::new("/path/to/new/vault"), "my-secure-passphrase")
///     .create()
///     .expect("Failed to create vault");
/// ```
pub struct VaultCreator {
    vault_path: PathBuf,
    passphrase: Zeroizing<String>,
    pepper: Zeroizing<Vec<u8>>,
    vault_id: String,
    shortening_threshold: usize,
    #[cfg(test)]
    fail_at: Option<FailurePoint>,
}

impl VaultCreator {
    /// Create a new `VaultCreator` for the given destination path and
    /// passphrase.
    pub fn new(vault_path: &Path, passphrase: &str) -> Self {
        Self {
            vault_path: vault_path.to_path_buf(),
            passphrase: Zeroizing::new(passphrase.to_string()),
            pepper: Zeroizing::new(Vec::new()),
            vault_id: uuid::Uuid::new_v4().to_string(),
            shortening_threshold: DEFAULT_SHORTENING_THRESHOLD,
            #[cfg(test)]
            fail_at: None,
        }
    }

    /// Set a custom vault ID (defaults to a random UUID).
    ///
    /// Primarily useful for testing or for migrating vaults.
    pub fn with_vault_id(mut self, id: &str) -> Self {
        self.vault_id = id.to_string();
        self
    }

    /// Set a custom shortening threshold (defaults to 220).
    ///
    /// Lower thresholds may be useful for storage backends with strict
    /// path length limits.
    pub fn with_shortening_threshold(mut self, threshold: usize) -> Self {
        self.shortening_threshold = threshold;
        self
    }

    /// Mix a pepper into key derivation (defaults to empty).
    ///
    /// A vault created with a pepper can only be unlocked with the same
    /// pepper; the value is not stored anywhere in the vault.
    pub fn with_pepper(mut self, pepper: &[u8]) -> Self {
        self.pepper = Zeroizing::new(pepper.to_vec());
        self
    }

    /// Create the vault.
    ///
    /// Blocking: key derivation is deliberately expensive and several files
    /// are written. Call it off any latency-sensitive thread. Concurrent
    /// creations targeting the same path must be serialized by the caller;
    /// the later call fails the existence check.
    ///
    /// # Errors
    ///
    /// * `VaultCreationError::AlreadyExists` if the target path exists
    /// * `VaultCreationError::CryptoUnavailable` if secure key storage
    ///   cannot be initialized
    /// * any other failure after the vault directory was created triggers a
    ///   full rollback before the error is returned
    #[instrument(skip_all, fields(vault = %self.vault_path.display()))]
    pub fn create(self) -> Result<(), VaultCreationError> {
        if self.vault_path.exists() {
            return Err(VaultCreationError::AlreadyExists(self.vault_path));
        }

        fs::create_dir_all(&self.vault_path)?;

        if let Err(err) = self.populate() {
            warn!(error = %err, "vault creation failed, rolling back");
            self.rollback();
            return Err(err);
        }

        // Cosmetic; a failure here must not fail or roll back the vault
        if let Err(err) = fs::write(self.vault_path.join(README_FILENAME), README_RTF) {
            warn!(error = %err, "failed to write vault readme, continuing");
        }

        debug!("vault created");
        Ok(())
    }

    /// Run every step past directory creation. The master key is owned by
    /// this call and zeroized on drop, success or failure.
    fn populate(&self) -> Result<(), VaultCreationError> {
        let data_dir = self.vault_path.join(DATA_DIR_NAME);
        fs::create_dir(&data_dir)?;

        let master_key = MasterKey::random()?;
        debug!("generated master key pair");

        write_masterkey_file(
            &self.vault_path.join(MASTERKEY_FILENAME),
            &master_key,
            &self.passphrase,
            &self.pepper,
        )?;
        debug!("wrote masterkey file");

        #[cfg(test)]
        self.injected_failure(FailurePoint::ConfigWrite)?;

        let mut config = VaultConfig::with_id(self.vault_id.clone());
        config.shortening_threshold = self.shortening_threshold as i32;
        write_vault_config(
            &self.vault_path.join(VAULT_CONFIG_FILENAME),
            &config,
            &master_key,
        )?;
        debug!("wrote vault config");

        #[cfg(test)]
        self.injected_failure(FailurePoint::RootInit)?;

        initialize_root(&data_dir, &master_key)?;
        debug!("initialized encrypted root");

        Ok(())
    }

    /// Remove everything created since the call started. A rollback failure
    /// is logged but never masks the triggering error.
    fn rollback(&self) {
        if let Err(err) = fs::remove_dir_all(&self.vault_path) {
            warn!(
                vault = %self.vault_path.display(),
                error = %err,
                "rollback failed to remove partially created vault"
            );
        }
    }

    #[cfg(test)]
    fn injected_failure(&self, point: FailurePoint) -> Result<(), VaultCreationError> {
        if self.fail_at == Some(point) {
            return Err(VaultCreationError::Io(io::Error::other(
                "injected failure",
            )));
        }
        Ok(())
    }
}

/// Create a vault at `path` protected by `passphrase`.
///
/// Boundary wrapper for hosting applications: returns a success flag and a
/// human-readable message instead of a typed error, and never exposes
/// internal error codes. The message is empty on success.
pub fn create_vault(path: &Path, passphrase: &str) -> (bool, String) {
    match VaultCreator::new(path, passphrase).create() {
        Ok(()) => (true, String::new()),
        Err(err) => (false, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_vault_creation() {
        let temp_dir = TempDir::new().unwrap();
        let vault_path = temp_dir.path().join("test_vault");

        VaultCreator::new(&vault_path, "test-password")
            .create()
            .expect("Failed to create vault");

        assert!(vault_path.join(VAULT_CONFIG_FILENAME).exists());
        assert!(vault_path.join(MASTERKEY_FILENAME).exists());
        assert!(vault_path.join(DATA_DIR_NAME).is_dir());
        assert!(vault_path.join(README_FILENAME).exists());
    }

    #[test]
    fn test_vault_already_exists() {
        let temp_dir = TempDir::new().unwrap();
        let vault_path = temp_dir.path().join("existing_vault");

        VaultCreator::new(&vault_path, "password")
            .create()
            .expect("Failed to create vault");

        let result = VaultCreator::new(&vault_path, "password").create();
        assert!(matches!(
            result,
            Err(VaultCreationError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_already_exists_even_for_plain_file() {
        let temp_dir = TempDir::new().unwrap();
        let vault_path = temp_dir.path().join("occupied");
        fs::write(&vault_path, b"not a vault").unwrap();

        let result = VaultCreator::new(&vault_path, "password").create();
        assert!(matches!(
            result,
            Err(VaultCreationError::AlreadyExists(_))
        ));
        // The occupying file is untouched
        assert_eq!(fs::read(&vault_path).unwrap(), b"not a vault");
    }

    #[test]
    fn test_rollback_on_config_write_failure() {
        let temp_dir = TempDir::new().unwrap();
        let vault_path = temp_dir.path().join("doomed_vault");

        let mut creator = VaultCreator::new(&vault_path, "password");
        creator.fail_at = Some(FailurePoint::ConfigWrite);

        let result = creator.create();
        assert!(result.is_err());
        assert!(
            !vault_path.exists(),
            "failed creation must leave no trace behind"
        );
    }

    #[test]
    fn test_rollback_on_root_init_failure() {
        let temp_dir = TempDir::new().unwrap();
        let vault_path = temp_dir.path().join("doomed_vault");

        let mut creator = VaultCreator::new(&vault_path, "password");
        creator.fail_at = Some(FailurePoint::RootInit);

        let result = creator.create();
        assert!(result.is_err());
        assert!(!vault_path.exists());
    }

    #[test]
    fn test_create_vault_wrapper_messages() {
        let temp_dir = TempDir::new().unwrap();
        let vault_path = temp_dir.path().join("wrapped_vault");

        let (ok, message) = create_vault(&vault_path, "password");
        assert!(ok);
        assert!(message.is_empty());

        let (ok, message) = create_vault(&vault_path, "password");
        assert!(!ok);
        assert_eq!(message, "Directory already exists");
    }

    #[test]
    fn test_vault_with_custom_id() {
        let temp_dir = TempDir::new().unwrap();
        let vault_path = temp_dir.path().join("custom_id_vault");
        let custom_id = "my-custom-vault-id";

        VaultCreator::new(&vault_path, "password")
            .with_vault_id(custom_id)
            .create()
            .expect("Failed to create vault");

        let jwt = fs::read_to_string(vault_path.join(VAULT_CONFIG_FILENAME)).unwrap();
        let parts: Vec<&str> = jwt.split('.').collect();
        let claims = data_encoding::BASE64URL_NOPAD
            .decode(parts[1].as_bytes())
            .unwrap();
        let claims_str = String::from_utf8(claims).unwrap();
        assert!(claims_str.contains(custom_id));
    }

    #[test]
    fn test_vault_with_custom_shortening_threshold() {
        let temp_dir = TempDir::new().unwrap();
        let vault_path = temp_dir.path().join("custom_threshold_vault");

        VaultCreator::new(&vault_path, "password")
            .with_shortening_threshold(100)
            .create()
            .expect("Failed to create vault");

        let jwt = fs::read_to_string(vault_path.join(VAULT_CONFIG_FILENAME)).unwrap();
        let parts: Vec<&str> = jwt.split('.').collect();
        let claims = data_encoding::BASE64URL_NOPAD
            .decode(parts[1].as_bytes())
            .unwrap();
        let claims_str = String::from_utf8(claims).unwrap();
        assert!(claims_str.contains("\"shorteningThreshold\":100"));
    }
}
