//! Vault-level documents and the creation flow

use std::io::{self, Write};
use std::path::Path;

pub mod config;
pub mod creator;
pub mod master_key;
pub mod path;

/// Vault format version written into every new vault. The masterkey file's
/// version MAC is computed over its big-endian 4-byte encoding.
pub const VAULT_FORMAT: u32 = 8;

/// Atomically persist `contents` at `path`: write to a temporary file in
/// the target's directory, then rename into place. A partially written
/// file is never visible at the final path.
pub(crate) fn persist_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::other("target path has no parent directory"))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

// Re-export commonly used types
pub use config::{
    CipherCombo, ClaimValidationError, DEFAULT_SHORTENING_THRESHOLD, MasterKeyExtractionError,
    VAULT_CONFIG_FILENAME, VaultConfig, VaultConfigCreationError, VaultConfigurationClaims,
    create_vault_config, extract_master_key, extract_master_key_with_pepper,
    validate_vault_claims, write_vault_config,
};
pub use creator::{
    DATA_DIR_NAME, README_FILENAME, VaultCreationError, VaultCreator, create_vault,
};
pub use master_key::{
    MASTERKEY_FILENAME, MasterKeyCreationError, MasterKeyFile, create_masterkey_file,
    create_masterkey_file_with_pepper, write_masterkey_file,
};
pub use path::DirId;
