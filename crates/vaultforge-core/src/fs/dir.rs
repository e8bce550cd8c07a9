//! Initialization of a vault's encrypted root directory.
//!
//! A freshly created vault stores its root under a two-level path inside
//! the data directory, derived from the root's (empty) directory
//! identifier:
//!
//! ```text
//! d/<first 2 chars>/<remaining 30 chars>/dir.c9r   encrypted "{}" metadata
//! d/dirid.c9r                                      encrypted storage name
//! ```
//!
//! Both files are AES-256-GCM sealed under the encryption master key with
//! the layout `nonce (12 bytes) ∥ ciphertext+tag`. Every seal draws a fresh
//! nonce from the OS RNG; nonce reuse under the same key breaks GCM, so
//! nonces are never cached, derived, or reused across retries.

use std::{fs, io, path::Path};

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use thiserror::Error;
use tracing::debug;

use crate::crypto::keys::{KeyAccessError, MasterKey};
use crate::fs::name::{NameError, hash_dir_id};
use crate::vault::path::DirId;

/// Filename of the encrypted metadata document inside a directory's
/// storage path.
pub const DIR_ENTRY_FILENAME: &str = "dir.c9r";

/// Filename of the encrypted root storage name at the data directory's top
/// level; readers use it to check that the directory tree on disk matches
/// the configured master key.
pub const DIR_ID_BACKUP_FILENAME: &str = "dirid.c9r";

const NONCE_LEN: usize = 12;

/// Errors that can occur while initializing the encrypted root.
#[derive(Error, Debug)]
pub enum DirInitError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to derive root storage name: {0}")]
    Name(#[from] NameError),

    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),

    #[error("Failed to serialize directory metadata: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("AEAD encryption failed")]
    Encryption,
}

/// AES-GCM seal `plaintext` under the encryption master key with a fresh
/// random nonce, returning `nonce ∥ ciphertext+tag`.
fn seal(master_key: &MasterKey, plaintext: &[u8]) -> Result<Vec<u8>, DirInitError> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce);

    let ciphertext = master_key
        .with_aes_key(|aes_key| {
            let key: &Key<Aes256Gcm> = aes_key.into();
            let cipher = Aes256Gcm::new(key);
            cipher.encrypt(Nonce::from_slice(&nonce), plaintext)
        })?
        .map_err(|_| DirInitError::Encryption)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Materialize the on-disk layout for the vault's root directory.
///
/// Derives the root storage name from the empty directory identifier,
/// creates the two-level storage path under `data_dir`, writes the sealed
/// empty metadata document into it, and writes the sealed storage name to
/// the data directory's top level.
pub fn initialize_root(data_dir: &Path, master_key: &MasterKey) -> Result<(), DirInitError> {
    let storage_name = hash_dir_id(&DirId::root(), master_key)?;
    let (first_level, second_level) = storage_name.split_at(2);

    let root_storage_path = data_dir.join(first_level).join(second_level);
    fs::create_dir_all(&root_storage_path)?;
    debug!(path = %root_storage_path.display(), "created root storage path");

    // Freshly created directories carry an empty metadata document
    let metadata = serde_json::to_vec(&serde_json::json!({}))?;
    fs::write(
        root_storage_path.join(DIR_ENTRY_FILENAME),
        seal(master_key, &metadata)?,
    )?;

    fs::write(
        data_dir.join(DIR_ID_BACKUP_FILENAME),
        seal(master_key, storage_name.as_bytes())?,
    )?;

    Ok(())
}
