//! Derivation of on-disk storage names from directory identifiers.

use aes_siv::{KeyInit, siv::Aes256Siv};
use data_encoding::BASE32_NOPAD;
use ring::digest;
use thiserror::Error;

use crate::crypto::keys::{KeyAccessError, MasterKey};
use crate::vault::path::DirId;

/// Errors that can occur while deriving a directory's storage name.
#[derive(Error, Debug)]
pub enum NameError {
    /// AES-SIV encryption of the directory ID failed unexpectedly.
    #[error("Failed to derive storage name for directory '{dir_id}': encryption error")]
    DirIdHashFailed { dir_id: String },

    /// Key access failed due to a memory protection error or lock poisoning.
    #[error("Key access failed: {0}")]
    KeyAccess(#[from] KeyAccessError),
}

/// Derive the opaque on-disk storage name for a directory identifier.
///
/// The name is computed as:
/// 1. AES-SIV encrypt the raw identifier bytes, no associated data. The
///    SIV key order is MAC key ∥ AES key — the reverse of the vault config
///    signing key; swapping the halves silently derives different names
///    that no compliant reader will find.
/// 2. SHA-1 the ciphertext (160 bits).
/// 3. Encode the digest as unpadded RFC 4648 Base32, yielding exactly 32
///    characters.
///
/// Deterministic: the same identifier under the same keys always maps to
/// the same name, which is how independent readers and writers agree on a
/// directory's location with no shared state beyond the master keys.
pub fn hash_dir_id(dir_id: &DirId, master_key: &MasterKey) -> Result<String, NameError> {
    master_key.with_siv_key(|key| {
        let mut cipher = Aes256Siv::new(key);

        let associated_data: &[&[u8]] = &[];
        let encrypted = cipher
            .encrypt(associated_data, dir_id.as_str().as_bytes())
            .map_err(|_| NameError::DirIdHashFailed {
                dir_id: dir_id.to_string(),
            })?;

        let hashed = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &encrypted);
        Ok(BASE32_NOPAD.encode(hashed.as_ref()))
    })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_name_shape() {
        let master_key = MasterKey::random().unwrap();
        let name = hash_dir_id(&DirId::root(), &master_key).unwrap();

        // 20-byte SHA-1 digest -> 32 unpadded Base32 characters
        assert_eq!(name.len(), 32);
        assert!(!name.contains('='));
        assert!(
            name.chars()
                .all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c))
        );
    }

    #[test]
    fn test_deterministic() {
        let master_key = MasterKey::new([5u8; 32], [6u8; 32]).unwrap();

        let a = hash_dir_id(&DirId::root(), &master_key).unwrap();
        let b = hash_dir_id(&DirId::root(), &master_key).unwrap();
        assert_eq!(a, b);

        let id = DirId::from_raw("550e8400-e29b-41d4-a716-446655440000");
        let c = hash_dir_id(&id, &master_key).unwrap();
        let d = hash_dir_id(&id, &master_key).unwrap();
        assert_eq!(c, d);
        assert_ne!(a, c);
    }

    #[test]
    fn test_name_depends_on_both_keys() {
        let base = MasterKey::new([5u8; 32], [6u8; 32]).unwrap();
        let other_aes = MasterKey::new([7u8; 32], [6u8; 32]).unwrap();
        let other_mac = MasterKey::new([5u8; 32], [8u8; 32]).unwrap();

        let name = hash_dir_id(&DirId::root(), &base).unwrap();
        assert_ne!(name, hash_dir_id(&DirId::root(), &other_aes).unwrap());
        assert_ne!(name, hash_dir_id(&DirId::root(), &other_mac).unwrap());
    }

    #[test]
    fn test_key_order_is_load_bearing() {
        // Swapping AES and MAC keys feeds AES-SIV a different combined key
        let forward = MasterKey::new([5u8; 32], [6u8; 32]).unwrap();
        let reversed = MasterKey::new([6u8; 32], [5u8; 32]).unwrap();

        let a = hash_dir_id(&DirId::root(), &forward).unwrap();
        let b = hash_dir_id(&DirId::root(), &reversed).unwrap();
        assert_ne!(a, b);
    }
}
