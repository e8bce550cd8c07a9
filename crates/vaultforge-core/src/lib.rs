#![forbid(unsafe_code)]

//! Core engine for creating Cryptomator-format-8 compatible vaults.
//!
//! The entry point is [`vault::creator::VaultCreator`] (or the
//! [`vault::creator::create_vault`] boundary wrapper): given a destination
//! path and a passphrase it generates the master key pair, persists the
//! wrapped-key and signed-configuration documents, and initializes the
//! encrypted root directory — atomically, with full rollback on failure.

pub mod crypto;
pub mod fs;
pub mod vault;

pub use crypto::keys::MasterKey;
pub use vault::creator::{VaultCreationError, VaultCreator, create_vault};
