//! Directory identifiers.

use std::fmt;

/// Opaque logical identifier for a directory inside a vault.
///
/// The vault root is identified by the empty string; every other directory
/// gets a random UUID. The identifier never appears on disk in plaintext —
/// the on-disk storage name is derived from it by the directory-ID cipher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirId(String);

impl DirId {
    /// The root directory (empty string ID).
    #[inline]
    pub fn root() -> Self {
        DirId(String::new())
    }

    /// Create a `DirId` from a raw string.
    #[inline]
    pub fn from_raw(id: impl Into<String>) -> Self {
        DirId(id.into())
    }

    /// Check if this is the root directory.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the raw string representation.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for DirId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
