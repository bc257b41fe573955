//! Storage for sanitized map documents.
//!
//! The registrar only needs four operations from its document backend, so
//! they are expressed as the [`DocumentStore`] trait. [`FsDocumentStore`]
//! is the bundled local-disk implementation.

mod fs;

pub use self::fs::{DocumentStoreConfig, FsDocumentStore};

use crate::error::{Result, VenueError};
use crate::types::KEY_SEPARATOR;
use serde::{Deserialize, Serialize};

/// A stored document as listed by its backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub name: String,
    pub url: String,
}

/// Named byte storage for map documents.
pub trait DocumentStore: Send + Sync {
    /// Store `bytes` under `name`, replacing any previous content. Returns
    /// the public location of the document.
    fn put(&self, name: &str, bytes: &[u8]) -> Result<String>;

    /// Fails with `DocumentNotFound` if nothing is stored under `name`.
    fn get(&self, name: &str) -> Result<Vec<u8>>;

    fn list(&self) -> Result<Vec<StoredDocument>>;

    /// Returns whether a document was removed.
    fn delete(&self, name: &str) -> Result<bool>;
}

/// Reject names that are empty, could escape the storage namespace or would
/// make a seat key ambiguous.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = name.trim().is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.contains(KEY_SEPARATOR)
        || name.chars().any(char::is_control);

    if invalid {
        return Err(VenueError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("arena-level-1.svg").is_ok());
        assert!(validate_name("Teatro Principal.svg").is_ok());

        for bad in [
            "",
            "  ",
            "../etc/passwd",
            "a/b.svg",
            "a\\b.svg",
            "x..svg",
            "tab\there",
            "hall::b.svg",
        ] {
            assert!(
                matches!(validate_name(bad), Err(VenueError::InvalidName(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
