//! Content addressing for zdoc
//!
//! Every committed document revision is stored under the MD5 digest of its
//! full byte sequence, hex-encoded. The digest doubles as the blob file name
//! in the object store and as the `file_md5` field exchanged with the server.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Content-store key: lowercase hex MD5 of a blob
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Compute the hash of a byte sequence
    pub fn from_data(data: &[u8]) -> Self {
        Self(format!("{:x}", md5::compute(data)))
    }

    /// Hash the current content of a file
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        Ok(Self::from_data(&data))
    }

    /// Wrap a hash received from elsewhere (index file, remote listing).
    ///
    /// Remote hashes are not re-validated here; a blob fetched for them is
    /// verified against [`ContentHash::from_data`] before it is stored.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A hash is usable as a blob file name only if it cannot escape the
    /// object directory.
    pub fn is_valid_key(&self) -> bool {
        !self.0.is_empty() && self.0.chars().all(|c| c.is_ascii_alphanumeric())
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
