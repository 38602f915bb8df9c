//! Object store for zdoc
//!
//! A flat directory of blobs, one file per content hash. Blobs are immutable:
//! a hash always names the same bytes, so writes never need locking beyond
//! write-to-temp-then-rename.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::object::ContentHash;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(ContentHash),

    #[error("Invalid object key: {0:?}")]
    InvalidKey(String),

    #[error("Content hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Replace `path` with `data` so that readers see either the old file or the
/// new one, never a prefix of the new one.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    let mut file = fs::File::create(&tmp_path).map_err(|e| StorageError::io(&tmp_path, e))?;
    file.write_all(data)
        .and_then(|_| file.sync_all())
        .map_err(|e| StorageError::io(&tmp_path, e))?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StorageError::io(path, e)
    })
}

/// Content-addressable blob store rooted at `.repo/objects`
#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    /// Open or create the store directory
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StorageError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, hash: &ContentHash) -> Result<PathBuf> {
        if !hash.is_valid_key() {
            return Err(StorageError::InvalidKey(hash.as_str().to_string()));
        }
        Ok(self.root.join(hash.as_str()))
    }

    /// Check if a blob exists
    pub fn exists(&self, hash: &ContentHash) -> bool {
        self.blob_path(hash).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Store bytes and return their hash. Storing bytes that are already
    /// present performs no write.
    pub fn put(&self, data: &[u8]) -> Result<ContentHash> {
        let hash = ContentHash::from_data(data);
        let path = self.blob_path(&hash)?;
        if !path.is_file() {
            write_atomic(&path, data)?;
        }
        Ok(hash)
    }

    /// Store bytes that are expected to hash to `expected`
    pub fn put_verified(&self, expected: &ContentHash, data: &[u8]) -> Result<ContentHash> {
        let actual = ContentHash::from_data(data);
        if &actual != expected {
            return Err(StorageError::HashMismatch {
                expected: expected.clone(),
                actual,
            });
        }
        self.put(data)
    }

    /// Read a blob
    pub fn get(&self, hash: &ContentHash) -> Result<Vec<u8>> {
        let path = self.blob_path(hash)?;
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(hash.clone()))
            }
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    /// Remove a blob. Absence is not an error.
    pub fn remove(&self, hash: &ContentHash) -> Result<()> {
        let path = match self.blob_path(hash) {
            Ok(p) => p,
            Err(_) => return Ok(()),
        };
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    /// Copy a blob over a working-directory file
    pub fn checkout_to(&self, hash: &ContentHash, dest: &Path) -> Result<()> {
        let data = self.get(hash)?;
        write_atomic(dest, &data)
    }

    /// List all stored hashes, sorted
    pub fn list(&self) -> Result<Vec<ContentHash>> {
        let mut hashes = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|e| StorageError::io(&self.root, e))? {
            let entry = entry.map_err(|e| StorageError::io(&self.root, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !entry.path().is_file() {
                continue;
            }
            hashes.push(ContentHash::from_hex(name));
        }
        hashes.sort();
        Ok(hashes)
    }
}
