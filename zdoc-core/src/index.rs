//! Persisted name → descriptor mapping
//!
//! The index file is a JSON array of records. It is read fully into memory
//! and rewritten fully (atomically) on every mutation. Single-process,
//! single-user access is assumed; there is no inter-process locking.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::object::ContentHash;
use crate::storage::{Result, StorageError, write_atomic};

/// A record that can live in an index file
pub trait IndexRecord: Serialize + DeserializeOwned + Clone {
    /// Unique key of the record
    fn key(&self) -> &str;

    /// Blob holding the committed content
    fn content_hash(&self) -> &ContentHash;

    /// Tombstoned records have no working file
    fn is_tombstone(&self) -> bool {
        false
    }

    /// Working-directory file name
    fn file_name(&self) -> String {
        self.key().to_string()
    }

    /// Whether this record keeps `hash` alive in the object store
    fn holds(&self, hash: &ContentHash) -> bool {
        !self.is_tombstone() && self.content_hash() == hash
    }
}

/// In-memory index, keyed by record name
#[derive(Debug, Clone, PartialEq)]
pub struct Index<T> {
    entries: BTreeMap<String, T>,
}

impl<T: IndexRecord> Index<T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.entries.get_mut(name)
    }

    /// Insert or replace the record under its own key
    pub fn upsert(&mut self, record: T) -> Option<T> {
        self.entries.insert(record.key().to_string(), record)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Whether any live record references `hash`
    pub fn references(&self, hash: &ContentHash) -> bool {
        self.entries.values().any(|r| r.holds(hash))
    }
}

impl<T: IndexRecord> Default for Index<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: IndexRecord> FromIterator<T> for Index<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut index = Index::new();
        for record in iter {
            index.upsert(record);
        }
        index
    }
}

/// Location of a persisted index
#[derive(Debug, Clone)]
pub struct IndexFile<T> {
    path: PathBuf,
    _record: PhantomData<T>,
}

impl<T: IndexRecord> IndexFile<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the index. A missing or empty file is an empty index.
    pub fn load(&self) -> Result<Index<T>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Index::new()),
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };
        if data.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Index::new());
        }

        let records: Vec<T> = serde_json::from_slice(&data).map_err(|e| {
            StorageError::Serialization(format!("Failed to parse {:?}: {}", self.path, e))
        })?;
        Ok(records.into_iter().collect())
    }

    /// Atomically replace the index file
    pub fn save(&self, index: &Index<T>) -> Result<()> {
        let records: Vec<&T> = index.iter().collect();
        let data = serde_json::to_vec_pretty(&records)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        write_atomic(&self.path, &data)
    }

    /// Load, mutate, save. The file is only rewritten if the closure
    /// succeeds.
    pub fn update<R, E>(&self, f: impl FnOnce(&mut Index<T>) -> std::result::Result<R, E>) -> std::result::Result<R, E>
    where
        E: From<StorageError>,
    {
        let mut index = self.load()?;
        let out = f(&mut index)?;
        self.save(&index)?;
        Ok(out)
    }
}
