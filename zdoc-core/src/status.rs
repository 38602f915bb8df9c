//! Working-directory status and checkout
//!
//! Both work on any index whose records name a working file and a blob, so
//! articles and knowledge entries share the implementation.

use anyhow::{Result, anyhow};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::index::{Index, IndexRecord};
use crate::layout::{DOC_EXTENSION, list_documents};
use crate::object::ContentHash;
use crate::storage::ObjectStore;
use crate::workspace::Workspace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEntry {
    /// Working file not in the index
    New(String),
    /// Working file differs from its committed content
    Changed(String),
    /// Live index entry without a working file
    Deleted(String),
}

impl StatusEntry {
    pub fn name(&self) -> &str {
        match self {
            StatusEntry::New(n) | StatusEntry::Changed(n) | StatusEntry::Deleted(n) => n,
        }
    }
}

impl std::fmt::Display for StatusEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusEntry::New(n) => write!(f, "new:     {}", n),
            StatusEntry::Changed(n) => write!(f, "changed: {}", n),
            StatusEntry::Deleted(n) => write!(f, "deleted: {}", n),
        }
    }
}

/// Compare a working directory against an index. Only `.md` files among
/// `files` are considered; `key_of` maps a file name to its index key, or
/// `None` for files that are not tracked by this index at all.
pub fn diff_working_dir<T: IndexRecord>(
    dir: &Path,
    files: &[String],
    index: &Index<T>,
    key_of: impl Fn(&str) -> Option<String>,
) -> Result<Vec<StatusEntry>> {
    let mut entries = Vec::new();
    let mut seen = Vec::new();

    for file in files.iter().filter(|f| f.ends_with(DOC_EXTENSION)) {
        let Some(key) = key_of(file) else {
            continue;
        };
        seen.push(key.clone());
        match index.get(&key) {
            None => entries.push(StatusEntry::New(file.clone())),
            Some(record) if record.is_tombstone() => entries.push(StatusEntry::New(file.clone())),
            Some(record) => {
                let path = dir.join(file);
                let live = ContentHash::from_file(&path)
                    .map_err(|e| anyhow!("Failed to hash {:?}: {}", path, e))?;
                if &live != record.content_hash() {
                    entries.push(StatusEntry::Changed(file.clone()));
                }
            }
        }
    }

    for record in index.iter() {
        if !record.is_tombstone() && !seen.iter().any(|k| k == record.key()) {
            entries.push(StatusEntry::Deleted(record.file_name()));
        }
    }
    Ok(entries)
}

/// Status of `posts/` against the article index
pub fn article_status(ws: &Workspace) -> Result<Vec<StatusEntry>> {
    let layout = ws.layout();
    let dir = layout.posts_dir();
    let files = list_documents(&dir, &layout.ignore_list())?;
    let index = ws.index().load()?;
    diff_working_dir(&dir, &files, &index, |file| Some(file.to_string()))
}

/// Restore articles from the object store
pub fn checkout_articles(ws: &Workspace, target: &str) -> Result<CheckoutReport> {
    let index = ws.index().load()?;
    checkout_records(ws.objects(), &ws.layout().posts_dir(), &index, target)
}

#[derive(Debug, Default)]
pub struct CheckoutReport {
    pub restored: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Restore working files from committed content, overwriting local edits.
/// `target` is a record key or `.` for every live record.
pub fn checkout_records<T: IndexRecord>(
    objects: &ObjectStore,
    dir: &Path,
    index: &Index<T>,
    target: &str,
) -> Result<CheckoutReport> {
    let mut report = CheckoutReport::default();

    if target != "." {
        let record = index
            .get(target)
            .ok_or_else(|| anyhow!("{} is not tracked", target))?;
        if record.is_tombstone() {
            return Err(anyhow!("{} is deleted; nothing to check out", target));
        }
        let path = dir.join(record.file_name());
        objects.checkout_to(record.content_hash(), &path)?;
        info!("Checked out {}", target);
        report.restored.push(target.to_string());
        return Ok(report);
    }

    fs::create_dir_all(dir)?;
    for record in index.iter().filter(|r| !r.is_tombstone()) {
        let path = dir.join(record.file_name());
        match objects.checkout_to(record.content_hash(), &path) {
            Ok(()) => {
                info!("Checked out {}", record.key());
                report.restored.push(record.key().to_string());
            }
            Err(e) => {
                warn!("Failed to check out {}: {}", record.key(), e);
                report.failed.push((record.key().to_string(), e.to_string()));
            }
        }
    }
    Ok(report)
}
