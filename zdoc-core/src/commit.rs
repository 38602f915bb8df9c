//! Committing working files into the object store
//!
//! `add` snapshots a document: its images are migrated, its header is
//! validated, its bytes are stored under their hash and the Index is pointed
//! at the new blob. `rm` tombstones a document so the deletion can be pushed.

use std::fs;
use tracing::{debug, info, warn};

use crate::descriptor::{DocStatus, Descriptor, UpdateTime};
use crate::frontmatter::{ARTICLE_HEADER_SHAPE, FrontMatter, FrontMatterError};
use crate::layout::{DOC_EXTENSION, NameError, list_documents, validate_doc_name};
use crate::object::ContentHash;
use crate::remote::{AssetStore, RemoteApi};
use crate::rewrite::{ReferenceRewriter, RewriteError};
use crate::storage::StorageError;
use crate::workspace::Workspace;

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("Invalid document name {name:?}: {source}")]
    InvalidName {
        name: String,
        #[source]
        source: NameError,
    },

    #[error("{0} does not exist in posts/")]
    Missing(String),

    #[error("{name} is {size} bytes; documents over {limit} bytes are not accepted")]
    Oversized { name: String, size: u64, limit: u64 },

    #[error("{name}: image migration failed: {source}")]
    Rewrite {
        name: String,
        #[source]
        source: RewriteError,
    },

    #[error("{name}: invalid header: {source}\n{guidance}")]
    Header {
        name: String,
        #[source]
        source: FrontMatterError,
        guidance: String,
    },

    #[error("{0} is not tracked")]
    Untracked(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Content already committed; nothing written
    Unchanged,
    Committed {
        hash: ContentHash,
        previous: Option<ContentHash>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    AlreadyDeleted,
}

/// Result of committing every document in `posts/`
#[derive(Debug, Default)]
pub struct CommitReport {
    pub committed: Vec<String>,
    pub unchanged: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl CommitReport {
    pub fn summary(&self) -> String {
        format!(
            "{} committed, {} unchanged, {} failed",
            self.committed.len(),
            self.unchanged.len(),
            self.failed.len()
        )
    }
}

/// Expected header plus the categories the server knows about
pub(crate) fn header_guidance(categories: &[String]) -> String {
    let mut guidance = format!("Expected header:\n{}", ARTICLE_HEADER_SHAPE);
    if !categories.is_empty() {
        guidance.push_str("\nAvailable categories: ");
        guidance.push_str(&categories.join(", "));
    }
    guidance
}

pub struct CommitEngine<'a> {
    ws: &'a Workspace,
    remote: &'a dyn RemoteApi,
    assets: &'a dyn AssetStore,
}

impl<'a> CommitEngine<'a> {
    pub fn new(ws: &'a Workspace, remote: &'a dyn RemoteApi, assets: &'a dyn AssetStore) -> Self {
        Self { ws, remote, assets }
    }

    async fn guidance(&self) -> String {
        let categories = match self.remote.list_categories().await {
            Ok(categories) => categories,
            Err(e) => {
                debug!("Could not list categories: {}", e);
                Vec::new()
            }
        };
        header_guidance(&categories)
    }

    /// Commit one document from `posts/`
    pub async fn commit(&self, name: &str) -> Result<CommitOutcome, CommitError> {
        validate_doc_name(name).map_err(|source| CommitError::InvalidName {
            name: name.to_string(),
            source,
        })?;
        let path = self.ws.layout().post_path(name);
        let io_err = |e| StorageError::io(&path, e);

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CommitError::Missing(name.to_string()));
            }
            Err(e) => return Err(io_err(e).into()),
        };

        let index = self.ws.index().load()?;
        let previous = index.get(name).cloned();
        if let Some(prev) = &previous {
            if !prev.is_tombstone() && prev.content_hash == ContentHash::from_data(&data) {
                debug!("{} unchanged", name);
                return Ok(CommitOutcome::Unchanged);
            }
        }

        let limit = self.ws.config().max_document_bytes;
        let size = data.len() as u64;
        if size > limit {
            return Err(CommitError::Oversized {
                name: name.to_string(),
                size,
                limit,
            });
        }

        let rewriter = ReferenceRewriter::new(
            self.ws.config(),
            self.remote,
            self.assets,
            self.ws.layout().img_dir(),
        );
        let report = rewriter
            .rewrite(&path)
            .await
            .map_err(|source| CommitError::Rewrite {
                name: name.to_string(),
                source,
            })?;
        for (target, e) in &report.failed {
            warn!("{}: image {} left unchanged: {}", name, target, e);
        }

        let data = fs::read(&path).map_err(io_err)?;
        let text = String::from_utf8_lossy(&data);
        if let Err(source) = FrontMatter::parse_article(&text) {
            return Err(CommitError::Header {
                name: name.to_string(),
                source,
                guidance: self.guidance().await,
            });
        }

        let hash = self.ws.objects().put(&data)?;
        if let Some(prev) = &previous {
            if !prev.is_tombstone() && prev.content_hash == hash {
                debug!("{} unchanged after image migration", name);
                return Ok(CommitOutcome::Unchanged);
            }
        }

        let update_time = UpdateTime::now_after(previous.as_ref().map(|p| &p.update_time));
        let descriptor = Descriptor::new(name, hash.clone(), update_time);
        let articles = self.ws.index().update(|index| {
            index.upsert(descriptor);
            Ok::<_, StorageError>(index.clone())
        })?;

        let previous = previous.map(|p| p.content_hash).filter(|p| p != &hash);
        if let Some(prev) = &previous {
            let knowledge = self.ws.knowledge_index().load()?;
            self.ws.release_blob(prev, &articles, &knowledge)?;
        }

        info!("Committed {} ({})", name, hash);
        Ok(CommitOutcome::Committed { hash, previous })
    }

    /// Commit every non-ignored `.md` document in `posts/`. Failures are
    /// reported per document and do not stop the batch.
    pub async fn commit_all(&self) -> anyhow::Result<CommitReport> {
        let layout = self.ws.layout();
        let names = list_documents(&layout.posts_dir(), &layout.ignore_list())?;

        let mut report = CommitReport::default();
        for name in names.into_iter().filter(|n| n.ends_with(DOC_EXTENSION)) {
            match self.commit(&name).await {
                Ok(CommitOutcome::Unchanged) => report.unchanged.push(name),
                Ok(CommitOutcome::Committed { .. }) => report.committed.push(name),
                Err(e) => {
                    warn!("Failed to commit {}: {}", name, e);
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Tombstone a document and remove its working file
    pub fn remove(&self, name: &str) -> Result<RemoveOutcome, CommitError> {
        validate_doc_name(name).map_err(|source| CommitError::InvalidName {
            name: name.to_string(),
            source,
        })?;

        let removed = self.ws.index().update(|index| {
            let desc = index
                .get_mut(name)
                .ok_or_else(|| CommitError::Untracked(name.to_string()))?;
            if desc.is_tombstone() {
                return Ok(None);
            }
            desc.status = DocStatus::UserDeleted;
            desc.update_time = UpdateTime::now_after(Some(&desc.update_time));
            let hash = desc.content_hash.clone();
            Ok::<_, CommitError>(Some((hash, index.clone())))
        })?;

        let Some((hash, articles)) = removed else {
            debug!("{} already deleted", name);
            return Ok(RemoveOutcome::AlreadyDeleted);
        };

        let path = self.ws.layout().post_path(name);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::io(&path, e).into()),
        }

        let knowledge = self.ws.knowledge_index().load()?;
        self.ws.release_blob(&hash, &articles, &knowledge)?;
        info!("Removed {}", name);
        Ok(RemoveOutcome::Removed)
    }
}
