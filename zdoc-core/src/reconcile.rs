//! Push/pull reconciliation
//!
//! Both directions start from the server's document list and compare it
//! against the local Index one name at a time. The decision for each pair is
//! a pure function ([`classify_pull`], [`classify_push`]); the engine then
//! carries it out. Ordering is last-writer-wins on `update_time` with ties
//! kept local, except that a remote tombstone always removes a live local
//! document so deletions are never resurrected by a stale copy.

use anyhow::{Context, Result, anyhow};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::descriptor::Descriptor;
use crate::frontmatter::FrontMatter;
use crate::index::Index;
use crate::remote::{DocumentUpload, RemoteApi, RemoteError};
use crate::storage::write_atomic;
use crate::workspace::Workspace;

/// What Pull does with one remote descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullAction {
    Skip,
    /// Adopt a remote tombstone for a name with nothing live locally
    RecordTombstone,
    /// Remove the live local copy and adopt the remote tombstone
    PropagateDelete,
    /// Replace local content and descriptor with the remote's
    Fetch,
}

/// What Push does with one local descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushAction {
    Skip,
    PropagateDelete,
    DeleteRemote,
    Upload,
}

pub fn classify_pull(local: Option<&Descriptor>, remote: &Descriptor) -> PullAction {
    if remote.is_tombstone() {
        return match local {
            Some(l) if !l.is_tombstone() => PullAction::PropagateDelete,
            Some(l) if l.same_state(remote) => PullAction::Skip,
            _ => PullAction::RecordTombstone,
        };
    }
    match local {
        None => PullAction::Fetch,
        Some(l) if l.same_state(remote) => PullAction::Skip,
        Some(l) if !remote.update_time.is_newer_than(&l.update_time) => PullAction::Skip,
        Some(_) => PullAction::Fetch,
    }
}

pub fn classify_push(local: &Descriptor, remote: Option<&Descriptor>) -> PushAction {
    match remote {
        Some(r) if r.is_tombstone() && !local.is_tombstone() => PushAction::PropagateDelete,
        Some(r) if local.same_state(r) || !local.update_time.is_newer_than(&r.update_time) => {
            PushAction::Skip
        }
        Some(r) if local.is_tombstone() && !r.is_tombstone() => PushAction::DeleteRemote,
        _ if local.is_tombstone() => PushAction::Skip,
        _ => PushAction::Upload,
    }
}

/// Outcome of one pull or push
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub fetched: Vec<String>,
    pub uploaded: Vec<String>,
    pub deleted_local: Vec<String>,
    pub deleted_remote: Vec<String>,
    pub skipped: usize,
    /// (name, error) for documents left untouched
    pub failed: Vec<(String, String)>,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Whether the run changed anything on either side
    pub fn has_changes(&self) -> bool {
        !(self.fetched.is_empty()
            && self.uploaded.is_empty()
            && self.deleted_local.is_empty()
            && self.deleted_remote.is_empty())
    }

    pub fn summary(&self) -> String {
        format!(
            "{} fetched, {} uploaded, {} deleted locally, {} deleted remotely, {} unchanged, {} failed in {}ms",
            self.fetched.len(),
            self.uploaded.len(),
            self.deleted_local.len(),
            self.deleted_remote.len(),
            self.skipped,
            self.failed.len(),
            self.duration_ms
        )
    }

    fn merge(&mut self, other: SyncReport) {
        self.fetched.extend(other.fetched);
        self.uploaded.extend(other.uploaded);
        self.deleted_local.extend(other.deleted_local);
        self.deleted_remote.extend(other.deleted_remote);
        self.skipped += other.skipped;
        self.failed.extend(other.failed);
    }
}

pub struct Reconciler<'a> {
    ws: &'a Workspace,
    remote: &'a dyn RemoteApi,
}

impl<'a> Reconciler<'a> {
    pub fn new(ws: &'a Workspace, remote: &'a dyn RemoteApi) -> Self {
        Self { ws, remote }
    }

    /// Remote list as descriptors. Malformed rows are logged and recorded
    /// as failures.
    async fn remote_snapshot(&self, report: &mut SyncReport) -> Result<BTreeMap<String, Descriptor>> {
        let entries = self
            .remote
            .list_documents()
            .await
            .context("Failed to fetch the remote document list")?;

        let mut snapshot = BTreeMap::new();
        for entry in entries {
            match entry.to_descriptor() {
                Ok(desc) => {
                    snapshot.insert(desc.name.clone(), desc);
                }
                Err(e) => {
                    warn!("Skipping remote entry {:?}: {}", entry, e);
                    let name = if entry.file_name.is_empty() {
                        "<unnamed>".to_string()
                    } else {
                        entry.file_name.clone()
                    };
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        Ok(snapshot)
    }

    /// Pull every remote change into the local workspace
    pub async fn pull(&self) -> Result<SyncReport> {
        let started = Instant::now();
        let mut report = SyncReport::default();
        let snapshot = self.remote_snapshot(&mut report).await?;
        let mut index = self.ws.index().load()?;

        for remote in snapshot.into_values() {
            let name = remote.name.clone();
            let local = index.get(&name).cloned();
            match classify_pull(local.as_ref(), &remote) {
                PullAction::Skip => {
                    debug!("{} up to date", name);
                    report.skipped += 1;
                }
                PullAction::RecordTombstone => {
                    debug!("Recording remote tombstone for {}", name);
                    index.upsert(remote);
                    report.skipped += 1;
                }
                PullAction::PropagateDelete => {
                    self.propagate_delete(&mut index, local.as_ref(), remote);
                    report.deleted_local.push(name);
                }
                PullAction::Fetch => match self.fetch(&mut index, local.as_ref(), remote).await {
                    Ok(()) => report.fetched.push(name),
                    Err(e) => {
                        warn!("Failed to pull {}: {:#}", name, e);
                        report.failed.push((name, format!("{:#}", e)));
                    }
                },
            }
        }

        self.ws.index().save(&index)?;
        report.duration_ms = started.elapsed().as_millis() as u64;
        info!("Pull finished: {}", report.summary());
        Ok(report)
    }

    /// Push every local change to the server
    pub async fn push(&self) -> Result<SyncReport> {
        let started = Instant::now();
        let mut report = SyncReport::default();
        let snapshot = self.remote_snapshot(&mut report).await?;
        let mut index = self.ws.index().load()?;

        // Remote deletions land first so their blobs are not uploaded again
        for remote in snapshot.values().filter(|r| r.is_tombstone()) {
            let local = index.get(&remote.name).cloned();
            match classify_pull(local.as_ref(), remote) {
                PullAction::PropagateDelete => {
                    self.propagate_delete(&mut index, local.as_ref(), remote.clone());
                    report.deleted_local.push(remote.name.clone());
                }
                PullAction::RecordTombstone => {
                    index.upsert(remote.clone());
                }
                PullAction::Skip | PullAction::Fetch => {}
            }
        }

        let mut conflicted = false;
        for name in index.names() {
            let Some(local) = index.get(&name).cloned() else {
                continue;
            };
            let remote = snapshot.get(&name);
            match classify_push(&local, remote) {
                PushAction::Skip => {
                    debug!("{} needs no push", name);
                    report.skipped += 1;
                }
                PushAction::PropagateDelete => {
                    if let Some(r) = remote {
                        self.propagate_delete(&mut index, Some(&local), r.clone());
                        report.deleted_local.push(name);
                    }
                }
                PushAction::DeleteRemote => match self.remote.delete_document(&name).await {
                    Ok(()) => {
                        info!("Deleted {} on the server", name);
                        report.deleted_remote.push(name);
                    }
                    Err(e) => {
                        warn!("Failed to delete {} on the server: {}", name, e);
                        report.failed.push((name, e.to_string()));
                    }
                },
                PushAction::Upload => match self.upload(&local).await {
                    Ok(()) => {
                        info!("Pushed {}", name);
                        report.uploaded.push(name);
                    }
                    Err(e) => {
                        if matches!(e.downcast_ref::<RemoteError>(), Some(RemoteError::Conflict(_))) {
                            conflicted = true;
                        }
                        warn!("Failed to push {}: {:#}", name, e);
                        report.failed.push((name, format!("{:#}", e)));
                    }
                },
            }
        }

        self.ws.index().save(&index)?;

        if conflicted {
            warn!("Server reported stale documents; pulling");
            let pulled = self.pull().await?;
            report.merge(pulled);
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!("Push finished: {}", report.summary());
        Ok(report)
    }

    /// Adopt a remote tombstone: drop the working file and the blob
    fn propagate_delete(&self, index: &mut Index<Descriptor>, local: Option<&Descriptor>, remote: Descriptor) {
        let name = remote.name.clone();
        index.upsert(remote);

        let path = self.ws.layout().post_path(&name);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {:?}: {}", path, e);
            }
        }
        if let Some(local) = local {
            let released = self
                .ws
                .knowledge_index()
                .load()
                .and_then(|knowledge| self.ws.release_blob(&local.content_hash, index, &knowledge));
            if let Err(e) = released {
                warn!("Failed to release blob of {}: {}", name, e);
            }
        }
        info!("{} was deleted on the server; removed locally", name);
    }

    /// Bring one document to the remote's state
    async fn fetch(&self, index: &mut Index<Descriptor>, local: Option<&Descriptor>, remote: Descriptor) -> Result<()> {
        let name = remote.name.clone();
        let objects = self.ws.objects();

        let data = if objects.exists(&remote.content_hash) {
            objects.get(&remote.content_hash)?
        } else {
            let body = self
                .remote
                .get_document(&name)
                .await
                .with_context(|| format!("Failed to download {}", name))?;
            let data = body.content.into_bytes();
            objects
                .put_verified(&remote.content_hash, &data)
                .map_err(|e| anyhow!(RemoteError::Shape(e.to_string())))
                .with_context(|| format!("Rejected content of {}", name))?;
            data
        };

        let path = self.ws.layout().post_path(&name);
        write_atomic(&path, &data).with_context(|| format!("Failed to write {:?}", path))?;

        let new_hash = remote.content_hash.clone();
        index.upsert(remote);
        if let Some(prev) = local.map(|l| &l.content_hash).filter(|h| **h != new_hash) {
            let knowledge = self.ws.knowledge_index().load()?;
            self.ws.release_blob(prev, index, &knowledge)?;
        }
        info!("Pulled {}", name);
        Ok(())
    }

    async fn upload(&self, local: &Descriptor) -> Result<()> {
        let data = self
            .ws
            .objects()
            .get(&local.content_hash)
            .with_context(|| format!("Missing committed content of {}", local.name))?;
        let content = String::from_utf8(data)
            .map_err(|_| anyhow!("{} is not valid UTF-8", local.name))?;
        let header = FrontMatter::parse_article(&content)
            .with_context(|| format!("{} has an invalid header", local.name))?;

        let upload = DocumentUpload {
            name: local.name.clone(),
            content_hash: local.content_hash.clone(),
            content,
            title: header.title.clone(),
            category: header.category().to_string(),
            update_time: local.update_time,
        };
        self.remote.add_document(&upload).await?;
        Ok(())
    }
}
