//! Versioned knowledge entries
//!
//! A knowledge entry is a single Markdown file edited collaboratively and
//! versioned by the server. Locally it lives at `knowledge/<name>.md` with
//! its published history under `knowledge/<name>/<version>/<name>.md` and
//! the version the current file is based on in `knowledge/<name>/version`.
//! Commits go through the shared object store and the `kindex` index.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::descriptor::UpdateTime;
use crate::index::IndexRecord;
use crate::layout::{DOC_EXTENSION, list_documents, validate_entry_name};
use crate::object::ContentHash;
use crate::remote::{AssetStore, KnowledgeUpload, RemoteApi, RemoteError};
use crate::rewrite::ReferenceRewriter;
use crate::status::{CheckoutReport, StatusEntry, checkout_records, diff_working_dir};
use crate::storage::write_atomic;
use crate::workspace::Workspace;

/// Index record for one knowledge entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeDescriptor {
    #[serde(rename = "kName")]
    pub name: String,
    #[serde(rename = "file_md5")]
    pub content_hash: ContentHash,
    pub update_time: UpdateTime,
    /// Change log sent with the next push
    #[serde(default)]
    pub changelog: String,
}

impl IndexRecord for KnowledgeDescriptor {
    fn key(&self) -> &str {
        &self.name
    }

    fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }

    fn file_name(&self) -> String {
        format!("{}{}", self.name, DOC_EXTENSION)
    }
}

/// What happened to the current file during a pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrentUpdate {
    /// No current file existed; the newest published version was copied in
    Created(u32),
    /// The current file held no unpushed edits and was replaced
    Replaced(u32),
    /// The current file held local edits and was moved to `aside`
    RenamedAside { aside: PathBuf, version: u32 },
    /// The newest version is not published yet
    PendingReview(u32),
    UpToDate,
    /// The server has no published version at all
    Empty,
}

#[derive(Debug, Clone)]
pub struct KnowledgePullReport {
    pub now_version: u32,
    /// History versions written by this pull
    pub materialized: Vec<u32>,
    pub current: CurrentUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnowledgeAddOutcome {
    Unchanged,
    Committed(ContentHash),
}

/// `name-old`, `name-old-2`, ... are files moved aside by a pull
fn is_aside_stem(stem: &str) -> bool {
    match stem.rsplit_once("-old") {
        Some((base, "")) => !base.is_empty(),
        Some((base, n)) => {
            !base.is_empty()
                && n.strip_prefix('-')
                    .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        }
        None => false,
    }
}

fn parse_version(raw: &str) -> Option<u32> {
    raw.trim().parse().ok()
}

pub struct KnowledgeEngine<'a> {
    ws: &'a Workspace,
    remote: &'a dyn RemoteApi,
    assets: &'a dyn AssetStore,
}

impl<'a> KnowledgeEngine<'a> {
    pub fn new(ws: &'a Workspace, remote: &'a dyn RemoteApi, assets: &'a dyn AssetStore) -> Self {
        Self { ws, remote, assets }
    }

    pub fn current_path(&self, name: &str) -> PathBuf {
        self.ws
            .layout()
            .knowledge_dir()
            .join(format!("{}{}", name, DOC_EXTENSION))
    }

    fn entry_dir(&self, name: &str) -> PathBuf {
        self.ws.layout().knowledge_dir().join(name)
    }

    pub fn history_path(&self, name: &str, version: u32) -> PathBuf {
        self.entry_dir(name)
            .join(version.to_string())
            .join(format!("{}{}", name, DOC_EXTENSION))
    }

    fn version_path(&self, name: &str) -> PathBuf {
        self.entry_dir(name).join("version")
    }

    /// Version the current file is based on
    pub fn local_version(&self, name: &str) -> Option<u32> {
        fs::read_to_string(self.version_path(name))
            .ok()
            .and_then(|raw| parse_version(&raw))
    }

    fn set_local_version(&self, name: &str, version: u32) -> Result<()> {
        write_atomic(&self.version_path(name), version.to_string().as_bytes())
            .with_context(|| format!("Failed to record version of {}", name))
    }

    /// First free `<name>-old[-N].md`
    fn aside_path(&self, name: &str) -> PathBuf {
        let dir = self.ws.layout().knowledge_dir();
        let first = dir.join(format!("{}-old{}", name, DOC_EXTENSION));
        if !first.exists() {
            return first;
        }
        (2u32..)
            .map(|n| dir.join(format!("{}-old-{}{}", name, n, DOC_EXTENSION)))
            .find(|p| !p.exists())
            .unwrap_or(first)
    }

    fn validate(name: &str) -> Result<()> {
        validate_entry_name(name).map_err(|e| anyhow!("Invalid knowledge name {:?}: {}", name, e))
    }

    /// Commit the current file of `name` with a change log
    pub async fn add(&self, name: &str, changelog: &str) -> Result<KnowledgeAddOutcome> {
        Self::validate(name)?;
        let path = self.current_path(name);
        if !path.is_file() {
            return Err(anyhow!("{:?} does not exist", path));
        }

        let size = fs::metadata(&path)?.len();
        let limit = self.ws.config().max_document_bytes;
        if size > limit {
            return Err(anyhow!(
                "{} is {} bytes; documents over {} bytes are not accepted",
                name,
                size,
                limit
            ));
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
            .with_context(|| format!("Image migration failed for {}", name))?;
        for (target, e) in &report.failed {
            warn!("{}: image {} left unchanged: {}", name, target, e);
        }

        let data = fs::read(&path).with_context(|| format!("Failed to read {:?}", path))?;
        let hash = ContentHash::from_data(&data);

        let previous = self.ws.knowledge_index().load()?.get(name).cloned();
        if let Some(prev) = &previous {
            if prev.content_hash == hash && prev.changelog == changelog {
                debug!("{} unchanged", name);
                return Ok(KnowledgeAddOutcome::Unchanged);
            }
        }

        self.ws.objects().put(&data)?;
        let record = KnowledgeDescriptor {
            name: name.to_string(),
            content_hash: hash.clone(),
            update_time: UpdateTime::now(),
            changelog: changelog.to_string(),
        };
        let knowledge = self.ws.knowledge_index().update(|index| {
            index.upsert(record);
            Ok::<_, crate::storage::StorageError>(index.clone())
        })?;

        if let Some(prev) = previous.filter(|p| p.content_hash != hash) {
            let articles = self.ws.index().load()?;
            self.ws.release_blob(&prev.content_hash, &articles, &knowledge)?;
        }
        info!("Committed knowledge {} ({})", name, hash);
        Ok(KnowledgeAddOutcome::Committed(hash))
    }

    /// Materialize the server's history and refresh the current file
    pub async fn pull(&self, name: &str) -> Result<KnowledgePullReport> {
        Self::validate(name)?;
        let snapshot = self
            .remote
            .get_knowledge(name)
            .await
            .with_context(|| format!("Failed to fetch knowledge {}", name))?;
        let now_version = parse_version(&snapshot.now_version).ok_or_else(|| {
            RemoteError::Shape(format!("now_version {:?} for {}", snapshot.now_version, name))
        })?;

        fs::create_dir_all(self.entry_dir(name))?;
        let mut materialized = Vec::new();
        let mut newest = None;
        for entry in &snapshot.list {
            let Some(version) = parse_version(&entry.version) else {
                warn!("Skipping version {:?} of {}", entry.version, name);
                continue;
            };
            if entry.content.is_empty() {
                debug!("Version {} of {} is awaiting review", version, name);
                continue;
            }
            newest = newest.max(Some(version));
            let path = self.history_path(name, version);
            if path.exists() {
                continue;
            }
            write_atomic(&path, entry.content.as_bytes())?;
            materialized.push(version);
        }

        let current_path = self.current_path(name);
        let current = if !current_path.exists() {
            match newest {
                Some(version) => {
                    fs::copy(self.history_path(name, version), &current_path)?;
                    self.set_local_version(name, version)?;
                    CurrentUpdate::Created(version)
                }
                None => CurrentUpdate::Empty,
            }
        } else {
            let local_version = self.local_version(name).unwrap_or(0);
            let incoming_path = self.history_path(name, now_version);
            if now_version <= local_version {
                CurrentUpdate::UpToDate
            } else if !incoming_path.exists() {
                CurrentUpdate::PendingReview(now_version)
            } else {
                let incoming = fs::read(&incoming_path)?;
                let current = fs::read(&current_path)?;
                let base = fs::read(self.history_path(name, local_version)).ok();
                let update = if current == incoming || base.as_deref() == Some(current.as_slice()) {
                    CurrentUpdate::Replaced(now_version)
                } else {
                    let aside = self.aside_path(name);
                    fs::rename(&current_path, &aside)
                        .with_context(|| format!("Failed to move {:?} aside", current_path))?;
                    warn!(
                        "Local edits to {} conflict with version {}; kept as {:?}",
                        name, now_version, aside
                    );
                    CurrentUpdate::RenamedAside {
                        aside,
                        version: now_version,
                    }
                };
                write_atomic(&current_path, &incoming)?;
                self.set_local_version(name, now_version)?;
                update
            }
        };

        info!("Pulled knowledge {} (server version {}): {:?}", name, now_version, current);
        Ok(KnowledgePullReport {
            now_version,
            materialized,
            current,
        })
    }

    /// Push the committed content of `name`. A stale base version pulls the
    /// newest version and fails.
    pub async fn push(&self, name: &str) -> Result<()> {
        Self::validate(name)?;
        let record = self
            .ws
            .knowledge_index()
            .load()?
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("{} is not committed; run kadd first", name))?;
        let version = self
            .local_version(name)
            .ok_or_else(|| anyhow!("{} has no local version; run kpull first", name))?;
        let data = self.ws.objects().get(&record.content_hash)?;
        let content =
            String::from_utf8(data).map_err(|_| anyhow!("{} is not valid UTF-8", name))?;

        let upload = KnowledgeUpload {
            name: name.to_string(),
            version,
            changelog: record.changelog.clone(),
            content,
        };
        match self.remote.add_knowledge(&upload).await {
            Ok(()) => {
                info!("Pushed knowledge {} based on version {}", name, version);
                Ok(())
            }
            Err(RemoteError::Conflict(msg)) => {
                warn!("{} is stale ({}); pulling", name, msg);
                let report = self.pull(name).await?;
                Err(anyhow!(
                    "{} was based on version {} but the server is at {}; pulled, review and push again",
                    name,
                    version,
                    report.now_version
                ))
            }
            Err(e) => Err(e).with_context(|| format!("Failed to push knowledge {}", name)),
        }
    }

    pub async fn create(&self, name: &str) -> Result<()> {
        Self::validate(name)?;
        self.remote
            .new_knowledge(name)
            .await
            .with_context(|| format!("Failed to create knowledge {}", name))?;
        info!("Created knowledge {}", name);
        Ok(())
    }

    pub async fn relate(&self, name: &str, alias: &str) -> Result<()> {
        Self::validate(name)?;
        self.remote
            .relate_knowledge(name, alias)
            .await
            .with_context(|| format!("Failed to relate {} to {}", alias, name))?;
        info!("Related {} to {}", alias, name);
        Ok(())
    }

    pub fn status(&self) -> Result<Vec<StatusEntry>> {
        let dir = self.ws.layout().knowledge_dir();
        let files = list_documents(&dir, &self.ws.layout().ignore_list())?;
        let index = self.ws.knowledge_index().load()?;
        diff_working_dir(&dir, &files, &index, |file| {
            let stem = file.strip_suffix(DOC_EXTENSION)?;
            (!is_aside_stem(stem)).then(|| stem.to_string())
        })
    }

    pub fn checkout(&self, target: &str) -> Result<CheckoutReport> {
        let index = self.ws.knowledge_index().load()?;
        checkout_records(
            self.ws.objects(),
            &self.ws.layout().knowledge_dir(),
            &index,
            target,
        )
    }
}
