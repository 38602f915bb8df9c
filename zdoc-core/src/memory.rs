//! In-memory server and asset store
//!
//! Behaves like the document service closely enough to drive the sync
//! engines end to end: listings carry wire status codes, deletes become
//! tombstones, knowledge pushes are rejected when based on a stale version.
//! Every call is counted so tests can assert on network traffic.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::descriptor::{Descriptor, DocStatus, UpdateTime};
use crate::object::ContentHash;
use crate::remote::{
    AssetStore, DocumentBody, DocumentUpload, KnowledgeSnapshot, KnowledgeUpload,
    KnowledgeVersion, RemoteApi, RemoteEntry, RemoteError, STALE_VERSION_CODE,
};

/// Number of calls made per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub list: usize,
    pub get: usize,
    pub add: usize,
    pub delete: usize,
    pub credential: usize,
    pub categories: usize,
    pub kget: usize,
    pub kadd: usize,
    pub upload: usize,
    pub fetch: usize,
}

#[derive(Debug, Clone)]
struct StoredDocument {
    descriptor: Descriptor,
    content: String,
    title: String,
    category: String,
}

#[derive(Debug, Clone, Default)]
struct StoredKnowledge {
    /// Published versions with content
    versions: BTreeMap<u32, String>,
    /// Newest version, possibly still under review
    now_version: u32,
    changelogs: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    documents: BTreeMap<String, StoredDocument>,
    knowledge: BTreeMap<String, StoredKnowledge>,
    aliases: Vec<(String, String)>,
    categories: Vec<String>,
    assets: BTreeMap<String, Bytes>,
    foreign: BTreeMap<String, Bytes>,
    failing_fetches: BTreeSet<String>,
    credential_unavailable: bool,
    version: String,
    calls: CallCounts,
}

/// Shared fake for [`RemoteApi`] and [`AssetStore`]
#[derive(Debug)]
pub struct MemoryRemote {
    credential: String,
    state: Mutex<State>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            credential: "upload-credential".to_string(),
            state: Mutex::new(State {
                categories: vec!["rust".to_string(), "life".to_string()],
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a document as if another client had pushed it
    pub fn insert_document(&self, name: &str, content: &str, update_time: UpdateTime) -> ContentHash {
        let hash = ContentHash::from_data(content.as_bytes());
        let doc = StoredDocument {
            descriptor: Descriptor::new(name, hash.clone(), update_time),
            content: content.to_string(),
            title: name.trim_end_matches(".md").to_string(),
            category: String::new(),
        };
        self.state().documents.insert(name.to_string(), doc);
        hash
    }

    /// Tombstone a document with an explicit status and time
    pub fn mark_deleted(&self, name: &str, status: DocStatus, update_time: UpdateTime) {
        if let Some(doc) = self.state().documents.get_mut(name) {
            doc.descriptor.status = status;
            doc.descriptor.update_time = update_time;
        }
    }

    /// Seed a listing row whose content does not match its hash
    pub fn corrupt_document(&self, name: &str, content: &str) {
        if let Some(doc) = self.state().documents.get_mut(name) {
            doc.content = content.to_string();
        }
    }

    pub fn descriptor(&self, name: &str) -> Option<Descriptor> {
        self.state().documents.get(name).map(|d| d.descriptor.clone())
    }

    pub fn content(&self, name: &str) -> Option<String> {
        self.state().documents.get(name).map(|d| d.content.clone())
    }

    /// Title and category received with the last push of `name`
    pub fn metadata(&self, name: &str) -> Option<(String, String)> {
        self.state()
            .documents
            .get(name)
            .map(|d| (d.title.clone(), d.category.clone()))
    }

    /// Publish a knowledge version with content
    pub fn publish_knowledge(&self, name: &str, version: u32, content: &str) {
        let mut state = self.state();
        let entry = state.knowledge.entry(name.to_string()).or_default();
        entry.versions.insert(version, content.to_string());
        entry.now_version = entry.now_version.max(version);
    }

    /// Advance the newest version without publishing its content
    pub fn announce_knowledge_version(&self, name: &str, version: u32) {
        let mut state = self.state();
        let entry = state.knowledge.entry(name.to_string()).or_default();
        entry.now_version = entry.now_version.max(version);
    }

    pub fn knowledge_versions(&self, name: &str) -> BTreeMap<u32, String> {
        self.state()
            .knowledge
            .get(name)
            .map(|k| k.versions.clone())
            .unwrap_or_default()
    }

    pub fn knowledge_changelogs(&self, name: &str) -> Vec<String> {
        self.state()
            .knowledge
            .get(name)
            .map(|k| k.changelogs.clone())
            .unwrap_or_default()
    }

    pub fn aliases(&self) -> Vec<(String, String)> {
        self.state().aliases.clone()
    }

    /// Make a foreign URL downloadable
    pub fn serve_foreign(&self, url: &str, data: &[u8]) {
        self.state()
            .foreign
            .insert(url.to_string(), Bytes::copy_from_slice(data));
    }

    /// Make a foreign URL fail with a transport error
    pub fn fail_fetch(&self, url: &str) {
        self.state().failing_fetches.insert(url.to_string());
    }

    pub fn set_credential_unavailable(&self, unavailable: bool) {
        self.state().credential_unavailable = unavailable;
    }

    pub fn set_client_version(&self, version: &str) {
        self.state().version = version.to_string();
    }

    /// Uploaded assets by key
    pub fn assets(&self) -> BTreeMap<String, Bytes> {
        self.state().assets.clone()
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    pub fn reset_calls(&self) {
        self.state().calls = CallCounts::default();
    }
}

#[async_trait]
impl RemoteApi for MemoryRemote {
    async fn list_documents(&self) -> Result<Vec<RemoteEntry>, RemoteError> {
        let mut state = self.state();
        state.calls.list += 1;
        Ok(state
            .documents
            .values()
            .map(|d| RemoteEntry::from_descriptor(&d.descriptor))
            .collect())
    }

    async fn get_document(&self, name: &str) -> Result<DocumentBody, RemoteError> {
        let mut state = self.state();
        state.calls.get += 1;
        let doc = state
            .documents
            .get(name)
            .ok_or_else(|| RemoteError::Rejected(format!("document {} not found", name)))?;
        Ok(DocumentBody {
            content: doc.content.clone(),
            title: Some(doc.title.clone()),
        })
    }

    async fn add_document(&self, upload: &DocumentUpload) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.calls.add += 1;
        let actual = ContentHash::from_data(upload.content.as_bytes());
        if actual != upload.content_hash {
            return Err(RemoteError::Rejected(format!(
                "md5 mismatch for {}: declared {}, content {}",
                upload.name, upload.content_hash, actual
            )));
        }
        let doc = StoredDocument {
            descriptor: Descriptor::new(&upload.name, actual, upload.update_time),
            content: upload.content.clone(),
            title: upload.title.clone(),
            category: upload.category.clone(),
        };
        state.documents.insert(upload.name.clone(), doc);
        Ok(())
    }

    async fn delete_document(&self, name: &str) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.calls.delete += 1;
        let doc = state
            .documents
            .get_mut(name)
            .ok_or_else(|| RemoteError::Rejected(format!("document {} not found", name)))?;
        doc.descriptor.status = DocStatus::UserDeleted;
        let now = UpdateTime::now();
        if now.is_newer_than(&doc.descriptor.update_time) {
            doc.descriptor.update_time = now;
        }
        Ok(())
    }

    async fn upload_credential(&self) -> Result<String, RemoteError> {
        let mut state = self.state();
        state.calls.credential += 1;
        if state.credential_unavailable {
            return Err(RemoteError::Transport("credential service unavailable".into()));
        }
        Ok(self.credential.clone())
    }

    async fn list_categories(&self) -> Result<Vec<String>, RemoteError> {
        let mut state = self.state();
        state.calls.categories += 1;
        Ok(state.categories.clone())
    }

    async fn get_knowledge(&self, name: &str) -> Result<KnowledgeSnapshot, RemoteError> {
        let mut state = self.state();
        state.calls.kget += 1;
        let entry = state
            .knowledge
            .get(name)
            .ok_or_else(|| RemoteError::Rejected(format!("knowledge {} not found", name)))?;
        Ok(KnowledgeSnapshot {
            now_version: entry.now_version.to_string(),
            list: entry
                .versions
                .iter()
                .map(|(v, content)| KnowledgeVersion {
                    version: v.to_string(),
                    content: content.clone(),
                })
                .collect(),
        })
    }

    async fn add_knowledge(&self, upload: &KnowledgeUpload) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.calls.kadd += 1;
        let entry = state
            .knowledge
            .get_mut(&upload.name)
            .ok_or_else(|| RemoteError::Rejected(format!("knowledge {} not found", upload.name)))?;
        if upload.version < entry.now_version {
            return Err(RemoteError::Conflict(format!(
                "{}: based on version {}, server is at {}",
                STALE_VERSION_CODE, upload.version, entry.now_version
            )));
        }
        entry.now_version += 1;
        let version = entry.now_version;
        entry.versions.insert(version, upload.content.clone());
        entry.changelogs.push(upload.changelog.clone());
        Ok(())
    }

    async fn new_knowledge(&self, name: &str) -> Result<(), RemoteError> {
        let mut state = self.state();
        if state.knowledge.contains_key(name) {
            return Err(RemoteError::Rejected(format!("knowledge {} already exists", name)));
        }
        state.knowledge.insert(name.to_string(), StoredKnowledge::default());
        Ok(())
    }

    async fn relate_knowledge(&self, name: &str, alias: &str) -> Result<(), RemoteError> {
        let mut state = self.state();
        if !state.knowledge.contains_key(name) {
            return Err(RemoteError::Rejected(format!("knowledge {} not found", name)));
        }
        state.aliases.push((name.to_string(), alias.to_string()));
        Ok(())
    }

    async fn client_version(&self) -> Result<String, RemoteError> {
        Ok(self.state().version.clone())
    }
}

#[async_trait]
impl AssetStore for MemoryRemote {
    async fn upload(&self, data: Bytes, key: &str, credential: &str) -> Result<String, RemoteError> {
        let mut state = self.state();
        state.calls.upload += 1;
        if credential != self.credential {
            return Err(RemoteError::Rejected("invalid upload credential".into()));
        }
        state.assets.insert(key.to_string(), data);
        Ok(key.to_string())
    }

    async fn fetch(&self, url: &str) -> Result<Bytes, RemoteError> {
        let mut state = self.state();
        state.calls.fetch += 1;
        if state.failing_fetches.contains(url) {
            return Err(RemoteError::Transport(format!("connection reset fetching {}", url)));
        }
        state
            .foreign
            .get(url)
            .cloned()
            .ok_or_else(|| RemoteError::Transport(format!("404 fetching {}", url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> UpdateTime {
        UpdateTime::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_delete_leaves_tombstone_in_listing() {
        let remote = MemoryRemote::new();
        remote.insert_document("a.md", "body", t("2024-01-01"));
        remote.delete_document("a.md").await.unwrap();

        let list = remote.list_documents().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].status, "-2");
        assert!(list[0].to_descriptor().unwrap().is_tombstone());
    }

    #[tokio::test]
    async fn test_add_rejects_wrong_hash() {
        let remote = MemoryRemote::new();
        let upload = DocumentUpload {
            name: "a.md".into(),
            content_hash: ContentHash::from_data(b"other"),
            content: "body".into(),
            title: "a".into(),
            category: "rust".into(),
            update_time: t("2024-01-01"),
        };
        assert!(matches!(
            remote.add_document(&upload).await,
            Err(RemoteError::Rejected(_))
        ));
        assert!(remote.descriptor("a.md").is_none());
    }

    #[tokio::test]
    async fn test_knowledge_stale_push_conflicts() {
        let remote = MemoryRemote::new();
        remote.publish_knowledge("ownership", 2, "v2");

        let stale = KnowledgeUpload {
            name: "ownership".into(),
            version: 1,
            changelog: "typo".into(),
            content: "edit".into(),
        };
        assert!(matches!(
            remote.add_knowledge(&stale).await,
            Err(RemoteError::Conflict(_))
        ));

        let fresh = KnowledgeUpload { version: 2, ..stale };
        remote.add_knowledge(&fresh).await.unwrap();
        assert_eq!(remote.knowledge_versions("ownership").get(&3).unwrap(), "edit");
        assert_eq!(remote.calls().kadd, 2);
    }

    #[tokio::test]
    async fn test_upload_requires_credential() {
        let remote = MemoryRemote::new();
        let err = remote
            .upload(Bytes::from_static(b"png"), "k.png", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Rejected(_)));

        let cred = remote.upload_credential().await.unwrap();
        remote.upload(Bytes::from_static(b"png"), "k.png", &cred).await.unwrap();
        assert!(remote.assets().contains_key("k.png"));
    }
}
