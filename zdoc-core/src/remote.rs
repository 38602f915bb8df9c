//! Remote service contract
//!
//! The server and the asset store are consumed through two traits so the
//! engines can run against the HTTP client in the CLI or the in-memory
//! implementation in [`crate::memory`]. Wire records mirror the server's JSON
//! field names; they are validated into typed descriptors before use.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};

use crate::descriptor::{Descriptor, DocStatus, UpdateTime};
use crate::object::ContentHash;

/// Server message code for a push based on a stale version
pub const STALE_VERSION_CODE: &str = "i1069";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("server rejected request: {0}")]
    Rejected(String),

    #[error("unexpected payload: {0}")]
    Shape(String),

    #[error("stale version: {0}")]
    Conflict(String),
}

impl RemoteError {
    /// Classify a server-side error message
    pub fn from_server_message(msg: &str) -> Self {
        if msg.contains(STALE_VERSION_CODE) {
            RemoteError::Conflict(msg.to_string())
        } else {
            RemoteError::Rejected(msg.to_string())
        }
    }

    /// Whether repeating the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transport(_) | RemoteError::Shape(_))
    }
}

/// Accept a JSON string, number or null as a string
pub(crate) fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// One row of the server's document list, as sent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    #[serde(default, deserialize_with = "lenient_string")]
    pub file_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub file_md5: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub update_time: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: String,
}

impl RemoteEntry {
    pub fn from_descriptor(desc: &Descriptor) -> Self {
        let status = match desc.status {
            DocStatus::Active => "1",
            DocStatus::UserDeleted => "-2",
            DocStatus::AdminDeleted => "-3",
        };
        Self {
            file_name: desc.name.clone(),
            file_md5: desc.content_hash.to_string(),
            update_time: desc.update_time.to_string(),
            status: status.to_string(),
        }
    }

    /// Validate into a descriptor; incomplete rows are shape errors
    pub fn to_descriptor(&self) -> Result<Descriptor, RemoteError> {
        if self.file_name.is_empty() || self.file_md5.is_empty() || self.update_time.is_empty() {
            return Err(RemoteError::Shape(format!(
                "incomplete entry: file={:?} md5={:?} time={:?}",
                self.file_name, self.file_md5, self.update_time
            )));
        }
        let update_time = UpdateTime::parse(&self.update_time).ok_or_else(|| {
            RemoteError::Shape(format!(
                "unparsable update_time {:?} for {}",
                self.update_time, self.file_name
            ))
        })?;
        Ok(Descriptor {
            name: self.file_name.clone(),
            content_hash: ContentHash::from_hex(self.file_md5.as_str()),
            update_time,
            status: DocStatus::from_wire(&self.status),
        })
    }
}

/// Full document returned by `get`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentBody {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Payload of `add`
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentUpload {
    pub name: String,
    pub content_hash: ContentHash,
    pub content: String,
    pub title: String,
    pub category: String,
    pub update_time: UpdateTime,
}

/// One historical version of a knowledge entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeVersion {
    #[serde(default, deserialize_with = "lenient_string")]
    pub version: String,
    #[serde(default)]
    pub content: String,
}

/// Server view of a knowledge entry: its published history and the newest
/// version number, which may not have content yet while under review
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSnapshot {
    #[serde(default, deserialize_with = "lenient_string")]
    pub now_version: String,
    #[serde(default)]
    pub list: Vec<KnowledgeVersion>,
}

/// Payload of `kadd`
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeUpload {
    pub name: String,
    /// Version the local edit was based on
    pub version: u32,
    pub changelog: String,
    pub content: String,
}

/// RPC surface of the document server
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list_documents(&self) -> Result<Vec<RemoteEntry>, RemoteError>;

    async fn get_document(&self, name: &str) -> Result<DocumentBody, RemoteError>;

    async fn add_document(&self, upload: &DocumentUpload) -> Result<(), RemoteError>;

    async fn delete_document(&self, name: &str) -> Result<(), RemoteError>;

    /// Short-lived credential for the asset store
    async fn upload_credential(&self) -> Result<String, RemoteError>;

    async fn list_categories(&self) -> Result<Vec<String>, RemoteError>;

    async fn get_knowledge(&self, name: &str) -> Result<KnowledgeSnapshot, RemoteError>;

    /// Fails with [`RemoteError::Conflict`] when `upload.version` is stale
    async fn add_knowledge(&self, upload: &KnowledgeUpload) -> Result<(), RemoteError>;

    async fn new_knowledge(&self, name: &str) -> Result<(), RemoteError>;

    async fn relate_knowledge(&self, name: &str, alias: &str) -> Result<(), RemoteError>;

    /// Currently published client version
    async fn client_version(&self) -> Result<String, RemoteError>;
}

/// Binary asset storage
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Store `data` under `key`; returns the key the store assigned
    async fn upload(&self, data: Bytes, key: &str, credential: &str) -> Result<String, RemoteError>;

    /// Download a foreign asset
    async fn fetch(&self, url: &str) -> Result<Bytes, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_validation() {
        let entry = RemoteEntry {
            file_name: "a.md".into(),
            file_md5: "h1".into(),
            update_time: "2024-01-01 00:00:00".into(),
            status: "1".into(),
        };
        let desc = entry.to_descriptor().unwrap();
        assert_eq!(desc.name, "a.md");
        assert_eq!(desc.status, DocStatus::Active);

        let missing = RemoteEntry {
            file_md5: String::new(),
            ..entry.clone()
        };
        assert!(matches!(missing.to_descriptor(), Err(RemoteError::Shape(_))));

        let bad_time = RemoteEntry {
            update_time: "soon".into(),
            ..entry
        };
        assert!(matches!(bad_time.to_descriptor(), Err(RemoteError::Shape(_))));
    }

    #[test]
    fn test_entry_accepts_numeric_fields() {
        let json = r#"{"file_name":"a.md","file_md5":"h1","update_time":"2024-01-01","status":-2}"#;
        let entry: RemoteEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.status, "-2");
        assert_eq!(entry.to_descriptor().unwrap().status, DocStatus::UserDeleted);
    }

    #[test]
    fn test_descriptor_wire_roundtrip() {
        let desc = Descriptor {
            name: "b.md".into(),
            content_hash: ContentHash::from_hex("h2"),
            update_time: UpdateTime::parse("2024-02-01").unwrap(),
            status: DocStatus::AdminDeleted,
        };
        let entry = RemoteEntry::from_descriptor(&desc);
        assert_eq!(entry.status, "-3");
        assert_eq!(entry.to_descriptor().unwrap(), desc);
    }

    #[test]
    fn test_server_message_classification() {
        assert!(matches!(
            RemoteError::from_server_message("errMsg:i1069 version outdated"),
            RemoteError::Conflict(_)
        ));
        assert!(matches!(
            RemoteError::from_server_message("token invalid"),
            RemoteError::Rejected(_)
        ));
        assert!(RemoteError::Transport("timeout".into()).is_transient());
        assert!(!RemoteError::Rejected("no".into()).is_transient());
    }
}
