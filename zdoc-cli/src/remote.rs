//! HTTP client for the document server.
//!
//! Every call is a form POST to `{server}/info/client?action=<op>&token=<token>`
//! answered by a JSON envelope `{msg, data, response_status}`. Read calls are
//! retried on transport failures and undecodable bodies; write calls are
//! sent once.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use zdoc_core::Config;
use zdoc_core::remote::{
    DocumentBody, DocumentUpload, KnowledgeSnapshot, KnowledgeUpload, RemoteApi, RemoteEntry,
    RemoteError,
};

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    response_status: String,
}

#[derive(Debug, Deserialize)]
struct Category {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Credential {
    #[serde(default)]
    token: String,
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(default)]
    version: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Read,
    Write,
}

/// [`RemoteApi`] over HTTP
pub struct HttpRemote {
    server: String,
    token: String,
    http: reqwest::Client,
    attempts: u32,
    delay: Duration,
}

impl HttpRemote {
    pub fn new(config: &Config) -> Result<Self> {
        let token = config.require_token()?.to_string();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            server: config.server_url(),
            token,
            http,
            attempts: config.retry_attempts.max(1),
            delay: Duration::from_secs(config.retry_delay_secs),
        })
    }

    async fn post_once(&self, path: &str, query: &[(&str, &str)], form: &[(&str, &str)]) -> Result<serde_json::Value, RemoteError> {
        let url = format!("{}{}", self.server, path);
        let resp = self
            .http
            .post(&url)
            .query(query)
            .form(form)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(format!("{}: {}", url, e)))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| RemoteError::Transport(format!("{}: {}", url, e)))?;
        if !status.is_success() {
            return Err(RemoteError::Transport(format!("{} returned {}: {}", url, status, body)));
        }

        let envelope: Envelope = serde_json::from_str(&body)
            .map_err(|e| RemoteError::Shape(format!("{}: {} in {:?}", url, e, body)))?;
        if envelope.response_status != "success" {
            return Err(RemoteError::from_server_message(&envelope.msg));
        }
        Ok(envelope.data)
    }

    async fn post(&self, kind: CallKind, path: &str, query: &[(&str, &str)], form: &[(&str, &str)]) -> Result<serde_json::Value, RemoteError> {
        let attempts = match kind {
            CallKind::Read => self.attempts,
            CallKind::Write => 1,
        };
        let mut attempt = 1;
        loop {
            match self.post_once(path, query, form).await {
                Ok(data) => return Ok(data),
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!("{} failed (attempt {}/{}): {}", path, attempt, attempts, e);
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn action(&self, kind: CallKind, action: &str, form: &[(&str, &str)]) -> Result<serde_json::Value, RemoteError> {
        debug!("RPC {}", action);
        self.post(
            kind,
            "/info/client",
            &[("action", action), ("token", self.token.as_str())],
            form,
        )
        .await
    }
}

fn decode<T: DeserializeOwned>(action: &str, data: serde_json::Value) -> Result<T, RemoteError> {
    serde_json::from_value(data.clone())
        .map_err(|e| RemoteError::Shape(format!("{}: {} in {}", action, e, data)))
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn list_documents(&self) -> Result<Vec<RemoteEntry>, RemoteError> {
        let data = self.action(CallKind::Read, "getList", &[]).await?;
        if data.is_null() {
            return Ok(Vec::new());
        }
        decode("getList", data)
    }

    async fn get_document(&self, name: &str) -> Result<DocumentBody, RemoteError> {
        let data = self
            .action(CallKind::Read, "get", &[("filename", name)])
            .await?;
        decode("get", data)
    }

    async fn add_document(&self, upload: &DocumentUpload) -> Result<(), RemoteError> {
        let md5 = upload.content_hash.to_string();
        let update_time = upload.update_time.to_string();
        self.action(
            CallKind::Write,
            "add",
            &[
                ("filename", upload.name.as_str()),
                ("md5", md5.as_str()),
                ("content", upload.content.as_str()),
                ("title", upload.title.as_str()),
                ("category", upload.category.as_str()),
                ("updateTime", update_time.as_str()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn delete_document(&self, name: &str) -> Result<(), RemoteError> {
        self.action(CallKind::Write, "delete", &[("filename", name)])
            .await?;
        Ok(())
    }

    async fn upload_credential(&self) -> Result<String, RemoteError> {
        let data = self
            .post(
                CallKind::Read,
                "/basic/getPicToken",
                &[("token", self.token.as_str())],
                &[],
            )
            .await?;
        let credential: Credential = decode("getPicToken", data)?;
        if credential.token.is_empty() {
            return Err(RemoteError::Shape("getPicToken returned an empty token".into()));
        }
        Ok(credential.token)
    }

    async fn list_categories(&self) -> Result<Vec<String>, RemoteError> {
        let data = self.action(CallKind::Read, "getCategory", &[]).await?;
        if data.is_null() {
            return Ok(Vec::new());
        }
        let categories: Vec<Category> = decode("getCategory", data)?;
        Ok(categories.into_iter().map(|c| c.name).collect())
    }

    async fn get_knowledge(&self, name: &str) -> Result<KnowledgeSnapshot, RemoteError> {
        let data = self
            .action(CallKind::Read, "kget", &[("kname", name)])
            .await?;
        decode("kget", data)
    }

    async fn add_knowledge(&self, upload: &KnowledgeUpload) -> Result<(), RemoteError> {
        let version = upload.version.to_string();
        self.action(
            CallKind::Write,
            "kadd",
            &[
                ("kname", upload.name.as_str()),
                ("version", version.as_str()),
                ("change_log", upload.changelog.as_str()),
                ("file_content", upload.content.as_str()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn new_knowledge(&self, name: &str) -> Result<(), RemoteError> {
        self.action(CallKind::Write, "knew", &[("kname", name)])
            .await?;
        Ok(())
    }

    async fn relate_knowledge(&self, name: &str, alias: &str) -> Result<(), RemoteError> {
        self.action(
            CallKind::Write,
            "krel",
            &[("kname", name), ("like_name", alias)],
        )
        .await?;
        Ok(())
    }

    async fn client_version(&self) -> Result<String, RemoteError> {
        let data = self.action(CallKind::Read, "version", &[]).await?;
        let info: VersionInfo = decode("version", data)?;
        Ok(info.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_defaults() {
        let env: Envelope = serde_json::from_str(r#"{"response_status":"fail","msg":"i1069"}"#).unwrap();
        assert_eq!(env.response_status, "fail");
        assert!(env.data.is_null());
        assert!(matches!(
            RemoteError::from_server_message(&env.msg),
            RemoteError::Conflict(_)
        ));
    }

    #[test]
    fn test_decode_list() {
        let data = serde_json::json!([
            {"file_name": "a.md", "file_md5": "h1", "update_time": "2024-01-01 00:00:00", "status": "1"},
            {"file_name": "b.md", "file_md5": "h2", "update_time": "2024-01-01 00:00:00", "status": -3}
        ]);
        let entries: Vec<RemoteEntry> = decode("getList", data).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].status, "-3");
    }

    #[test]
    fn test_decode_shape_error() {
        let err = decode::<Vec<Category>>("getCategory", serde_json::json!({"oops": 1})).unwrap_err();
        assert!(matches!(err, RemoteError::Shape(_)));
    }

    #[test]
    fn test_requires_token() {
        assert!(HttpRemote::new(&Config::default()).is_err());
        let config = Config {
            token: "t".into(),
            ..Default::default()
        };
        let remote = HttpRemote::new(&config).unwrap();
        assert_eq!(remote.attempts, 3);
        assert_eq!(remote.server, "http://z1.xiaoy.name");
    }
}
