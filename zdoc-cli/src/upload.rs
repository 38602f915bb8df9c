//! Asset store uploads and foreign image downloads

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use zdoc_core::Config;
use zdoc_core::remote::{AssetStore, RemoteError};

#[derive(Debug, Deserialize)]
struct UploadReply {
    #[serde(default)]
    key: String,
}

/// [`AssetStore`] backed by a multipart upload endpoint
pub struct HttpAssetStore {
    upload_url: String,
    http: reqwest::Client,
}

impl HttpAssetStore {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            upload_url: config.upload_url.clone(),
            http,
        })
    }
}

#[async_trait]
impl AssetStore for HttpAssetStore {
    async fn upload(&self, data: Bytes, key: &str, credential: &str) -> Result<String, RemoteError> {
        let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name(key.to_string());
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("key", key.to_string())
            .text("token", credential.to_string());

        let resp = self
            .http
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(format!("upload {}: {}", key, e)))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| RemoteError::Transport(format!("upload {}: {}", key, e)))?;
        if !status.is_success() {
            return Err(RemoteError::Rejected(format!(
                "upload {} returned {}: {}",
                key, status, body
            )));
        }

        let reply: UploadReply = serde_json::from_str(&body)
            .map_err(|e| RemoteError::Shape(format!("upload {}: {} in {:?}", key, e, body)))?;
        debug!("Asset store accepted {}", reply.key);
        if reply.key.is_empty() {
            Ok(key.to_string())
        } else {
            Ok(reply.key)
        }
    }

    async fn fetch(&self, url: &str) -> Result<Bytes, RemoteError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(format!("{}: {}", url, e)))?;
        if !resp.status().is_success() {
            return Err(RemoteError::Transport(format!("{} returned {}", url, resp.status())));
        }
        resp.bytes()
            .await
            .map_err(|e| RemoteError::Transport(format!("{}: {}", url, e)))
    }
}
