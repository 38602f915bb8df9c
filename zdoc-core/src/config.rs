//! Client configuration
//!
//! Stored at `.repo/config.json`, loaded once per process and handed to the
//! components that need it.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::storage::write_atomic;

/// Largest document accepted by `add`, in bytes
pub const MAX_DOCUMENT_BYTES: u64 = 2 * 1024 * 1024;

const PRODUCTION_SERVER: &str = "http://z1.xiaoy.name";
const TEST_SERVER: &str = "http://10.10.80.222:8000/2016-08-15/proxy";

/// Which server deployment the client talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Test,
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "prod" | "production" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(anyhow!("Unknown environment {:?} (expected production or test)", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// User token issued by the server
    pub token: String,
    pub env: Environment,
    /// Overrides the server derived from `env`
    pub server_url: Option<String>,
    /// Prefix of permanent asset URLs
    pub asset_base_url: String,
    /// Hosts whose image links are already migrated
    pub asset_domains: Vec<String>,
    /// Asset store upload endpoint
    pub upload_url: String,
    pub retry_attempts: u32,
    pub retry_delay_secs: u64,
    pub request_timeout_secs: u64,
    pub max_document_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token: String::new(),
            env: Environment::Production,
            server_url: None,
            asset_base_url: "https://zpic.xiaoy.name".to_string(),
            asset_domains: vec!["xiaoy.name".to_string(), "jiaoliuqu.com".to_string()],
            upload_url: "http://up-z1.qiniup.com".to_string(),
            retry_attempts: 3,
            retry_delay_secs: 3,
            request_timeout_secs: 30,
            max_document_bytes: MAX_DOCUMENT_BYTES,
        }
    }
}

impl Config {
    /// Load config from a repo directory; defaults if absent.
    pub fn load(repo_dir: &Path) -> Result<Self> {
        let config_path = repo_dir.join("config.json");
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        let config: Config =
            serde_json::from_str(&data).with_context(|| "Failed to parse config JSON")?;
        Ok(config)
    }

    /// Save config to a repo directory
    pub fn save(&self, repo_dir: &Path) -> Result<()> {
        let config_path = repo_dir.join("config.json");
        let data = serde_json::to_vec_pretty(self)?;
        write_atomic(&config_path, &data)?;
        Ok(())
    }

    pub fn server_url(&self) -> String {
        let url = match (&self.server_url, self.env) {
            (Some(url), _) if !url.trim().is_empty() => url.as_str(),
            (_, Environment::Test) => TEST_SERVER,
            (_, Environment::Production) => PRODUCTION_SERVER,
        };
        url.trim_end_matches('/').to_string()
    }

    /// Permanent URL of an uploaded asset key
    pub fn asset_url(&self, key: &str) -> String {
        format!("{}/{}", self.asset_base_url.trim_end_matches('/'), key)
    }

    /// Whether a reference already points at the permanent asset store:
    /// under `asset_base_url`, or hosted on an asset domain or a subdomain
    /// of one.
    pub fn is_permanent_asset(&self, target: &str) -> bool {
        let base = self.asset_base_url.trim_end_matches('/');
        if !base.is_empty() {
            if let Some(rest) = target.strip_prefix(base) {
                if rest.is_empty() || rest.starts_with('/') {
                    return true;
                }
            }
        }
        let Some(host) = url_host(target) else {
            return false;
        };
        self.asset_domains.iter().any(|d| {
            let d = d.trim().trim_matches('.').to_ascii_lowercase();
            !d.is_empty()
                && (host == d
                    || host
                        .strip_suffix(d.as_str())
                        .is_some_and(|sub| sub.ends_with('.')))
        })
    }

    pub fn require_token(&self) -> Result<&str> {
        let token = self.token.trim();
        if token.is_empty() {
            return Err(anyhow!(
                "No user token configured. Copy your token from the app and run `doc init <token>`."
            ));
        }
        Ok(token)
    }
}

/// Lower-cased host of an absolute `scheme://` URL
fn url_host(target: &str) -> Option<String> {
    let (_, rest) = target.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = host_port.split(':').next().unwrap_or(host_port);
    (!host.is_empty()).then(|| host.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load(tmp.path()).unwrap();
        assert!(config.token.is_empty());
        assert_eq!(config.max_document_bytes, 2_097_152);
        assert_eq!(config.retry_attempts, 3);
        assert!(config.require_token().is_err());
    }

    #[test]
    fn test_save_load() {
        let tmp = TempDir::new().unwrap();
        let config = Config {
            token: "tok-123".into(),
            env: Environment::Test,
            ..Default::default()
        };
        config.save(tmp.path()).unwrap();

        let loaded = Config::load(tmp.path()).unwrap();
        assert_eq!(loaded.token, "tok-123");
        assert_eq!(loaded.env, Environment::Test);
        assert_eq!(loaded.server_url(), TEST_SERVER);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("config.json"), r#"{"token":"abc"}"#).unwrap();
        let config = Config::load(tmp.path()).unwrap();
        assert_eq!(config.require_token().unwrap(), "abc");
        assert_eq!(config.server_url(), PRODUCTION_SERVER);
    }

    #[test]
    fn test_server_override() {
        let config = Config {
            server_url: Some("http://localhost:9000/".into()),
            ..Default::default()
        };
        assert_eq!(config.server_url(), "http://localhost:9000");
    }

    #[test]
    fn test_permanent_asset_detection() {
        let config = Config::default();
        assert!(config.is_permanent_asset("https://zpic.xiaoy.name/abc1700000000xyz.png"));
        assert!(config.is_permanent_asset("https://zpic.jiaoliuqu.com/old.png"));
        assert!(!config.is_permanent_asset("../img/cat.png"));
        assert!(!config.is_permanent_asset("https://example.com/cat.png"));
        assert!(config.is_permanent_asset("http://XIAOY.name:8080/a.png"));

        // the domain has to be the host, not just appear in the URL
        assert!(!config.is_permanent_asset("https://evil.com/xiaoy.name.png"));
        assert!(!config.is_permanent_asset("https://notxiaoy.name/a.png"));
        assert!(!config.is_permanent_asset("https://xiaoy.name.evil.com/a.png"));
        assert!(!config.is_permanent_asset("https://zpic.xiaoy.name.evil.com/a.png"));
        assert!(!config.is_permanent_asset("https://evil.com/?u=https://zpic.xiaoy.name/a.png"));
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!("test".parse::<Environment>().unwrap(), Environment::Test);
        assert_eq!("".parse::<Environment>().unwrap(), Environment::Production);
        assert!("staging".parse::<Environment>().is_err());
    }
}
