//! Image reference rewriting
//!
//! Before a document is committed, every Markdown image reference that does
//! not already point at the permanent asset store is uploaded there and the
//! reference is replaced by the permanent URL. Local images are expected at
//! `../img/<file>` relative to the document; remote images are downloaded
//! into `img/` first so a copy stays in the workspace.

use bytes::Bytes;
use rand::Rng;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::layout::extension_of;
use crate::remote::{AssetStore, RemoteApi, RemoteError};
use crate::storage::{StorageError, write_atomic};

/// Image formats that are migrated
pub const SUPPORTED_EXTENSIONS: &[&str] = &[".jpeg", ".gif", ".png", ".jpg"];

const KEY_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not obtain an upload credential: {0}")]
    Credential(#[source] RemoteError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Why a reference was left alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnsupportedExtension(String),
    AlreadyMigrated,
    OutsideImageDir,
}

#[derive(Debug, Clone, Default)]
pub struct RewriteReport {
    /// (original target, permanent URL)
    pub replaced: Vec<(String, String)>,
    pub skipped: Vec<(String, SkipReason)>,
    /// (original target, error) for references left unchanged
    pub failed: Vec<(String, String)>,
    /// Whether the document was rewritten on disk
    pub changed: bool,
}

enum Source {
    Local(PathBuf),
    Url(String),
}

struct Candidate {
    target: String,
    ext: String,
    source: Source,
}

fn image_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"!\[[^\]]*\]\(\s*([^)\s]+)(?:\s+"[^"]*")?\s*\)"#)
            .expect("valid image regex")
    })
}

/// Image targets in order of first appearance, without duplicates
pub fn image_targets(text: &str) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    for caps in image_pattern().captures_iter(text) {
        let target = caps[1].to_string();
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    targets
}

/// `<3 random>` + unix seconds + `<3 random>` + extension
pub fn generate_key(ext: &str) -> String {
    let mut rng = rand::thread_rng();
    let mut random = |n: usize| -> String {
        (0..n)
            .map(|_| KEY_ALPHABET[rng.gen_range(0..KEY_ALPHABET.len())] as char)
            .collect()
    };
    let head = random(3);
    let tail = random(3);
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("{}{}{}{}", head, secs, tail, ext)
}

fn is_url(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://")
}

/// Resolve `../img/<file>` against the document's directory
fn local_image_path(doc_path: &Path, target: &str) -> Option<PathBuf> {
    let rest = target
        .strip_prefix("../img/")
        .or_else(|| target.strip_prefix("..\\img\\"))?;
    let rest = rest.replace('\\', "/");
    if rest.is_empty() || rest.split('/').any(|part| part == ".." || part.is_empty()) {
        return None;
    }
    let doc_dir = doc_path.parent()?;
    let mut path = doc_dir.join("..").join("img");
    for part in rest.split('/') {
        path.push(part);
    }
    Some(path)
}

/// Uploads a document's images and rewrites its references
pub struct ReferenceRewriter<'a> {
    config: &'a Config,
    remote: &'a dyn RemoteApi,
    assets: &'a dyn AssetStore,
    img_dir: PathBuf,
}

impl<'a> ReferenceRewriter<'a> {
    pub fn new(
        config: &'a Config,
        remote: &'a dyn RemoteApi,
        assets: &'a dyn AssetStore,
        img_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            remote,
            assets,
            img_dir: img_dir.into(),
        }
    }

    fn classify(&self, doc_path: &Path, target: &str) -> Result<Candidate, SkipReason> {
        let ext = extension_of(target);
        if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(SkipReason::UnsupportedExtension(ext));
        }
        if self.config.is_permanent_asset(target) {
            return Err(SkipReason::AlreadyMigrated);
        }
        let source = if is_url(target) {
            Source::Url(target.to_string())
        } else {
            Source::Local(local_image_path(doc_path, target).ok_or(SkipReason::OutsideImageDir)?)
        };
        Ok(Candidate {
            target: target.to_string(),
            ext,
            source,
        })
    }

    async fn load(&self, candidate: &Candidate, key: &str) -> Result<Bytes, String> {
        match &candidate.source {
            Source::Local(path) => fs::read(path)
                .map(Bytes::from)
                .map_err(|e| format!("failed to read {:?}: {}", path, e)),
            Source::Url(url) => {
                let data = self.assets.fetch(url).await.map_err(|e| e.to_string())?;
                let cached = self.img_dir.join(key);
                if let Err(e) = write_atomic(&cached, &data) {
                    warn!("Failed to keep a local copy of {}: {}", url, e);
                }
                Ok(data)
            }
        }
    }

    /// Rewrite the document at `doc_path` in place. The file is only written
    /// when at least one reference changed; failed references stay as they
    /// were.
    pub async fn rewrite(&self, doc_path: &Path) -> Result<RewriteReport, RewriteError> {
        let raw = fs::read(doc_path).map_err(|source| RewriteError::Read {
            path: doc_path.to_path_buf(),
            source,
        })?;
        let mut text = String::from_utf8_lossy(&raw).into_owned();

        let mut report = RewriteReport::default();
        let mut candidates = Vec::new();
        for target in image_targets(&text) {
            match self.classify(doc_path, &target) {
                Ok(candidate) => candidates.push(candidate),
                Err(reason) => {
                    debug!("Skipping image {}: {:?}", target, reason);
                    report.skipped.push((target, reason));
                }
            }
        }
        if candidates.is_empty() {
            return Ok(report);
        }

        let credential = self
            .remote
            .upload_credential()
            .await
            .map_err(RewriteError::Credential)?;

        for candidate in &candidates {
            let key = generate_key(&candidate.ext);
            let uploaded = match self.load(candidate, &key).await {
                Ok(data) => self
                    .assets
                    .upload(data, &key, &credential)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e),
            };
            match uploaded {
                Ok(stored_key) => {
                    let url = self.config.asset_url(&stored_key);
                    info!("Uploaded {} as {}", candidate.target, url);
                    text = text.replace(&candidate.target, &url);
                    report.replaced.push((candidate.target.clone(), url));
                }
                Err(e) => {
                    warn!("Failed to migrate image {}: {}", candidate.target, e);
                    report.failed.push((candidate.target.clone(), e));
                }
            }
        }

        if !report.replaced.is_empty() {
            write_atomic(doc_path, text.as_bytes())?;
            report.changed = true;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRemote;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        doc: PathBuf,
        img: PathBuf,
    }

    fn fixture(body: &str) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let posts = tmp.path().join("posts");
        let img = tmp.path().join("img");
        fs::create_dir_all(&posts).unwrap();
        fs::create_dir_all(&img).unwrap();
        let doc = posts.join("a.md");
        fs::write(&doc, body).unwrap();
        Fixture { _tmp: tmp, doc, img }
    }

    #[test]
    fn test_image_targets() {
        let text = "![a](../img/a.png) text ![](https://x.com/b.jpg \"title\")\n![a again](../img/a.png) [link](c.png)";
        assert_eq!(image_targets(text), vec!["../img/a.png", "https://x.com/b.jpg"]);
    }

    #[test]
    fn test_generate_key_shape() {
        let key = generate_key(".png");
        assert!(key.ends_with(".png"));
        let stem = key.trim_end_matches(".png");
        assert!(stem.len() >= 3 + 10 + 3);
        assert!(stem.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert!(stem[3..stem.len() - 3].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_local_image_path() {
        let doc = Path::new("/w/posts/a.md");
        assert_eq!(
            local_image_path(doc, "../img/cat.png"),
            Some(PathBuf::from("/w/posts/../img/cat.png"))
        );
        assert!(local_image_path(doc, "..\\img\\cat.png").is_some());
        assert!(local_image_path(doc, "img/cat.png").is_none());
        assert!(local_image_path(doc, "../img/../../etc/x.png").is_none());
        assert!(local_image_path(doc, "/abs/cat.png").is_none());
    }

    #[tokio::test]
    async fn test_rewrites_local_and_remote_images() {
        let fx = fixture(
            "---\ntitle: a\n---\n![x](../img/x.png) ![x](../img/x.png)\n![y](https://other.com/y.jpg)\n",
        );
        fs::write(fx.img.join("x.png"), b"local png").unwrap();
        let remote = MemoryRemote::new();
        remote.serve_foreign("https://other.com/y.jpg", b"remote jpg");
        let config = Config::default();

        let rewriter = ReferenceRewriter::new(&config, &remote, &remote, &fx.img);
        let report = rewriter.rewrite(&fx.doc).await.unwrap();

        assert!(report.changed);
        assert_eq!(report.replaced.len(), 2);
        let text = fs::read_to_string(&fx.doc).unwrap();
        assert!(!text.contains("../img/x.png"));
        assert!(!text.contains("other.com"));
        assert_eq!(text.matches(&config.asset_base_url).count(), 3);

        let assets = remote.assets();
        assert_eq!(assets.len(), 2);
        assert!(assets.values().any(|b| b.as_ref() == b"local png"));
        // downloaded copy kept next to the local images
        assert_eq!(fs::read_dir(&fx.img).unwrap().count(), 2);
        assert_eq!(remote.calls().credential, 1);
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let fx = fixture("![x](../img/x.png)\n");
        fs::write(fx.img.join("x.png"), b"png").unwrap();
        let remote = MemoryRemote::new();
        let config = Config::default();
        let rewriter = ReferenceRewriter::new(&config, &remote, &remote, &fx.img);

        rewriter.rewrite(&fx.doc).await.unwrap();
        remote.reset_calls();
        let report = rewriter.rewrite(&fx.doc).await.unwrap();

        assert!(!report.changed);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(remote.calls().upload, 0);
        assert_eq!(remote.calls().credential, 0);
    }

    #[tokio::test]
    async fn test_skips_unsupported_and_migrated() {
        let body = "![a](../img/a.svg) ![b](https://zpic.xiaoy.name/b.png) ![c](img/c.png)\n";
        let fx = fixture(body);
        let remote = MemoryRemote::new();
        let config = Config::default();
        let rewriter = ReferenceRewriter::new(&config, &remote, &remote, &fx.img);

        let report = rewriter.rewrite(&fx.doc).await.unwrap();
        assert!(!report.changed);
        assert_eq!(
            report.skipped.iter().map(|(_, r)| r.clone()).collect::<Vec<_>>(),
            vec![
                SkipReason::UnsupportedExtension(".svg".into()),
                SkipReason::AlreadyMigrated,
                SkipReason::OutsideImageDir,
            ]
        );
        assert_eq!(fs::read_to_string(&fx.doc).unwrap(), body);
        assert_eq!(remote.calls().credential, 0);
    }

    #[tokio::test]
    async fn test_failed_reference_is_left_in_place() {
        let fx = fixture("![x](../img/x.png) ![y](https://other.com/y.png)\n");
        fs::write(fx.img.join("x.png"), b"png").unwrap();
        let remote = MemoryRemote::new();
        remote.fail_fetch("https://other.com/y.png");
        let config = Config::default();
        let rewriter = ReferenceRewriter::new(&config, &remote, &remote, &fx.img);

        let report = rewriter.rewrite(&fx.doc).await.unwrap();
        assert!(report.changed);
        assert_eq!(report.failed.len(), 1);
        let text = fs::read_to_string(&fx.doc).unwrap();
        assert!(text.contains("https://other.com/y.png"));
        assert!(!text.contains("../img/x.png"));
    }

    #[tokio::test]
    async fn test_missing_credential_aborts_without_writing() {
        let body = "![x](../img/x.png)\n";
        let fx = fixture(body);
        fs::write(fx.img.join("x.png"), b"png").unwrap();
        let remote = MemoryRemote::new();
        remote.set_credential_unavailable(true);
        let config = Config::default();
        let rewriter = ReferenceRewriter::new(&config, &remote, &remote, &fx.img);

        let err = rewriter.rewrite(&fx.doc).await.unwrap_err();
        assert!(matches!(err, RewriteError::Credential(_)));
        assert_eq!(fs::read_to_string(&fx.doc).unwrap(), body);
        assert_eq!(remote.calls().upload, 0);
    }

    #[tokio::test]
    async fn test_non_utf8_document_is_read_lossily() {
        let fx = fixture("");
        let latin1 = b"caf\xe9 au lait\n".to_vec();
        fs::write(&fx.doc, &latin1).unwrap();
        let remote = MemoryRemote::new();
        let config = Config::default();
        let rewriter = ReferenceRewriter::new(&config, &remote, &remote, &fx.img);

        let report = rewriter.rewrite(&fx.doc).await.unwrap();
        assert!(!report.changed);
        assert_eq!(fs::read(&fx.doc).unwrap(), latin1);

        fs::write(fx.img.join("x.png"), b"png").unwrap();
        fs::write(&fx.doc, b"caf\xe9 ![x](../img/x.png)\n").unwrap();
        let report = rewriter.rewrite(&fx.doc).await.unwrap();
        assert!(report.changed);
        let text = fs::read_to_string(&fx.doc).unwrap();
        assert!(text.contains(&config.asset_base_url));
        assert!(!text.contains("../img/x.png"));
    }

    #[test]
    fn test_image_pattern_handles_titles() {
        assert_eq!(
            image_targets(r#"![a](../img/a.png "A title") ![b]( ../img/b.jpg )"#),
            vec!["../img/a.png", "../img/b.jpg"]
        );
    }
}
