//! Workspace layout
//!
//! ```text
//! <root>/
//!   .repo/objects/<hash>    content store
//!   .repo/index             article index
//!   .repo/kindex            knowledge index
//!   .repo/config.json       client configuration
//!   posts/                  article working directory
//!   knowledge/              knowledge working directory
//!   img/                    local assets referenced as ../img/<file>
//!   .ignore                 optional ignore list
//! ```

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Names never treated as documents
const STATIC_IGNORES: &[&str] = &[".DS_Store", "doc", "doc.exe"];

/// Extension of every managed document
pub const DOC_EXTENSION: &str = ".md";

#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create every directory of the layout
    pub fn init(&self) -> Result<()> {
        for dir in [
            self.objects_dir(),
            self.posts_dir(),
            self.knowledge_dir(),
            self.img_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory {:?}", dir))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.root.join(".repo")
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.repo_dir().join("objects")
    }

    pub fn index_path(&self) -> PathBuf {
        self.repo_dir().join("index")
    }

    pub fn knowledge_index_path(&self) -> PathBuf {
        self.repo_dir().join("kindex")
    }

    pub fn posts_dir(&self) -> PathBuf {
        self.root.join("posts")
    }

    pub fn knowledge_dir(&self) -> PathBuf {
        self.root.join("knowledge")
    }

    pub fn img_dir(&self) -> PathBuf {
        self.root.join("img")
    }

    pub fn post_path(&self, name: &str) -> PathBuf {
        self.posts_dir().join(name)
    }

    pub fn ignore_path(&self) -> PathBuf {
        self.root.join(".ignore")
    }

    /// Static exclusions plus the optional `.ignore` file
    pub fn ignore_list(&self) -> IgnoreList {
        let mut names: Vec<String> = STATIC_IGNORES.iter().map(|s| s.to_string()).collect();
        if let Ok(data) = fs::read_to_string(self.ignore_path()) {
            names.extend(
                data.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string),
            );
        }
        IgnoreList { names }
    }
}

/// File names excluded from batch operations
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    names: Vec<String>,
}

impl IgnoreList {
    pub fn contains(&self, name: &str) -> bool {
        name.starts_with('.') || self.names.iter().any(|n| n == name)
    }
}

/// Plain files of a working directory, minus ignored names, sorted
pub fn list_documents(dir: &Path, ignore: &IgnoreList) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e).with_context(|| format!("Failed to read directory {:?}", dir)),
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if ignore.contains(&name) {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("name is empty")]
    Empty,
    #[error("name must not contain whitespace")]
    Whitespace,
    #[error("nested paths are not supported; use a plain file name")]
    Separator,
    #[error("only .md files are supported")]
    Extension,
}

/// Lower-cased extension including the dot, ignoring any `?query` suffix
pub fn extension_of(target: &str) -> String {
    let target = target.split('?').next().unwrap_or(target);
    let file = target.rsplit(['/', '\\']).next().unwrap_or(target);
    match file.rfind('.') {
        Some(i) => file[i..].to_ascii_lowercase(),
        None => String::new(),
    }
}

/// Validate a single-level document file name
pub fn validate_doc_name(name: &str) -> std::result::Result<(), NameError> {
    validate_entry_name(name)?;
    if extension_of(name) != DOC_EXTENSION {
        return Err(NameError::Extension);
    }
    Ok(())
}

/// Validate a bare entry name (knowledge entries carry no extension)
pub fn validate_entry_name(name: &str) -> std::result::Result<(), NameError> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(NameError::Empty);
    }
    if name.chars().any(char::is_whitespace) {
        return Err(NameError::Whitespace);
    }
    if name.contains('/') || name.contains('\\') {
        return Err(NameError::Separator);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_doc_name() {
        assert!(validate_doc_name("hello.md").is_ok());
        assert!(validate_doc_name("Hello.MD").is_ok());
        assert_eq!(validate_doc_name("my doc.md"), Err(NameError::Whitespace));
        assert_eq!(validate_doc_name("a/b.md"), Err(NameError::Separator));
        assert_eq!(validate_doc_name("a\\b.md"), Err(NameError::Separator));
        assert_eq!(validate_doc_name("notes.txt"), Err(NameError::Extension));
        assert_eq!(validate_doc_name(""), Err(NameError::Empty));
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("../img/a.PNG"), ".png");
        assert_eq!(extension_of("https://x.com/a.jpg?w=100"), ".jpg");
        assert_eq!(extension_of("https://x.com/v1.2/photo"), "");
        assert_eq!(extension_of("README"), "");
    }

    #[test]
    fn test_ignore_list() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        fs::write(layout.ignore_path(), "draft.md\n\n  scratch.md  \n").unwrap();

        let ignore = layout.ignore_list();
        assert!(ignore.contains(".DS_Store"));
        assert!(ignore.contains(".hidden.md"));
        assert!(ignore.contains("draft.md"));
        assert!(ignore.contains("scratch.md"));
        assert!(!ignore.contains("post.md"));
    }

    #[test]
    fn test_list_documents_skips_dirs_and_ignored() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        layout.init().unwrap();
        let posts = layout.posts_dir();
        fs::write(posts.join("b.md"), "b").unwrap();
        fs::write(posts.join("a.md"), "a").unwrap();
        fs::write(posts.join(".DS_Store"), "").unwrap();
        fs::create_dir(posts.join("sub")).unwrap();

        let names = list_documents(&posts, &layout.ignore_list()).unwrap();
        assert_eq!(names, vec!["a.md".to_string(), "b.md".to_string()]);
    }
}
