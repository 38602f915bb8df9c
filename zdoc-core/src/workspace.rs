//! Opened workspace: layout, configuration, object store and both indexes

use anyhow::{Context, Result, anyhow};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::Config;
use crate::descriptor::Descriptor;
use crate::frontmatter::article_template;
use crate::index::{Index, IndexFile};
use crate::knowledge::KnowledgeDescriptor;
use crate::layout::{DOC_EXTENSION, Layout, validate_doc_name};
use crate::object::ContentHash;
use crate::storage::{self, ObjectStore};

#[derive(Debug, Clone)]
pub struct Workspace {
    layout: Layout,
    config: Config,
    objects: ObjectStore,
    index: IndexFile<Descriptor>,
    knowledge_index: IndexFile<KnowledgeDescriptor>,
}

impl Workspace {
    /// Create the layout and persist `config`
    pub fn init(root: impl Into<PathBuf>, config: Config) -> Result<Self> {
        let ws = Self::with_config(root, config)?;
        ws.config.save(&ws.layout.repo_dir())?;
        info!("Initialized workspace at {:?}", ws.layout.root());
        Ok(ws)
    }

    /// Open a workspace, creating any missing directories
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let layout = Layout::new(root);
        let config = Config::load(&layout.repo_dir())?;
        Self::with_layout(layout, config)
    }

    /// Open with an explicit configuration that is not persisted
    pub fn with_config(root: impl Into<PathBuf>, config: Config) -> Result<Self> {
        Self::with_layout(Layout::new(root), config)
    }

    fn with_layout(layout: Layout, config: Config) -> Result<Self> {
        layout.init()?;
        let objects = ObjectStore::open(layout.objects_dir())?;
        Ok(Self {
            index: IndexFile::new(layout.index_path()),
            knowledge_index: IndexFile::new(layout.knowledge_index_path()),
            layout,
            config,
            objects,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn index(&self) -> &IndexFile<Descriptor> {
        &self.index
    }

    pub fn knowledge_index(&self) -> &IndexFile<KnowledgeDescriptor> {
        &self.knowledge_index
    }

    /// Remove a blob unless a live record of either index still refers to it
    pub(crate) fn release_blob(
        &self,
        hash: &ContentHash,
        articles: &Index<Descriptor>,
        knowledge: &Index<KnowledgeDescriptor>,
    ) -> storage::Result<()> {
        if articles.references(hash) || knowledge.references(hash) {
            debug!("Blob {} still referenced, keeping it", hash);
            return Ok(());
        }
        debug!("Removing blob {}", hash);
        self.objects.remove(hash)
    }

    /// Scaffold a new article in `posts/`. A name without `.md` gets it.
    pub fn create_article(&self, name: &str, category: &str) -> Result<PathBuf> {
        let stem = name.split('.').next().unwrap_or(name);
        let file_name = format!("{}{}", stem, DOC_EXTENSION);
        validate_doc_name(&file_name).map_err(|e| anyhow!("Invalid name {:?}: {}", name, e))?;

        let path = self.layout.post_path(&file_name);
        if path.exists() {
            return Err(anyhow!("{} already exists", file_name));
        }
        fs::write(&path, article_template(stem, category))
            .with_context(|| format!("Failed to create {:?}", path))?;
        info!("Created {}", file_name);
        Ok(path)
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }
}
