//! zdoc core
//!
//! Local-first synchronization of Markdown documents with a remote
//! publishing service: a content-addressed object store, an index of
//! document descriptors with tombstones, image-reference migration, and
//! last-writer-wins push/pull reconciliation.

pub mod commit;
pub mod config;
pub mod descriptor;
pub mod frontmatter;
pub mod index;
pub mod knowledge;
pub mod layout;
pub mod memory;
pub mod object;
pub mod reconcile;
pub mod remote;
pub mod rewrite;
pub mod status;
pub mod storage;
pub mod version;
pub mod workspace;

pub use commit::{CommitEngine, CommitError, CommitOutcome, CommitReport, RemoveOutcome};
pub use config::{Config, Environment};
pub use descriptor::{Descriptor, DocStatus, UpdateTime};
pub use frontmatter::{FrontMatter, FrontMatterError};
pub use index::{Index, IndexFile, IndexRecord};
pub use knowledge::{
    CurrentUpdate, KnowledgeAddOutcome, KnowledgeDescriptor, KnowledgeEngine, KnowledgePullReport,
};
pub use memory::MemoryRemote;
pub use object::ContentHash;
pub use reconcile::{PullAction, PushAction, Reconciler, SyncReport};
pub use remote::{AssetStore, RemoteApi, RemoteEntry, RemoteError};
pub use rewrite::{ReferenceRewriter, RewriteError, RewriteReport};
pub use status::{CheckoutReport, StatusEntry};
pub use storage::{ObjectStore, StorageError};
pub use workspace::Workspace;
