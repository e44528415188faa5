use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Opaque, provider-issued reference to a node in a document tree.
///
/// Handles are compared by equality only. They carry no path structure that
/// callers may rely on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentHandle(String);

impl DocumentHandle {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentHandle {
    fn from(uri: &str) -> Self {
        Self::new(uri)
    }
}

/// Snapshot of a tree node as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentNode {
    pub handle: DocumentHandle,
    /// Display name of the node (physical file name for documents)
    pub name: String,
    pub is_directory: bool,
    /// Last modified timestamp (Unix milliseconds)
    pub last_modified: i64,
}

/// Result of enumerating the children of a directory.
///
/// An unreadable directory is kept apart from an empty one so callers can
/// report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing {
    Empty,
    Entries(Vec<DocumentNode>),
    Unreadable(String),
}

impl Listing {
    pub fn from_entries(entries: Vec<DocumentNode>) -> Self {
        if entries.is_empty() {
            Self::Empty
        } else {
            Self::Entries(entries)
        }
    }
}

/// Name a provider gives a new document when `name` is already taken:
/// `notes.org` becomes `notes (1).org`, `notes (2).org`, ...
pub fn numbered_name(name: &str, n: u32) -> String {
    match name.split_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{} ({}).{}", stem, n, ext),
        _ => format!("{} ({})", name, n),
    }
}

pub type DocumentReader = Box<dyn AsyncRead + Send + Unpin>;
pub type DocumentWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Handle-based document tree provider.
///
/// Every operation resolves handles on the provider side. `Ok(None)` and
/// `Ok(false)` report that the provider declined or found nothing; `Err` is
/// reserved for failures to talk to the provider at all.
#[async_trait]
pub trait DocumentTree: Send + Sync {
    /// Resolve a tree root handle to its directory node.
    async fn resolve_tree(&self, root: &DocumentHandle) -> Result<Option<DocumentNode>>;

    /// List the immediate children of a directory.
    async fn list_children(&self, dir: &DocumentHandle) -> Listing;

    /// Look up a direct child of `dir` by name.
    async fn find_file(&self, dir: &DocumentHandle, name: &str) -> Result<Option<DocumentNode>>;

    /// Resolve a single document handle. `None` if it does not exist.
    async fn stat(&self, handle: &DocumentHandle) -> Result<Option<DocumentNode>>;

    /// Current last-modified time of a node (Unix milliseconds).
    async fn last_modified(&self, handle: &DocumentHandle) -> Result<i64>;

    async fn open_read(&self, handle: &DocumentHandle) -> Result<DocumentReader>;

    /// Open a document for writing, truncating its current content.
    async fn open_write(&self, handle: &DocumentHandle) -> Result<DocumentWriter>;

    /// Create an empty document under `parent`. The provider picks the handle
    /// (and may adjust the name). `None` if creation was refused.
    async fn create_file(
        &self,
        parent: &DocumentHandle,
        mime_type: &str,
        name: &str,
    ) -> Result<Option<DocumentNode>>;

    /// Delete a node. `false` if the provider refused.
    async fn delete(&self, handle: &DocumentHandle) -> Result<bool>;

    /// Rename a node in place. Returns the handle of the renamed node, which
    /// may differ from the old one. `None` if the provider refused.
    async fn rename(&self, handle: &DocumentHandle, new_name: &str) -> Result<Option<DocumentHandle>>;
}
