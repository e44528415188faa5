//! Document-tree SyncRepo implementation.
//!
//! Books live in a tree reached only through provider handles. The tree root
//! is resolved once, when the repository is built.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rook_core::copy::{write_file_to_stream, write_stream_to_file};
use rook_core::{
    BookName, DocumentHandle, DocumentNode, DocumentTree, Listing, RepoError, RepoType,
    RepoWithProps, SyncRepo, VersionedRook,
};
use tracing::{debug, error, instrument, warn};

/// URI scheme of document tree handles.
pub const SCHEME: &str = "content";

/// MIME type requested for newly created books.
const BOOK_MIME_TYPE: &str = "text/*";

/// Repository backed by a handle-based document tree.
pub struct ContentRepo {
    repo_id: i64,
    repo_uri: String,
    tree: Arc<dyn DocumentTree>,
    /// Root directory, `None` if the repository URI did not resolve to one
    root: Option<DocumentNode>,
}

impl ContentRepo {
    /// Bind a repository to its tree. The root handle is resolved here and
    /// never again; a failed resolution is reported by every later operation.
    pub async fn new(repo: &RepoWithProps, tree: Arc<dyn DocumentTree>) -> Self {
        let repo_uri = repo.repo.url.clone();

        let root = match tree.resolve_tree(&DocumentHandle::new(repo_uri.as_str())).await {
            Ok(Some(root)) => Some(root),
            Ok(None) => {
                warn!("Tree {} does not resolve to a directory", repo_uri);
                None
            }
            Err(e) => {
                warn!("Failed resolving tree {}: {}", repo_uri, e);
                None
            }
        };

        Self {
            repo_id: repo.repo.id,
            repo_uri,
            tree,
            root,
        }
    }

    fn root_dir(&self) -> Result<&DocumentHandle, RepoError> {
        self.root
            .as_ref()
            .map(|root| &root.handle)
            .ok_or_else(|| RepoError::Io(format!("Failed resolving tree {}", self.repo_uri)))
    }

    fn rook(&self, node: &DocumentNode) -> VersionedRook {
        VersionedRook::from_node(self.repo_id, RepoType::Document, &self.repo_uri, node)
    }
}

#[async_trait]
impl SyncRepo for ContentRepo {
    fn is_connection_required(&self) -> bool {
        false
    }

    fn is_auto_sync_supported(&self) -> bool {
        true
    }

    fn uri(&self) -> &str {
        &self.repo_uri
    }

    #[instrument(skip(self), level = "debug", fields(repo = %self.repo_uri))]
    async fn books(&self) -> Result<Vec<VersionedRook>, RepoError> {
        let root = self.root_dir()?;
        let mut result = Vec::new();
        let mut pending = vec![root.clone()];

        // Provider order is kept as is; handles cannot be sorted meaningfully.
        while let Some(dir) = pending.pop() {
            let entries = match self.tree.list_children(&dir).await {
                Listing::Entries(entries) => entries,
                Listing::Empty => continue,
                // An unreadable root would pass for an empty repository.
                Listing::Unreadable(reason) if dir == *root => {
                    return Err(RepoError::Io(format!(
                        "Failed listing tree {}: {}",
                        self.repo_uri, reason
                    )));
                }
                Listing::Unreadable(reason) => {
                    error!("Listing files in {} returned nothing: {}", dir, reason);
                    continue;
                }
            };

            for file in entries {
                if file.is_directory {
                    pending.push(file.handle);
                } else if BookName::is_supported_format_file_name(&file.name) {
                    debug!(
                        "Found book {} at {} (parent {})",
                        file.name, file.handle, dir
                    );
                    result.push(self.rook(&file));
                }
            }
        }

        debug!("Listed {} books in {}", result.len(), self.repo_uri);
        Ok(result)
    }

    #[instrument(skip(self), level = "debug")]
    async fn retrieve_book(
        &self,
        file_name: &str,
        destination: &Path,
    ) -> Result<VersionedRook, RepoError> {
        let root = self.root_dir()?;

        let source = self
            .tree
            .find_file(root, file_name)
            .await?
            .filter(|node| !node.is_directory)
            .ok_or_else(|| {
                RepoError::NotFound(format!("Book {} not found in {}", file_name, self.repo_uri))
            })?;
        debug!("Found document for {}: {}", file_name, source.handle);

        let mut reader = self.tree.open_read(&source.handle).await?;
        write_stream_to_file(&mut reader, destination).await?;

        Ok(self.rook(&source))
    }

    #[instrument(skip(self), level = "debug")]
    async fn store_book(&self, file: &Path, file_name: &str) -> Result<VersionedRook, RepoError> {
        if !tokio::fs::try_exists(file).await? {
            return Err(RepoError::NotFound(format!(
                "File {} does not exist",
                file.display()
            )));
        }

        let root = self.root_dir()?;

        // Replace, not update: the old document is gone before the new one exists.
        if let Some(existing) = self.tree.find_file(root, file_name).await? {
            if existing.is_directory {
                return Err(RepoError::Io(format!(
                    "Cannot store {}: {} is a directory",
                    file_name, existing.handle
                )));
            }
            if !self.tree.delete(&existing.handle).await? {
                return Err(RepoError::Io(format!(
                    "Failed deleting document {}",
                    existing.handle
                )));
            }
            debug!("Deleted existing {} at {}", file_name, existing.handle);
        }

        let destination = self
            .tree
            .create_file(root, BOOK_MIME_TYPE, file_name)
            .await?
            .ok_or_else(|| {
                RepoError::Io(format!("Failed creating {} in {}", file_name, self.repo_uri))
            })?;

        {
            let mut writer = self.tree.open_write(&destination.handle).await?;
            write_file_to_stream(file, &mut writer).await?;
        }

        let stored_at = chrono::Utc::now().timestamp_millis();
        let revision = self.tree.last_modified(&destination.handle).await?;

        debug!(
            "Stored {} as {} (revision {}, mtime {})",
            file.display(),
            destination.handle,
            revision,
            stored_at
        );

        Ok(VersionedRook::stored(
            self.repo_id,
            RepoType::Document,
            &self.repo_uri,
            destination.handle,
            revision,
            stored_at,
        ))
    }

    #[instrument(skip(self), level = "debug")]
    async fn rename_book(
        &self,
        from: &DocumentHandle,
        name: &str,
    ) -> Result<VersionedRook, RepoError> {
        let from_node = self
            .tree
            .stat(from)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("Document {} not found", from)))?;

        let book_name = BookName::from_file_name(&from_node.name).ok_or_else(|| {
            RepoError::Io(format!(
                "{} at {} is not a supported book",
                from_node.name, from
            ))
        })?;
        let new_file_name = BookName::file_name(name, book_name.format());

        let root = self.root_dir()?;
        if let Some(existing) = self.tree.find_file(root, &new_file_name).await? {
            return Err(RepoError::AlreadyExists(format!(
                "File at {} already exists",
                existing.handle
            )));
        }

        let new_uri = self
            .tree
            .rename(from, &new_file_name)
            .await?
            .ok_or_else(|| {
                RepoError::Io(format!("Failed renaming {} to {}", from, new_file_name))
            })?;

        debug!("Renamed {} to {} ({})", from, new_file_name, new_uri);

        // Revision and mtime stay those of the source node.
        Ok(self.rook(&DocumentNode {
            handle: new_uri,
            name: new_file_name,
            ..from_node
        }))
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, uri: &DocumentHandle) -> Result<(), RepoError> {
        if self.tree.stat(uri).await?.is_none() {
            debug!("Nothing to delete at {}", uri);
            return Ok(());
        }

        if !self.tree.delete(uri).await? {
            return Err(RepoError::Io(format!("Failed deleting document {}", uri)));
        }

        debug!("Deleted {}", uri);
        Ok(())
    }
}

impl fmt::Display for ContentRepo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repo_uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rook_core::{MemoryTree, Repo};
    use tempfile::TempDir;

    async fn setup() -> (ContentRepo, MemoryTree, TempDir) {
        let tree = MemoryTree::new("test");
        let repo = RepoWithProps::new(Repo {
            id: 42,
            repo_type: RepoType::Document,
            url: tree.root().to_string(),
        });
        let content_repo = ContentRepo::new(&repo, Arc::new(tree.clone())).await;
        (content_repo, tree, TempDir::new().unwrap())
    }

    #[tokio::test]
    async fn test_capabilities() {
        let (repo, tree, _temp_dir) = setup().await;
        assert!(!repo.is_connection_required());
        assert!(repo.is_auto_sync_supported());
        assert_eq!(repo.uri(), tree.root().as_str());
        assert_eq!(repo.to_string(), "memory://test/0");
    }

    #[tokio::test]
    async fn test_books_are_stamped_from_provider() {
        let (repo, tree, _temp_dir) = setup().await;
        let sub = tree.mkdir(&tree.root(), "sub");
        let handle = tree.put_file(&sub, "deep.org", b"* deep");
        let modified = tree.last_modified(&handle).await.unwrap();

        let books = repo.books().await.unwrap();
        assert_eq!(books.len(), 1);
        let book = &books[0];
        assert_eq!(book.repo_id, 42);
        assert_eq!(book.repo_type, RepoType::Document);
        assert_eq!(book.repo_uri, "memory://test/0");
        assert_eq!(book.uri, handle);
        assert_eq!(book.revision, modified.to_string());
        assert_eq!(book.mtime, modified);
    }

    #[tokio::test]
    async fn test_store_replaces_existing() {
        let (repo, tree, temp_dir) = setup().await;
        let old = tree.put_file(&tree.root(), "a.org", b"old");

        let file = temp_dir.path().join("a.org");
        tokio::fs::write(&file, b"new").await.unwrap();
        let rook = repo.store_book(&file, "a.org").await.unwrap();

        assert_ne!(rook.uri, old);
        assert_eq!(tree.child_names(&tree.root()), vec!["a.org"]);
        assert_eq!(tree.content(&rook.uri).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_store_fails_when_delete_refused() {
        let (repo, tree, temp_dir) = setup().await;
        tree.put_file(&tree.root(), "a.org", b"old");
        tree.refuse_delete(true);

        let file = temp_dir.path().join("a.org");
        tokio::fs::write(&file, b"new").await.unwrap();
        let err = repo.store_book(&file, "a.org").await.unwrap_err();

        assert!(matches!(err, RepoError::Io(_)));
        assert_eq!(tree.child_names(&tree.root()), vec!["a.org"]);
    }

    #[tokio::test]
    async fn test_store_refuses_to_replace_directory() {
        let (repo, tree, temp_dir) = setup().await;
        let dir = tree.mkdir(&tree.root(), "a.org");
        let kept = tree.put_file(&dir, "keep.org", b"keep");

        let file = temp_dir.path().join("a.org");
        tokio::fs::write(&file, b"new").await.unwrap();
        let err = repo.store_book(&file, "a.org").await.unwrap_err();

        assert!(matches!(err, RepoError::Io(_)));
        assert!(err.to_string().contains(dir.as_str()));
        assert_eq!(tree.content(&kept).unwrap(), b"keep");
        assert_eq!(tree.child_names(&tree.root()), vec!["a.org"]);
    }

    #[tokio::test]
    async fn test_retrieve_skips_directory_match() {
        let (repo, tree, temp_dir) = setup().await;
        tree.mkdir(&tree.root(), "a.org");

        let destination = temp_dir.path().join("a.org");
        let err = repo.retrieve_book("a.org", &destination).await.unwrap_err();

        assert!(err.is_not_found());
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_rename_keeps_source_time() {
        let (repo, tree, _temp_dir) = setup().await;
        let from = tree.put_file(&tree.root(), "a.org", b"x");
        let modified = tree.last_modified(&from).await.unwrap();

        let rook = repo.rename_book(&from, "b").await.unwrap();

        assert_ne!(rook.uri, from);
        assert_eq!(rook.revision, modified.to_string());
        assert_eq!(rook.mtime, modified);
        assert_eq!(rook.repo_uri, "memory://test/0");
    }

    #[tokio::test]
    async fn test_rename_unknown_handle() {
        let (repo, _tree, _temp_dir) = setup().await;
        let err = repo
            .rename_book(&DocumentHandle::new("memory://test/77"), "b")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_rename_refused_by_provider() {
        let (repo, tree, _temp_dir) = setup().await;
        let from = tree.put_file(&tree.root(), "a.org", b"x");
        tree.refuse_rename(true);

        let err = repo.rename_book(&from, "b").await.unwrap_err();
        assert!(matches!(err, RepoError::Io(_)));
        assert_eq!(tree.child_names(&tree.root()), vec!["a.org"]);
    }

    #[tokio::test]
    async fn test_delete_refused_by_provider() {
        let (repo, tree, _temp_dir) = setup().await;
        let handle = tree.put_file(&tree.root(), "a.org", b"x");
        tree.refuse_delete(true);

        let err = repo.delete(&handle).await.unwrap_err();
        assert!(err.to_string().contains(handle.as_str()));
    }
}
