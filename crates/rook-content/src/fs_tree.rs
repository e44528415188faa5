//! `DocumentTree` over a directory on the local filesystem.
//!
//! Handle format: `content://{authority}/document/{relative path}`.
//! The root handle has an empty relative path. Symbolic links below the base
//! directory are not part of the tree: they are never listed, resolved or
//! followed.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rook_core::{
    numbered_name, DocumentHandle, DocumentNode, DocumentReader, DocumentTree, DocumentWriter,
    Listing, RepoError,
};
use tokio::fs::{self, OpenOptions};
use tokio::io;
use tracing::{debug, instrument, warn};

use crate::content::SCHEME;

/// Give up picking a free name for a new document after this many attempts.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Filesystem-backed document tree.
#[derive(Debug, Clone)]
pub struct FsDocumentTree {
    base: PathBuf,
    prefix: String,
}

impl FsDocumentTree {
    pub fn new(base: impl Into<PathBuf>, authority: &str) -> Self {
        Self {
            base: base.into(),
            prefix: format!("{}://{}/document/", SCHEME, authority),
        }
    }

    /// Handle of the exposed directory itself.
    pub fn root(&self) -> DocumentHandle {
        DocumentHandle::new(self.prefix.as_str())
    }

    /// Map a handle back to a path below the base directory.
    fn path_of(&self, handle: &DocumentHandle) -> Option<PathBuf> {
        let relative = handle.as_str().strip_prefix(&self.prefix)?;
        let mut path = self.base.clone();
        if relative.is_empty() {
            return Some(path);
        }
        for segment in relative.split('/') {
            if !is_plain_name(segment) {
                return None;
            }
            path.push(segment);
        }
        Some(path)
    }

    fn handle_of(&self, path: &Path) -> Option<DocumentHandle> {
        let relative = path.strip_prefix(&self.base).ok()?;
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(name) => segments.push(name.to_str()?),
                _ => return None,
            }
        }
        Some(DocumentHandle::new(format!(
            "{}{}",
            self.prefix,
            segments.join("/")
        )))
    }

    /// Map a handle to a path, refusing paths that pass through a symlink.
    async fn confined_path(&self, handle: &DocumentHandle) -> Option<PathBuf> {
        let path = self.path_of(handle)?;
        let relative = path.strip_prefix(&self.base).ok()?;

        let mut current = self.base.clone();
        for component in relative.components() {
            current.push(component);
            match fs::symlink_metadata(&current).await {
                Ok(m) if m.file_type().is_symlink() => {
                    debug!("Refusing {}: {} is a symlink", handle, current.display());
                    return None;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        Some(path)
    }

    async fn node_at(&self, path: &Path) -> Result<Option<DocumentNode>, RepoError> {
        // The base itself may be reached through a link; nothing below it is.
        let metadata = if path == self.base {
            fs::metadata(path).await
        } else {
            fs::symlink_metadata(path).await
        };
        let metadata = match metadata {
            Ok(m) if m.file_type().is_symlink() => {
                debug!("Skipping symlink {}", path.display());
                return Ok(None);
            }
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RepoError::Io(format!(
                    "Failed reading metadata of {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let Some(handle) = self.handle_of(path) else {
            debug!("Skipping {}: no handle for this path", path.display());
            return Ok(None);
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let last_modified = metadata
            .modified()
            .ok()
            .map(|t| DateTime::<Utc>::from(t).timestamp_millis())
            .unwrap_or(0);

        Ok(Some(DocumentNode {
            handle,
            name,
            is_directory: metadata.is_dir(),
            last_modified,
        }))
    }

    async fn resolve(&self, handle: &DocumentHandle) -> Result<PathBuf, RepoError> {
        self.confined_path(handle)
            .await
            .ok_or_else(|| RepoError::Io(format!("Unknown document handle {}", handle)))
    }
}

/// A single path segment that cannot escape its parent directory.
fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    !name.contains('/')
        && !name.contains('\\')
        && matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
}

#[async_trait]
impl DocumentTree for FsDocumentTree {
    #[instrument(skip(self), level = "debug")]
    async fn resolve_tree(&self, root: &DocumentHandle) -> Result<Option<DocumentNode>, RepoError> {
        let Some(path) = self.confined_path(root).await else {
            return Ok(None);
        };
        Ok(self.node_at(&path).await?.filter(|n| n.is_directory))
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_children(&self, dir: &DocumentHandle) -> Listing {
        let Some(dir_path) = self.confined_path(dir).await else {
            return Listing::Unreadable(format!("unknown handle {}", dir));
        };

        let mut read_dir = match fs::read_dir(&dir_path).await {
            Ok(r) => r,
            Err(e) => return Listing::Unreadable(e.to_string()),
        };

        let mut entries = Vec::new();
        loop {
            let entry = match read_dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Listing::Unreadable(e.to_string()),
            };

            match self.node_at(&entry.path()).await {
                Ok(Some(node)) => entries.push(node),
                Ok(None) => {}
                Err(e) => debug!("Skipping {}: {}", entry.path().display(), e),
            }
        }

        Listing::from_entries(entries)
    }

    #[instrument(skip(self), level = "debug")]
    async fn find_file(
        &self,
        dir: &DocumentHandle,
        name: &str,
    ) -> Result<Option<DocumentNode>, RepoError> {
        if !is_plain_name(name) {
            return Ok(None);
        }
        let Some(dir_path) = self.confined_path(dir).await else {
            return Ok(None);
        };
        self.node_at(&dir_path.join(name)).await
    }

    async fn stat(&self, handle: &DocumentHandle) -> Result<Option<DocumentNode>, RepoError> {
        match self.confined_path(handle).await {
            Some(path) => self.node_at(&path).await,
            None => Ok(None),
        }
    }

    async fn last_modified(&self, handle: &DocumentHandle) -> Result<i64, RepoError> {
        let path = self.resolve(handle).await?;
        self.node_at(&path)
            .await?
            .map(|n| n.last_modified)
            .ok_or_else(|| RepoError::Io(format!("No document at {}", handle)))
    }

    async fn open_read(&self, handle: &DocumentHandle) -> Result<DocumentReader, RepoError> {
        let path = self.resolve(handle).await?;
        let file = fs::File::open(&path).await.map_err(|e| {
            RepoError::Io(format!("Failed opening {} for reading: {}", handle, e))
        })?;
        Ok(Box::new(file))
    }

    async fn open_write(&self, handle: &DocumentHandle) -> Result<DocumentWriter, RepoError> {
        let path = self.resolve(handle).await?;
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .await
            .map_err(|e| {
                RepoError::Io(format!("Failed opening {} for writing: {}", handle, e))
            })?;
        Ok(Box::new(file))
    }

    #[instrument(skip(self), level = "debug")]
    async fn create_file(
        &self,
        parent: &DocumentHandle,
        mime_type: &str,
        name: &str,
    ) -> Result<Option<DocumentNode>, RepoError> {
        if !is_plain_name(name) {
            warn!("Refusing to create {:?} in {}", name, parent);
            return Ok(None);
        }
        let Some(parent_path) = self.confined_path(parent).await else {
            return Ok(None);
        };
        debug!("Creating {} ({}) in {}", name, mime_type, parent);

        let mut candidate = name.to_string();
        for attempt in 1..=MAX_NAME_ATTEMPTS {
            let path = parent_path.join(&candidate);
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return self.node_at(&path).await,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    candidate = numbered_name(name, attempt);
                }
                Err(e) => {
                    warn!("Failed creating {} in {}: {}", candidate, parent, e);
                    return Ok(None);
                }
            }
        }

        warn!("No free name left for {} in {}", name, parent);
        Ok(None)
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, handle: &DocumentHandle) -> Result<bool, RepoError> {
        let Some(path) = self.confined_path(handle).await else {
            return Ok(false);
        };
        if path == self.base {
            warn!("Refusing to delete the tree root {}", handle);
            return Ok(false);
        }

        // Directories go only when empty; a book name never takes a subtree with it.
        let removed = match fs::symlink_metadata(&path).await {
            Ok(m) if m.file_type().is_symlink() => return Ok(false),
            Ok(m) if m.is_dir() => fs::remove_dir(&path).await,
            Ok(_) => fs::remove_file(&path).await,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => Err(e),
        };

        match removed {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("Failed deleting {}: {}", handle, e);
                Ok(false)
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn rename(
        &self,
        handle: &DocumentHandle,
        new_name: &str,
    ) -> Result<Option<DocumentHandle>, RepoError> {
        if !is_plain_name(new_name) {
            return Ok(None);
        }
        let Some(path) = self.confined_path(handle).await else {
            return Ok(None);
        };
        let Some(parent) = path.parent().filter(|_| path != self.base) else {
            return Ok(None);
        };

        let target = parent.join(new_name);
        if fs::symlink_metadata(&target).await.is_ok() {
            debug!("Rename target {} already exists", target.display());
            return Ok(None);
        }

        if let Err(e) = fs::rename(&path, &target).await {
            warn!("Failed renaming {} to {}: {}", handle, new_name, e);
            return Ok(None);
        }

        Ok(self.handle_of(&target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    fn setup() -> (FsDocumentTree, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let tree = FsDocumentTree::new(temp_dir.path(), "local");
        (tree, temp_dir)
    }

    #[test]
    fn test_handles_round_trip_paths() {
        let (tree, temp_dir) = setup();
        let nested = temp_dir.path().join("a").join("b.org");

        let handle = tree.handle_of(&nested).unwrap();
        assert_eq!(handle.as_str(), "content://local/document/a/b.org");
        assert_eq!(tree.path_of(&handle).unwrap(), nested);

        assert_eq!(tree.root().as_str(), "content://local/document/");
        assert_eq!(tree.path_of(&tree.root()).unwrap(), temp_dir.path());
    }

    #[test]
    fn test_rejects_escaping_handles() {
        let (tree, _temp_dir) = setup();
        for uri in [
            "content://local/document/../etc/passwd",
            "content://local/document/a/../../x",
            "content://local/document/a//b",
            "content://local/document/./a",
            "content://other/document/a.org",
            "file:///etc/passwd",
        ] {
            assert!(tree.path_of(&DocumentHandle::new(uri)).is_none(), "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_create_write_and_stat() {
        let (tree, temp_dir) = setup();
        let node = tree
            .create_file(&tree.root(), "text/*", "a.org")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(node.name, "a.org");
        assert!(!node.is_directory);

        let mut writer = tree.open_write(&node.handle).await.unwrap();
        writer.write_all(b"* one").await.unwrap();
        writer.shutdown().await.unwrap();
        drop(writer);

        assert_eq!(
            std::fs::read(temp_dir.path().join("a.org")).unwrap(),
            b"* one"
        );
        assert!(tree.last_modified(&node.handle).await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_create_picks_free_name() {
        let (tree, temp_dir) = setup();
        std::fs::write(temp_dir.path().join("a.org"), b"").unwrap();

        let node = tree
            .create_file(&tree.root(), "text/*", "a.org")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(node.name, "a (1).org");
    }

    #[tokio::test]
    async fn test_create_rejects_path_names() {
        let (tree, _temp_dir) = setup();
        assert!(tree
            .create_file(&tree.root(), "text/*", "../a.org")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_rename_refuses_existing_target() {
        let (tree, temp_dir) = setup();
        std::fs::write(temp_dir.path().join("a.org"), b"a").unwrap();
        std::fs::write(temp_dir.path().join("b.org"), b"b").unwrap();
        let a = tree.handle_of(&temp_dir.path().join("a.org")).unwrap();

        assert!(tree.rename(&a, "b.org").await.unwrap().is_none());
        assert_eq!(std::fs::read(temp_dir.path().join("b.org")).unwrap(), b"b");

        let c = tree.rename(&a, "c.org").await.unwrap().unwrap();
        assert_eq!(c.as_str(), "content://local/document/c.org");
        assert!(!temp_dir.path().join("a.org").exists());
    }

    #[tokio::test]
    async fn test_list_missing_directory_is_unreadable() {
        let (tree, _temp_dir) = setup();
        let listing = tree
            .list_children(&DocumentHandle::new("content://local/document/missing"))
            .await;
        assert!(matches!(listing, Listing::Unreadable(_)));
        assert_eq!(tree.list_children(&tree.root()).await, Listing::Empty);
    }

    #[tokio::test]
    async fn test_delete_root_is_refused() {
        let (tree, temp_dir) = setup();
        assert!(!tree.delete(&tree.root()).await.unwrap());
        assert!(temp_dir.path().exists());
    }

    #[tokio::test]
    async fn test_delete_keeps_non_empty_directory() {
        let (tree, temp_dir) = setup();
        std::fs::create_dir_all(temp_dir.path().join("full").join("inner")).unwrap();
        std::fs::write(temp_dir.path().join("full/inner/keep.org"), b"keep").unwrap();
        std::fs::create_dir(temp_dir.path().join("empty")).unwrap();

        let full = tree.handle_of(&temp_dir.path().join("full")).unwrap();
        assert!(!tree.delete(&full).await.unwrap());
        assert_eq!(
            std::fs::read(temp_dir.path().join("full/inner/keep.org")).unwrap(),
            b"keep"
        );

        let empty = tree.handle_of(&temp_dir.path().join("empty")).unwrap();
        assert!(tree.delete(&empty).await.unwrap());
        assert!(!temp_dir.path().join("empty").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_are_not_listed() {
        use std::os::unix::fs::symlink;

        let (tree, temp_dir) = setup();
        std::fs::write(temp_dir.path().join("a.org"), b"a").unwrap();
        symlink(temp_dir.path(), temp_dir.path().join("loop")).unwrap();
        symlink(temp_dir.path().join("a.org"), temp_dir.path().join("alias.org")).unwrap();

        let Listing::Entries(entries) = tree.list_children(&tree.root()).await else {
            panic!("expected entries");
        };
        let names: Vec<_> = entries.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a.org"]);

        let root = tree.root();
        assert!(tree.find_file(&root, "loop").await.unwrap().is_none());
        assert!(tree.find_file(&root, "alias.org").await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_links_out_of_base_are_not_followed() {
        use std::os::unix::fs::symlink;

        let (tree, temp_dir) = setup();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.org"), b"secret").unwrap();
        symlink(outside.path(), temp_dir.path().join("ext")).unwrap();

        let ext = DocumentHandle::new("content://local/document/ext");
        let secret = DocumentHandle::new("content://local/document/ext/secret.org");

        assert_eq!(tree.list_children(&tree.root()).await, Listing::Empty);
        assert!(matches!(tree.list_children(&ext).await, Listing::Unreadable(_)));
        assert!(tree.stat(&secret).await.unwrap().is_none());
        assert!(tree.open_read(&secret).await.is_err());
        assert!(tree.open_write(&secret).await.is_err());
        assert!(tree
            .create_file(&ext, "text/plain", "new.org")
            .await
            .unwrap()
            .is_none());
        assert!(!tree.delete(&secret).await.unwrap());
        assert!(tree.rename(&secret, "moved.org").await.unwrap().is_none());

        assert_eq!(
            std::fs::read(outside.path().join("secret.org")).unwrap(),
            b"secret"
        );
        assert!(!outside.path().join("new.org").exists());
    }
}
