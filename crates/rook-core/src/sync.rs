use std::fmt::Display;
use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::repo::VersionedRook;
use crate::tree::DocumentHandle;

/// Capability set of a repository, as consumed by the synchronizer.
///
/// Implementations assume the synchronizer serializes calls on one instance.
/// `Display` gives a human-readable identity for the repository.
#[async_trait]
pub trait SyncRepo: Display + Send + Sync {
    /// Whether talking to this repository needs a network connection.
    fn is_connection_required(&self) -> bool;

    /// Whether the synchronizer may sync this repository on its own.
    fn is_auto_sync_supported(&self) -> bool;

    /// Root reference the repository is bound to.
    fn uri(&self) -> &str;

    /// List every book in the repository. Order is unspecified.
    async fn books(&self) -> Result<Vec<VersionedRook>>;

    /// Download the book named `file_name` into `destination`.
    async fn retrieve_book(&self, file_name: &str, destination: &Path) -> Result<VersionedRook>;

    /// Upload `file` as `file_name`, replacing any existing book of that name.
    async fn store_book(&self, file: &Path, file_name: &str) -> Result<VersionedRook>;

    /// Rename the book at `from` to the logical name `name`, keeping its format.
    async fn rename_book(&self, from: &DocumentHandle, name: &str) -> Result<VersionedRook>;

    /// Delete the book at `uri`. Deleting a missing book succeeds.
    async fn delete(&self, uri: &DocumentHandle) -> Result<()>;
}
