//! Book repository backed by a handle-based document tree.
//!
//! - `ContentRepo`: the `SyncRepo` implementation
//! - `FsDocumentTree`: a `DocumentTree` exposing a local directory through opaque handles

pub mod config;
pub mod content;
pub mod fs_tree;

pub use content::{ContentRepo, SCHEME};
pub use fs_tree::FsDocumentTree;
