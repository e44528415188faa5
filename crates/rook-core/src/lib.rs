//! Core traits and types for book repositories backed by document trees.
//!
//! This crate defines the abstractions shared between the synchronizer and repository backends:
//! - `SyncRepo`: the capability set every repository exposes to the synchronizer
//! - `DocumentTree`: the handle-based tree provider a document repository is built on
//! - `VersionedRook`: the versioned reference returned by listing and mutating operations
//! - `BookName`: the convention mapping logical book names to physical file names
//! - `copy`: byte copying between provider streams and local files

mod book_name;
pub mod copy;
mod error;
#[cfg(any(test, feature = "mock"))]
mod memory;
mod repo;
mod sync;
mod tree;

pub use book_name::{BookFormat, BookName};
pub use error::RepoError;
#[cfg(any(test, feature = "mock"))]
pub use memory::MemoryTree;
pub use repo::{Repo, RepoType, RepoWithProps, VersionedRook};
pub use sync::SyncRepo;
pub use tree::{
    numbered_name, DocumentHandle, DocumentNode, DocumentReader, DocumentTree, DocumentWriter,
    Listing,
};
