//! In-memory `DocumentTree` for exercising repository backends in tests.
//!
//! Handle format: `memory://{authority}/{node_id}`. Node ids are never
//! reused, and a rename moves the node to a fresh id so handles do not
//! survive it. Timestamps come from a logical clock that ticks on every
//! mutation, starting well away from the wall clock.

use std::collections::{BTreeMap, HashSet};
use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use crate::error::{RepoError, Result};
use crate::tree::{
    numbered_name, DocumentHandle, DocumentNode, DocumentReader, DocumentTree, DocumentWriter,
    Listing,
};

const ROOT_ID: u64 = 0;
const CLOCK_START: i64 = 1_000_000;
const CLOCK_TICK: i64 = 1_000;

#[derive(Debug, Clone)]
struct Node {
    parent: Option<u64>,
    name: String,
    is_directory: bool,
    content: Vec<u8>,
    last_modified: i64,
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<u64, Node>,
    next_id: u64,
    clock: i64,
    unreadable: HashSet<u64>,
    refuse_create: bool,
    refuse_delete: bool,
    refuse_rename: bool,
}

impl State {
    fn tick(&mut self) -> i64 {
        self.clock += CLOCK_TICK;
        self.clock
    }

    fn insert(&mut self, parent: u64, name: &str, is_directory: bool, content: Vec<u8>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let last_modified = self.tick();
        self.nodes.insert(
            id,
            Node {
                parent: Some(parent),
                name: name.to_string(),
                is_directory,
                content,
                last_modified,
            },
        );
        id
    }

    fn child_named(&self, parent: u64, name: &str) -> Option<u64> {
        self.nodes
            .iter()
            .find(|(_, n)| n.parent == Some(parent) && n.name == name)
            .map(|(id, _)| *id)
    }

    fn children(&self, parent: u64) -> Vec<u64> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.parent == Some(parent))
            .map(|(id, _)| *id)
            .collect()
    }
}

/// In-memory document tree with failure injection.
#[derive(Debug, Clone)]
pub struct MemoryTree {
    authority: String,
    state: Arc<Mutex<State>>,
}

impl MemoryTree {
    pub fn new(authority: &str) -> Self {
        let mut state = State {
            next_id: ROOT_ID + 1,
            clock: CLOCK_START,
            ..Default::default()
        };
        state.nodes.insert(
            ROOT_ID,
            Node {
                parent: None,
                name: String::new(),
                is_directory: true,
                content: Vec::new(),
                last_modified: CLOCK_START,
            },
        );

        Self {
            authority: authority.to_string(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Handle of the tree root.
    pub fn root(&self) -> DocumentHandle {
        self.handle(ROOT_ID)
    }

    /// Create a directory and return its handle.
    pub fn mkdir(&self, parent: &DocumentHandle, name: &str) -> DocumentHandle {
        let parent = self.id_of(parent).unwrap_or(ROOT_ID);
        let id = self.state().insert(parent, name, true, Vec::new());
        self.handle(id)
    }

    /// Create a document with the given content and return its handle.
    pub fn put_file(&self, parent: &DocumentHandle, name: &str, content: &[u8]) -> DocumentHandle {
        let parent = self.id_of(parent).unwrap_or(ROOT_ID);
        let id = self.state().insert(parent, name, false, content.to_vec());
        self.handle(id)
    }

    /// Content of a document, `None` if the handle does not resolve.
    pub fn content(&self, handle: &DocumentHandle) -> Option<Vec<u8>> {
        let id = self.id_of(handle)?;
        self.state().nodes.get(&id).map(|n| n.content.clone())
    }

    /// Sorted names of the direct children of `parent`.
    pub fn child_names(&self, parent: &DocumentHandle) -> Vec<String> {
        let Some(parent) = self.id_of(parent) else {
            return Vec::new();
        };
        let state = self.state();
        let mut names: Vec<String> = state
            .children(parent)
            .into_iter()
            .filter_map(|id| state.nodes.get(&id).map(|n| n.name.clone()))
            .collect();
        names.sort();
        names
    }

    /// Make `list_children` report the directory as unreadable.
    pub fn mark_unreadable(&self, dir: &DocumentHandle) {
        if let Some(id) = self.id_of(dir) {
            self.state().unreadable.insert(id);
        }
    }

    pub fn refuse_create(&self, refuse: bool) {
        self.state().refuse_create = refuse;
    }

    pub fn refuse_delete(&self, refuse: bool) {
        self.state().refuse_delete = refuse;
    }

    pub fn refuse_rename(&self, refuse: bool) {
        self.state().refuse_rename = refuse;
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, id: u64) -> DocumentHandle {
        DocumentHandle::new(format!("memory://{}/{}", self.authority, id))
    }

    fn id_of(&self, handle: &DocumentHandle) -> Option<u64> {
        handle
            .as_str()
            .strip_prefix("memory://")?
            .strip_prefix(self.authority.as_str())?
            .strip_prefix('/')?
            .parse()
            .ok()
    }

    fn node(&self, id: u64, node: &Node) -> DocumentNode {
        DocumentNode {
            handle: self.handle(id),
            name: node.name.clone(),
            is_directory: node.is_directory,
            last_modified: node.last_modified,
        }
    }

    fn lookup(&self, handle: &DocumentHandle) -> Option<DocumentNode> {
        let id = self.id_of(handle)?;
        let state = self.state();
        state.nodes.get(&id).map(|n| self.node(id, n))
    }
}

#[async_trait]
impl DocumentTree for MemoryTree {
    async fn resolve_tree(&self, root: &DocumentHandle) -> Result<Option<DocumentNode>> {
        Ok(self.lookup(root).filter(|n| n.is_directory))
    }

    async fn list_children(&self, dir: &DocumentHandle) -> Listing {
        let Some(id) = self.id_of(dir) else {
            return Listing::Unreadable(format!("unknown handle {}", dir));
        };
        let state = self.state();
        if state.unreadable.contains(&id) {
            return Listing::Unreadable("permission denied".to_string());
        }
        match state.nodes.get(&id) {
            Some(n) if n.is_directory => {}
            _ => return Listing::Unreadable(format!("{} is not a directory", dir)),
        }

        let entries = state
            .children(id)
            .into_iter()
            .filter_map(|child| state.nodes.get(&child).map(|n| self.node(child, n)))
            .collect();
        Listing::from_entries(entries)
    }

    async fn find_file(&self, dir: &DocumentHandle, name: &str) -> Result<Option<DocumentNode>> {
        let Some(parent) = self.id_of(dir) else {
            return Ok(None);
        };
        let state = self.state();
        Ok(state
            .child_named(parent, name)
            .and_then(|id| state.nodes.get(&id).map(|n| self.node(id, n))))
    }

    async fn stat(&self, handle: &DocumentHandle) -> Result<Option<DocumentNode>> {
        Ok(self.lookup(handle))
    }

    async fn last_modified(&self, handle: &DocumentHandle) -> Result<i64> {
        self.lookup(handle)
            .map(|n| n.last_modified)
            .ok_or_else(|| RepoError::Io(format!("No document at {}", handle)))
    }

    async fn open_read(&self, handle: &DocumentHandle) -> Result<DocumentReader> {
        let content = self
            .content(handle)
            .ok_or_else(|| RepoError::Io(format!("Failed opening {} for reading", handle)))?;
        Ok(Box::new(Cursor::new(content)))
    }

    async fn open_write(&self, handle: &DocumentHandle) -> Result<DocumentWriter> {
        let id = self
            .id_of(handle)
            .filter(|id| self.state().nodes.get(id).is_some_and(|n| !n.is_directory))
            .ok_or_else(|| RepoError::Io(format!("Failed opening {} for writing", handle)))?;

        Ok(Box::new(MemoryWriter {
            id,
            buffer: Vec::new(),
            state: Arc::clone(&self.state),
        }))
    }

    async fn create_file(
        &self,
        parent: &DocumentHandle,
        _mime_type: &str,
        name: &str,
    ) -> Result<Option<DocumentNode>> {
        let Some(parent_id) = self.id_of(parent) else {
            return Ok(None);
        };
        let mut state = self.state();
        if state.refuse_create || !state.nodes.get(&parent_id).is_some_and(|n| n.is_directory) {
            return Ok(None);
        }

        let mut actual = name.to_string();
        let mut n = 0;
        while state.child_named(parent_id, &actual).is_some() {
            n += 1;
            actual = numbered_name(name, n);
        }

        let id = state.insert(parent_id, &actual, false, Vec::new());
        Ok(state.nodes.get(&id).map(|node| self.node(id, node)))
    }

    async fn delete(&self, handle: &DocumentHandle) -> Result<bool> {
        let Some(id) = self.id_of(handle) else {
            return Ok(false);
        };
        let mut state = self.state();
        if state.refuse_delete || id == ROOT_ID || !state.nodes.contains_key(&id) {
            return Ok(false);
        }
        // Only empty directories can be deleted.
        if !state.children(id).is_empty() {
            return Ok(false);
        }
        state.nodes.remove(&id);
        state.unreadable.remove(&id);
        Ok(true)
    }

    async fn rename(&self, handle: &DocumentHandle, new_name: &str) -> Result<Option<DocumentHandle>> {
        let Some(id) = self.id_of(handle) else {
            return Ok(None);
        };
        let mut state = self.state();
        if state.refuse_rename || id == ROOT_ID {
            return Ok(None);
        }
        let Some(mut node) = state.nodes.remove(&id) else {
            return Ok(None);
        };
        if let Some(parent) = node.parent {
            if state.child_named(parent, new_name).is_some() {
                state.nodes.insert(id, node);
                return Ok(None);
            }
        }

        let new_id = state.next_id;
        state.next_id += 1;
        node.name = new_name.to_string();
        state.nodes.insert(new_id, node);
        for child in state.children(id) {
            if let Some(c) = state.nodes.get_mut(&child) {
                c.parent = Some(new_id);
            }
        }
        if state.unreadable.remove(&id) {
            state.unreadable.insert(new_id);
        }

        Ok(Some(self.handle(new_id)))
    }
}

/// Buffers written bytes and commits them to the node on shutdown.
struct MemoryWriter {
    id: u64,
    buffer: Vec<u8>,
    state: Arc<Mutex<State>>,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let mut state = this.state.lock().unwrap_or_else(PoisonError::into_inner);
        let last_modified = state.tick();
        match state.nodes.get_mut(&this.id) {
            Some(node) => {
                node.content = std::mem::take(&mut this.buffer);
                node.last_modified = last_modified;
                Poll::Ready(Ok(()))
            }
            None => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotFound,
                "document vanished while writing",
            ))),
        }
    }
}
