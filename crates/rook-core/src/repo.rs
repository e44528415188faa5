use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::tree::{DocumentHandle, DocumentNode};

/// Repository kinds known to the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepoType {
    Mock,
    Dropbox,
    Git,
    Directory,
    /// Document tree reached through provider handles.
    Document,
    WebDav,
}

/// A configured repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub id: i64,
    #[serde(rename = "type")]
    pub repo_type: RepoType,
    /// Root reference of the repository (tree handle for document repositories)
    pub url: String,
}

/// A repository together with its free-form properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoWithProps {
    pub repo: Repo,
    #[serde(default)]
    pub props: BTreeMap<String, String>,
}

impl RepoWithProps {
    pub fn new(repo: Repo) -> Self {
        Self {
            repo,
            props: BTreeMap::new(),
        }
    }
}

/// Versioned reference to a book stored in a repository.
///
/// Built fresh by every listing, retrieve, store and rename; never mutated.
/// Two references with equal `uri` and different `revision` describe a book
/// that changed in between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedRook {
    pub repo_id: i64,
    pub repo_type: RepoType,
    /// Root handle of the owning repository
    pub repo_uri: String,
    /// Handle of the book itself
    pub uri: DocumentHandle,
    /// Opaque change marker
    pub revision: String,
    /// Modification time (Unix milliseconds)
    pub mtime: i64,
}

impl VersionedRook {
    /// Reference stamped from provider state that was just read.
    ///
    /// Revision and mtime both come from the node's last-modified time.
    pub fn from_node(repo_id: i64, repo_type: RepoType, repo_uri: &str, node: &DocumentNode) -> Self {
        Self {
            repo_id,
            repo_type,
            repo_uri: repo_uri.to_string(),
            uri: node.handle.clone(),
            revision: node.last_modified.to_string(),
            mtime: node.last_modified,
        }
    }

    /// Reference stamped right after a write.
    ///
    /// The revision is the provider's report for the new node, while mtime is
    /// the caller's clock at the time of the write.
    pub fn stored(
        repo_id: i64,
        repo_type: RepoType,
        repo_uri: &str,
        uri: DocumentHandle,
        provider_modified: i64,
        stored_at: i64,
    ) -> Self {
        Self {
            repo_id,
            repo_type,
            repo_uri: repo_uri.to_string(),
            uri,
            revision: provider_modified.to_string(),
            mtime: stored_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(last_modified: i64) -> DocumentNode {
        DocumentNode {
            handle: DocumentHandle::new("content://t/document/a.org"),
            name: "a.org".to_string(),
            is_directory: false,
            last_modified,
        }
    }

    #[test]
    fn test_from_node_uses_provider_time_for_both_fields() {
        let rook = VersionedRook::from_node(7, RepoType::Document, "content://t/document/", &node(1234));
        assert_eq!(rook.repo_id, 7);
        assert_eq!(rook.repo_uri, "content://t/document/");
        assert_eq!(rook.uri.as_str(), "content://t/document/a.org");
        assert_eq!(rook.revision, "1234");
        assert_eq!(rook.mtime, 1234);
    }

    #[test]
    fn test_stored_keeps_clocks_apart() {
        let rook = VersionedRook::stored(
            1,
            RepoType::Document,
            "content://t/document/",
            DocumentHandle::new("content://t/document/b.org"),
            500,
            900,
        );
        assert_eq!(rook.revision, "500");
        assert_eq!(rook.mtime, 900);
    }

    #[test]
    fn test_repo_type_serialization() {
        let repo = Repo {
            id: 3,
            repo_type: RepoType::WebDav,
            url: "https://dav.example.com/org".to_string(),
        };
        let json = serde_json::to_string(&repo).unwrap();
        assert_eq!(
            json,
            r#"{"id":3,"type":"WEB_DAV","url":"https://dav.example.com/org"}"#
        );

        let with_props: RepoWithProps =
            serde_json::from_str(r#"{"repo":{"id":3,"type":"DOCUMENT","url":"content://x"}}"#).unwrap();
        assert_eq!(with_props.repo.repo_type, RepoType::Document);
        assert!(with_props.props.is_empty());
    }
}
