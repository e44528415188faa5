//! Error type shared by repository backends and tree providers.

/// Repository-level errors.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// A requested document or local source file does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A rename target name is already taken.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The tree provider refused an operation.
    #[error("I/O error: {0}")]
    Io(String),

    /// Local file I/O failed.
    #[error("Local I/O error: {0}")]
    Local(#[from] std::io::Error),
}

impl RepoError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepoError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, RepoError::AlreadyExists(_))
    }
}

pub type Result<T> = std::result::Result<T, RepoError>;
