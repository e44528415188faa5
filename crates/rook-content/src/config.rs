use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Configuration for the rook-content command line.
#[derive(Parser, Debug, Clone)]
#[command(name = "rook-content")]
#[command(about = "List, fetch and update books in a document tree repository")]
pub struct Config {
    /// Directory exposed as the document tree
    #[arg(long, env = "ROOK_TREE_DIR")]
    pub tree_dir: PathBuf,

    /// Authority used in document handles
    #[arg(long, default_value = "local", env = "ROOK_AUTHORITY")]
    pub authority: String,

    /// Repository ID stamped on every returned reference
    #[arg(long, default_value = "1", env = "ROOK_REPO_ID")]
    pub repo_id: i64,

    /// Repository root handle (defaults to the root of the tree)
    #[arg(long, env = "ROOK_REPO_URL")]
    pub repo_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Repository operations.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List every book in the repository
    List,
    /// Download a book from the repository root into a local file
    Retrieve { file_name: String, destination: PathBuf },
    /// Upload a local file as a book, replacing one of the same name
    Store { file: PathBuf, file_name: String },
    /// Rename a book, keeping its format
    Rename { uri: String, name: String },
    /// Delete a book
    Delete { uri: String },
    /// Print the repository identity
    Describe,
}
