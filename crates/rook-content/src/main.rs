use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rook_core::{DocumentHandle, Repo, RepoType, RepoWithProps, SyncRepo, VersionedRook};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rook_content::config::{Command, Config};
use rook_content::{ContentRepo, FsDocumentTree};

/// Output of the `retrieve` command.
#[derive(Serialize)]
struct Retrieved {
    path: PathBuf,
    rook: VersionedRook,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr, results to stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();

    let tree = FsDocumentTree::new(config.tree_dir.clone(), &config.authority);
    let url = config
        .repo_url
        .clone()
        .unwrap_or_else(|| tree.root().to_string());

    info!("Opening repository {} over {}", url, config.tree_dir.display());

    let repo = RepoWithProps::new(Repo {
        id: config.repo_id,
        repo_type: RepoType::Document,
        url,
    });
    let repo: Arc<dyn SyncRepo> = Arc::new(ContentRepo::new(&repo, Arc::new(tree)).await);

    match config.command {
        Command::List => {
            let books = repo.books().await.context("Listing books failed")?;
            info!("Found {} books in {}", books.len(), repo);
            print_json(&books)?;
        }
        Command::Retrieve {
            file_name,
            destination,
        } => {
            let rook = repo
                .retrieve_book(&file_name, &destination)
                .await
                .with_context(|| format!("Retrieving {} failed", file_name))?;
            print_json(&Retrieved {
                path: destination,
                rook,
            })?;
        }
        Command::Store { file, file_name } => {
            let rook = repo
                .store_book(&file, &file_name)
                .await
                .with_context(|| format!("Storing {} as {} failed", file.display(), file_name))?;
            print_json(&rook)?;
        }
        Command::Rename { uri, name } => {
            let rook = repo
                .rename_book(&DocumentHandle::new(uri.as_str()), &name)
                .await
                .with_context(|| format!("Renaming {} to {} failed", uri, name))?;
            print_json(&rook)?;
        }
        Command::Delete { uri } => {
            repo.delete(&DocumentHandle::new(uri.as_str()))
                .await
                .with_context(|| format!("Deleting {} failed", uri))?;
            info!("Deleted {}", uri);
        }
        Command::Describe => {
            println!("{}", repo);
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
