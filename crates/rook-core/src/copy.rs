//! Byte copying between provider streams and local files.

use std::path::Path;

use tokio::fs::File;
use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Copy everything from `reader` into `path`, creating or truncating it.
///
/// Returns the number of bytes written.
pub async fn write_stream_to_file<R>(reader: &mut R, path: &Path) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut file = File::create(path).await?;
    let copied = io::copy(reader, &mut file).await?;
    file.sync_all().await?;

    debug!("Wrote {} bytes to {}", copied, path.display());
    Ok(copied)
}

/// Copy the content of the local file at `path` into `writer`.
///
/// The writer is flushed and shut down before returning, so the provider has
/// committed the content once this resolves.
pub async fn write_file_to_stream<W>(path: &Path, writer: &mut W) -> io::Result<u64>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut file = File::open(path).await?;
    let copied = io::copy(&mut file, writer).await?;
    writer.shutdown().await?;

    debug!("Read {} bytes from {}", copied, path.display());
    Ok(copied)
}
