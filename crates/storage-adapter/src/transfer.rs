//! Streaming HTTP bodies to disk
//!
//! Bodies are written to a `.download` sibling and renamed into place once
//! complete, so a reader never sees a half-written file under its final name.

use std::path::{Path, PathBuf};
use futures::StreamExt;
use reqwest::Response;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::trace;

use common::error::{Error, Result};

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".download");
    destination.with_file_name(name)
}

/// Streams `response` into `destination`
///
/// Network failures are reported through `network_error`, so each caller can
/// classify them for its own tier. Local I/O failures are `Error::Io`.
pub async fn write_response(
    response: Response,
    destination: &Path,
    network_error: fn(String) -> Error,
) -> Result<u64> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let partial = partial_path(destination);
    let result = stream_into(response, &partial, network_error).await;

    match result {
        Ok(written) => {
            tokio::fs::rename(&partial, destination).await?;
            trace!("Wrote {} bytes to {}", written, destination.display());
            Ok(written)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial).await;
            Err(e)
        }
    }
}

async fn stream_into(
    response: Response,
    path: &Path,
    network_error: fn(String) -> Error,
) -> Result<u64> {
    let mut file = File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| network_error(format!("transfer interrupted: {}", e)))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    Ok(written)
}
