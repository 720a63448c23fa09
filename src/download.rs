//! Fetches remote files to local storage, unmodified.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use futures::StreamExt;
use indicatif::ProgressBar;
use log::debug;
use reqwest::Client;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Returns the local file name for `url`: its last path segment, without query string.
pub fn file_name_from_url(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

/// Downloads `url` into `folder` unless a file of the same name is already there.
pub async fn maybe_download(client: &Client, url: &str, folder: &Path) -> Result<PathBuf> {
    fs::create_dir_all(folder)?;
    let file_path = folder.join(file_name_from_url(url));

    if file_path.exists() {
        debug!("Using cached {}", file_path.display());
        return Ok(file_path);
    }

    download_file(client, url, &file_path, None).await?;

    Ok(file_path)
}

/// Streams the body of `url` into `file_path`.
///
/// The body is written to a temporary file next to the target and only moved into
/// place once complete. When a progress bar is given it tracks the received bytes.
pub async fn download_file(
    client: &Client,
    url: &str,
    file_path: &Path,
    progress_bar: Option<&ProgressBar>,
) -> Result<()> {
    debug!("GET {url}");
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(Error::HttpStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }

    if let (Some(pb), Some(total_size)) = (progress_bar, response.content_length()) {
        pb.set_length(total_size);
    }

    let folder = file_path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = NamedTempFile::new_in(folder)?;
    let mut downloaded = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)?;
        downloaded += chunk.len() as u64;
        if let Some(pb) = progress_bar {
            pb.set_position(downloaded);
        }
    }

    file.persist(file_path).map_err(|e| Error::Io(e.error))?;

    Ok(())
}

// -- Tests -------------------------------------------------------------------
