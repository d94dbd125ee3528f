//! `book_info.json` sidecar persistence.
//!
//! The resolved catalog is written next to the chapter database on every
//! run, so exporters and later runs can re-read catalog order without
//! touching the network. Writes go through the atomic temp-file-then-rename
//! helper: after a crash the sidecar is either the previous content or the
//! new complete content.

use std::path::{Path, PathBuf};

use tracing::instrument;

use super::StoreError;
use crate::fsutil::write_atomic;
use crate::models::BookInfo;

/// Sidecar filename inside a book directory.
pub const BOOK_INFO_FILENAME: &str = "book_info.json";

/// Serializes `info` and atomically writes it into `book_dir`.
///
/// # Errors
///
/// Returns [`StoreError::Io`] on filesystem failure. Serialization of
/// [`BookInfo`] cannot fail for well-formed values.
#[instrument(skip(book_dir, info), fields(dir = %book_dir.display(), book = %info.book_name))]
pub async fn write_book_info(book_dir: &Path, info: &BookInfo) -> Result<PathBuf, StoreError> {
    let path = book_dir.join(BOOK_INFO_FILENAME);
    let json = serde_json::to_vec_pretty(info).map_err(|source| StoreError::MalformedSidecar {
        path: path.display().to_string(),
        source,
    })?;

    write_atomic(&path, &json)
        .await
        .map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
    Ok(path)
}

/// Reads a previously written sidecar, if one exists.
///
/// # Errors
///
/// Returns [`StoreError::Io`] on read failure and
/// [`StoreError::MalformedSidecar`] if the file is not valid JSON for
/// [`BookInfo`].
pub async fn read_book_info(book_dir: &Path) -> Result<Option<BookInfo>, StoreError> {
    let path = book_dir.join(BOOK_INFO_FILENAME);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.display().to_string(),
                source,
            });
        }
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::MalformedSidecar {
            path: path.display().to_string(),
            source,
        })
}
