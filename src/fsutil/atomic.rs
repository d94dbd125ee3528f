//! Atomic file writes for sidecar artifacts.
//!
//! Sidecars like `book_info.json` must never be observable half-written:
//! after a crash the file is either the previous content or the new
//! complete content. The standard temp-file-then-rename dance provides
//! that on every platform we target, as long as the temp file lives in
//! the destination directory (rename across filesystems is not atomic).

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

/// Process-wide counter so concurrent writers never collide on a temp name.
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Writes `content` to `path` atomically.
///
/// The content is first written to a uniquely named temp file in the same
/// directory, flushed, then renamed over the destination. On any failure
/// the temp file is removed.
///
/// # Errors
///
/// Returns the underlying [`io::Error`] from create, write, or rename.
pub async fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let tmp_path = temp_sibling(path);

    if let Err(err) = tokio::fs::write(&tmp_path, content).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(err);
    }
    if let Err(err) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(err);
    }

    debug!(path = %path.display(), bytes = content.len(), "atomic write complete");
    Ok(())
}

/// Derives a unique temp path next to the destination.
fn temp_sibling(path: &Path) -> PathBuf {
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let tmp_name = format!(".{name}.{}.{seq}.tmp", std::process::id());
    path.with_file_name(tmp_name)
}
