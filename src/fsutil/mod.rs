//! Filesystem helpers scoped to the chapter store's write contract:
//! cross-platform filename sanitization and atomic sidecar writes.

mod atomic;
mod filename;

pub use atomic::write_atomic;
pub use filename::{Platform, sanitize_filename, sanitize_filename_with};
