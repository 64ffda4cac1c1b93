pub mod migrations;
pub mod models;
pub mod query;
pub mod reindex;
pub mod sqlite;

pub use models::*;
pub use reindex::FileReindex;
pub use sqlite::SqliteStore;

use std::path::Path;
use std::time::UNIX_EPOCH;

/// Filesystem seam for the reindex scheduler.
///
/// The store itself never stats the filesystem; `indexed_at` timestamps are
/// only compared against modification times supplied through this trait (or
/// passed directly to `begin_file`). Tests substitute a map-backed impl.
pub trait FileStat {
    /// Modification time of `path` in whole seconds since the epoch, or
    /// `None` when the file cannot be statted (deleted, renamed, permission).
    fn mtime(&self, path: &Path) -> Option<i64>;
}

/// Production `FileStat` that stats the real filesystem.
pub struct FsStat;

impl FileStat for FsStat {
    fn mtime(&self, path: &Path) -> Option<i64> {
        let modified = std::fs::metadata(path).ok()?.modified().ok()?;
        let secs = modified.duration_since(UNIX_EPOCH).ok()?.as_secs();
        Some(secs as i64)
    }
}
