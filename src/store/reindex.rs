//! Staleness-driven reindex scheduling.
//!
//! `next_file` picks the next compilation unit worth reparsing; `begin_file`
//! claims one file for reindexing and returns a transaction guard. The whole
//! clear + re-tag + stamp sequence for a file commits atomically: dropping
//! the guard without committing leaves the pre-reindex state intact, so an
//! interrupted run simply leaves the file stale for the next scan.

use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::MutexGuard;
use tracing::{debug, warn};

use crate::error::Result;
use crate::store::sqlite::{ensure_file, insert_include, insert_tag, SqliteStore};
use crate::store::models::Fact;
use crate::store::FileStat;

impl SqliteStore {
    /// Returns the next compilation unit to reparse, or `None` when nothing
    /// is stale.
    ///
    /// Included files are scanned ordered by how many sources include them,
    /// fewest first: rarely-included files are cheaper to reparse and more
    /// likely project-local headers than widely shared system headers. A
    /// file that has vanished from disk is deregistered (with full cascade)
    /// and the scan continues. The returned path is the *including source*,
    /// since headers are never reparsed standalone.
    pub fn next_file(&self, probe: &dyn FileStat) -> Result<Option<String>> {
        let candidates: Vec<(String, i64, String)> = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT included.path, included.indexed_at, source.path,
                        COUNT(source.id) AS source_count
                 FROM includes
                 JOIN files AS source ON source.id = includes.source_id
                 JOIN files AS included ON included.id = includes.included_id
                 GROUP BY included.id
                 ORDER BY source_count",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect::<std::result::Result<_, _>>()?
        };

        for (included, indexed_at, source) in candidates {
            match probe.mtime(Path::new(&included)) {
                None => {
                    // Expected steady-state event: headers get deleted and
                    // renamed between indexing runs.
                    warn!(file = %included, "file vanished from disk, removing from index");
                    self.remove_file(&included)?;
                }
                Some(mtime) if mtime > indexed_at => {
                    debug!(stale = %included, source = %source, "stale file found");
                    return Ok(Some(source));
                }
                Some(_) => {}
            }
        }

        Ok(None)
    }

    /// Claims `path` for reindexing if `mtime` is newer than its last
    /// indexed time; returns `None` when the file is already fresh.
    ///
    /// On a claim, the file's tags and outgoing include edges are cleared
    /// inside an exclusive transaction (the header set is rediscovered by
    /// the fresh parse; only the reflexive edge is kept). The fresh facts
    /// are fed through the returned guard, and `indexed_at` is stamped only
    /// when [`FileReindex::commit`] runs.
    pub fn begin_file(&self, path: &str, mtime: i64) -> Result<Option<FileReindex<'_>>> {
        let conn = self.conn();
        conn.execute_batch("BEGIN IMMEDIATE")?;

        match claim(&conn, path, mtime) {
            Ok(Some(file_id)) => {
                debug!(file = %path, mtime, "claimed file for reindex");
                Ok(Some(FileReindex {
                    conn,
                    file_id,
                    mtime,
                    committed: false,
                }))
            }
            Ok(None) => {
                conn.execute_batch("ROLLBACK")?;
                Ok(None)
            }
            Err(err) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(err)
            }
        }
    }
}

fn claim(conn: &Connection, path: &str, mtime: i64) -> Result<Option<i64>> {
    let file_id = ensure_file(conn, path)?;
    let indexed_at: i64 = conn.query_row(
        "SELECT indexed_at FROM files WHERE id = ?1",
        params![file_id],
        |row| row.get(0),
    )?;
    if mtime <= indexed_at {
        return Ok(None);
    }

    conn.execute("DELETE FROM tags WHERE file_id = ?1", params![file_id])?;
    conn.execute("DELETE FROM includes WHERE source_id = ?1", params![file_id])?;
    // A crash-free parse that reports no inclusions must still leave the
    // file reachable by the scheduler and the command lookup.
    insert_include(conn, file_id, file_id)?;

    Ok(Some(file_id))
}

/// In-progress reindex of a single file.
///
/// Holds the store connection for the duration of the file's transaction;
/// queries and other writers wait until it commits or rolls back.
pub struct FileReindex<'a> {
    conn: MutexGuard<'a, Connection>,
    file_id: i64,
    mtime: i64,
    committed: bool,
}

impl FileReindex<'_> {
    /// Records one symbol occurrence from the fresh parse. Same semantics
    /// as [`SqliteStore::add_tag`], inside the claim transaction.
    pub fn add_tag(&self, fact: &Fact) -> Result<bool> {
        insert_tag(&self.conn, fact)
    }

    /// Records an include edge discovered by the fresh parse. Unlike
    /// [`SqliteStore::add_include`], unknown endpoints are registered on the
    /// fly: this is exactly where new headers enter the tracked set.
    pub fn add_include(&self, included: &str, source: &str) -> Result<()> {
        let included_id = ensure_file(&self.conn, included)?;
        let source_id = ensure_file(&self.conn, source)?;
        insert_include(&self.conn, included_id, source_id)
    }

    /// Stamps `indexed_at` with the claimed mtime and commits the whole
    /// clear + insert + stamp sequence.
    pub fn commit(mut self) -> Result<()> {
        self.conn.execute(
            "UPDATE files SET indexed_at = ?1 WHERE id = ?2",
            params![self.mtime, self.file_id],
        )?;
        self.conn.execute_batch("COMMIT")?;
        self.committed = true;
        debug!(file_id = self.file_id, mtime = self.mtime, "reindex committed");
        Ok(())
    }
}

impl Drop for FileReindex<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}
