use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::store::migrations;
use crate::store::models::{CompileCommand, Fact, IndexStats};

/// SQLite-backed store for the cross-reference index.
///
/// Single-writer model: one `SqliteStore` owns the database file; the inner
/// mutex serializes all access within the process. Multi-statement mutations
/// that must not be observed half-done run under the reindex transaction
/// guard (see `store::reindex`).
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::configure_pragmas(&conn)?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests and throwaway sessions.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure_pragmas(&conn)?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Configure SQLite PRAGMA settings.
    /// Foreign keys must be on: cascade deletes implement the referential
    /// integrity invariant for commands, includes and tags.
    fn configure_pragmas(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ------------------------------------------------------------------
    // File registry
    // ------------------------------------------------------------------

    /// Looks up the id of a registered path.
    pub fn file_id(&self, path: &str) -> Result<Option<i64>> {
        file_id_of(&self.conn(), path)
    }

    /// Returns the existing id for `path` or registers it unindexed.
    pub fn add_file(&self, path: &str) -> Result<i64> {
        ensure_file(&self.conn(), path)
    }

    /// Deletes a file and everything that references it: its compile
    /// command, include edges in both directions, and tags. Unknown paths
    /// are a no-op.
    pub fn remove_file(&self, path: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM files WHERE path = ?1", params![path])?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Include graph
    // ------------------------------------------------------------------

    /// Records that `source`'s compilation includes `included`.
    ///
    /// Both endpoints must already be registered; unlike tag ingestion this
    /// is an error, since an include edge with an unknown endpoint means the
    /// caller skipped registration.
    pub fn add_include(&self, included: &str, source: &str) -> Result<()> {
        let conn = self.conn();
        let included_id = file_id_of(&conn, included)?
            .ok_or_else(|| StoreError::UnknownFile(included.to_string()))?;
        let source_id = file_id_of(&conn, source)?
            .ok_or_else(|| StoreError::UnknownFile(source.to_string()))?;
        insert_include(&conn, included_id, source_id)
    }

    /// Id-level edge insertion; idempotent for the same ordered pair.
    pub fn add_include_ids(&self, included_id: i64, source_id: i64) -> Result<()> {
        insert_include(&self.conn(), included_id, source_id)
    }

    // ------------------------------------------------------------------
    // Compile commands
    // ------------------------------------------------------------------

    /// Registers (or replaces) the compile command for `path` and installs
    /// the reflexive include edge so the file is its own trivial root.
    pub fn set_compile_command(
        &self,
        path: &str,
        directory: &str,
        args: &[String],
    ) -> Result<i64> {
        let conn = self.conn();
        let file_id = ensure_file(&conn, path)?;
        insert_include(&conn, file_id, file_id)?;
        conn.execute(
            "INSERT INTO commands (file_id, directory, args) VALUES (?1, ?2, ?3)
             ON CONFLICT(file_id) DO UPDATE SET
                directory = excluded.directory,
                args = excluded.args",
            params![file_id, directory, serde_json::to_string(args)?],
        )?;
        Ok(file_id)
    }

    /// Resolves the compile command for `path` through the include graph:
    /// a header inherits the command of any source that includes it.
    pub fn get_compile_command(&self, path: &str) -> Result<CompileCommand> {
        let conn = self.conn();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT commands.directory, commands.args
                 FROM includes
                 JOIN commands ON commands.file_id = includes.source_id
                 JOIN files ON files.id = includes.included_id
                 WHERE files.path = ?1
                 LIMIT 1",
                params![path],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (directory, args) =
            row.ok_or_else(|| StoreError::NoCompileCommand(path.to_string()))?;
        let args = serde_json::from_str(&args).map_err(|source| StoreError::Deserialization {
            name: format!("compile command args for {path}"),
            source,
        })?;
        Ok(CompileCommand { directory, args })
    }

    // ------------------------------------------------------------------
    // Tag ingestion
    // ------------------------------------------------------------------

    /// Records one symbol occurrence. Returns whether a new row was
    /// inserted; re-ingesting the same `(file, usr, offset1, offset2)` is a
    /// no-op, and facts for unregistered files are silently skipped (they
    /// belong to headers outside the tracked set).
    pub fn add_tag(&self, fact: &Fact) -> Result<bool> {
        insert_tag(&self.conn(), fact)
    }

    // ------------------------------------------------------------------
    // Options
    // ------------------------------------------------------------------

    pub fn set_option(&self, name: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO options (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value",
            params![name, value],
        )?;
        Ok(())
    }

    pub fn set_option_list(&self, name: &str, values: &[String]) -> Result<()> {
        self.set_option(name, &serde_json::to_string(values)?)
    }

    pub fn get_option(&self, name: &str) -> Result<String> {
        self.conn()
            .query_row(
                "SELECT value FROM options WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::MissingOption(name.to_string()))
    }

    /// A malformed stored list is a hard error: it indicates store
    /// corruption, not a missing setting.
    pub fn get_option_list(&self, name: &str) -> Result<Vec<String>> {
        let value = self.get_option(name)?;
        serde_json::from_str(&value).map_err(|source| StoreError::Deserialization {
            name: name.to_string(),
            source,
        })
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Drops all tags and override edges and marks every file unindexed,
    /// forcing a full reparse while keeping the file set, include graph and
    /// compile commands.
    pub fn clean_index(&self) -> Result<()> {
        self.conn().execute_batch(
            "BEGIN;
             DELETE FROM tags;
             DELETE FROM overrides;
             UPDATE files SET indexed_at = 0;
             COMMIT;",
        )?;
        debug!("index cleaned, all files marked stale");
        Ok(())
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let conn = self.conn();
        let count = |sql: &str| -> Result<i64> {
            Ok(conn.query_row(sql, [], |row| row.get(0))?)
        };
        Ok(IndexStats {
            files: count("SELECT COUNT(*) FROM files")?,
            tags: count("SELECT COUNT(*) FROM tags")?,
            usrs: count("SELECT COUNT(DISTINCT usr) FROM tags")?,
            includes: count("SELECT COUNT(*) FROM includes")?,
            commands: count("SELECT COUNT(*) FROM commands")?,
        })
    }
}

// ----------------------------------------------------------------------
// Connection-level helpers, shared with the reindex transaction guard.
// ----------------------------------------------------------------------

pub(crate) fn file_id_of(conn: &Connection, path: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM files WHERE path = ?1",
        params![path],
        |row| row.get(0),
    )
    .optional()
    .map_err(Into::into)
}

pub(crate) fn ensure_file(conn: &Connection, path: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO files (path, indexed_at) VALUES (?1, 0)
         ON CONFLICT(path) DO NOTHING",
        params![path],
    )?;
    let id = conn.query_row(
        "SELECT id FROM files WHERE path = ?1",
        params![path],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub(crate) fn insert_include(conn: &Connection, included_id: i64, source_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO includes (source_id, included_id) VALUES (?1, ?2)",
        params![source_id, included_id],
    )?;
    Ok(())
}

pub(crate) fn insert_tag(conn: &Connection, fact: &Fact) -> Result<bool> {
    let Some(file_id) = file_id_of(conn, &fact.file)? else {
        debug!(file = %fact.file, usr = %fact.usr, "skipping tag for untracked file");
        return Ok(false);
    };

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO tags
            (file_id, usr, kind, spelling,
             line1, col1, offset1, line2, col2, offset2, is_decl, is_virtual)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            file_id,
            fact.usr,
            fact.kind,
            fact.spelling,
            fact.line1,
            fact.col1,
            fact.offset1,
            fact.line2,
            fact.col2,
            fact.offset2,
            fact.is_declaration,
            fact.is_virtual,
        ],
    )? > 0;

    // Override edges fan out only on a genuine insert, so re-ingesting the
    // same occurrence cannot duplicate them.
    if inserted && fact.is_virtual {
        for overridden in &fact.overridden_usrs {
            conn.execute(
                "INSERT INTO overrides (usr, overridden_usr) VALUES (?1, ?2)",
                params![fact.usr, overridden],
            )?;
        }
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::Fact;

    fn fact(usr: &str, file: &str, offset1: i64, offset2: i64) -> Fact {
        Fact {
            usr: usr.to_string(),
            kind: "FunctionDecl".to_string(),
            spelling: usr.to_string(),
            file: file.to_string(),
            line1: 1,
            col1: 1,
            offset1,
            line2: 1,
            col2: 1 + (offset2 - offset1),
            offset2,
            is_declaration: true,
            is_virtual: false,
            overridden_usrs: Vec::new(),
        }
    }

    #[test]
    fn test_add_file_is_get_or_create() {
        let store = SqliteStore::in_memory().unwrap();

        let a = store.add_file("a.cpp").unwrap();
        let b = store.add_file("a.cpp").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.file_id("a.cpp").unwrap(), Some(a));
        assert_eq!(store.file_id("other.cpp").unwrap(), None);
    }

    #[test]
    fn test_include_requires_known_endpoints() {
        let store = SqliteStore::in_memory().unwrap();
        store.add_file("a.cpp").unwrap();

        let err = store.add_include("a.h", "a.cpp").unwrap_err();
        assert!(matches!(err, StoreError::UnknownFile(ref f) if f == "a.h"));

        store.add_file("a.h").unwrap();
        store.add_include("a.h", "a.cpp").unwrap();
        // Idempotent for the same ordered pair.
        store.add_include("a.h", "a.cpp").unwrap();

        let count: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM includes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_compile_command_inheritance() {
        let store = SqliteStore::in_memory().unwrap();
        let args = vec!["-I.".to_string(), "-std=c++17".to_string()];

        store.set_compile_command("a.cpp", "/proj", &args).unwrap();
        store.add_file("a.h").unwrap();
        store.add_include("a.h", "a.cpp").unwrap();

        // The source finds its own command through the reflexive edge.
        let own = store.get_compile_command("a.cpp").unwrap();
        assert_eq!(own.directory, "/proj");
        assert_eq!(own.args, args);

        // The header inherits the including source's command.
        let inherited = store.get_compile_command("a.h").unwrap();
        assert_eq!(inherited.directory, "/proj");
        assert_eq!(inherited.args, args);

        let err = store.get_compile_command("lonely.h").unwrap_err();
        assert!(matches!(err, StoreError::NoCompileCommand(_)));
    }

    #[test]
    fn test_compile_command_replaced_on_reset() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .set_compile_command("a.cpp", "/proj", &["-O0".to_string()])
            .unwrap();
        store
            .set_compile_command("a.cpp", "/proj2", &["-O2".to_string()])
            .unwrap();

        let cmd = store.get_compile_command("a.cpp").unwrap();
        assert_eq!(cmd.directory, "/proj2");
        assert_eq!(cmd.args, vec!["-O2".to_string()]);

        let rows: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM commands", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_args_round_trip_exactly() {
        let store = SqliteStore::in_memory().unwrap();
        let args = vec![
            String::new(),
            "-DNAME=\"quoted value\"".to_string(),
            "spaces and\ttabs".to_string(),
        ];

        store.set_compile_command("a.cpp", "/proj", &args).unwrap();
        assert_eq!(store.get_compile_command("a.cpp").unwrap().args, args);

        store.set_compile_command("b.cpp", "/proj", &[]).unwrap();
        assert!(store.get_compile_command("b.cpp").unwrap().args.is_empty());
    }

    #[test]
    fn test_add_tag_deduplicates() {
        let store = SqliteStore::in_memory().unwrap();
        store.add_file("a.cpp").unwrap();

        assert!(store.add_tag(&fact("c:@F@f", "a.cpp", 10, 20)).unwrap());
        assert!(!store.add_tag(&fact("c:@F@f", "a.cpp", 10, 20)).unwrap());

        let count: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM tags", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_add_tag_skips_untracked_file() {
        let store = SqliteStore::in_memory().unwrap();

        // System headers outside the project are not registered; their
        // occurrences are dropped without error.
        assert!(!store
            .add_tag(&fact("c:@F@printf", "/usr/include/stdio.h", 5, 11))
            .unwrap());
    }

    #[test]
    fn test_virtual_tag_records_override_edges() {
        let store = SqliteStore::in_memory().unwrap();
        store.add_file("b.cpp").unwrap();

        let mut f = fact("c:@S@B@F@f#", "b.cpp", 30, 60);
        f.is_virtual = true;
        f.overridden_usrs = vec!["c:@S@A@F@f#".to_string()];

        assert!(store.add_tag(&f).unwrap());
        // Re-ingesting the identical occurrence must not duplicate edges.
        assert!(!store.add_tag(&f).unwrap());

        let edges: i64 = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM overrides WHERE usr = 'c:@S@B@F@f#'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(edges, 1);
    }

    #[test]
    fn test_remove_file_cascades() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .set_compile_command("a.cpp", "/proj", &["-I.".to_string()])
            .unwrap();
        store.add_file("a.h").unwrap();
        store.add_include("a.h", "a.cpp").unwrap();
        store.add_tag(&fact("c:@F@f", "a.cpp", 10, 20)).unwrap();

        store.remove_file("a.cpp").unwrap();

        let conn = store.conn();
        let commands: i64 = conn
            .query_row("SELECT COUNT(*) FROM commands", [], |row| row.get(0))
            .unwrap();
        let includes: i64 = conn
            .query_row("SELECT COUNT(*) FROM includes", [], |row| row.get(0))
            .unwrap();
        let tags: i64 = conn
            .query_row("SELECT COUNT(*) FROM tags", [], |row| row.get(0))
            .unwrap();
        assert_eq!((commands, includes, tags), (0, 0, 0));
        drop(conn);

        // Unknown path is a silent no-op.
        store.remove_file("never-registered.cpp").unwrap();
    }

    #[test]
    fn test_options_round_trip() {
        let store = SqliteStore::in_memory().unwrap();

        store.set_option("source-dir", "/proj/src").unwrap();
        assert_eq!(store.get_option("source-dir").unwrap(), "/proj/src");

        store.set_option("source-dir", "/proj/lib").unwrap();
        assert_eq!(store.get_option("source-dir").unwrap(), "/proj/lib");

        let err = store.get_option("missing").unwrap_err();
        assert!(matches!(err, StoreError::MissingOption(_)));

        let list = vec!["a b".to_string(), String::new(), "c\"d".to_string()];
        store.set_option_list("extra-flags", &list).unwrap();
        assert_eq!(store.get_option_list("extra-flags").unwrap(), list);
    }

    #[test]
    fn test_malformed_option_list_is_hard_error() {
        let store = SqliteStore::in_memory().unwrap();

        store.set_option("extra-flags", "not json [").unwrap();
        let err = store.get_option_list("extra-flags").unwrap_err();
        assert!(matches!(err, StoreError::Deserialization { .. }));
    }

    #[test]
    fn test_clean_index_resets_tags_and_staleness() {
        let store = SqliteStore::in_memory().unwrap();
        store.add_file("b.cpp").unwrap();

        let mut f = fact("c:@S@B@F@f#", "b.cpp", 30, 60);
        f.is_virtual = true;
        f.overridden_usrs = vec!["c:@S@A@F@f#".to_string()];
        store.add_tag(&f).unwrap();

        store.clean_index().unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.tags, 0);
        let overrides: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM overrides", [], |row| row.get(0))
            .unwrap();
        assert_eq!(overrides, 0);

        // File rows survive, marked unindexed.
        assert!(store.file_id("b.cpp").unwrap().is_some());
        // Override edges are rebuilt on re-ingest, without duplicates.
        assert!(store.add_tag(&f).unwrap());
        let edges: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM overrides", [], |row| row.get(0))
            .unwrap();
        assert_eq!(edges, 1);
    }

    #[test]
    fn test_stats_counts() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .set_compile_command("a.cpp", "/proj", &["-I.".to_string()])
            .unwrap();
        store.add_tag(&fact("c:@F@f", "a.cpp", 10, 20)).unwrap();
        store.add_tag(&fact("c:@F@f", "a.cpp", 40, 50)).unwrap();
        store.add_tag(&fact("c:@F@g", "a.cpp", 60, 70)).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.tags, 3);
        assert_eq!(stats.usrs, 2);
        assert_eq!(stats.includes, 1);
        assert_eq!(stats.commands, 1);
    }
}
