//! Versioned database migrations for SqliteStore.
//!
//! Migrations are tracked in the `meta` table with key `schema_version`.
//! Each migration has a version number and runs exactly once.

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version. Increment when adding new migrations.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Migration function type.
type MigrationFn = fn(&Connection) -> Result<()>;

/// All migrations in order. Index + 1 = version number.
const MIGRATIONS: &[MigrationFn] = &[migration_v1_base_schema, migration_v2_range_lookup_index];

/// Runs all pending migrations on the database.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    for (idx, migration) in MIGRATIONS.iter().enumerate() {
        let version = (idx + 1) as u32;
        if version > current_version {
            migration(conn)?;
            set_schema_version(conn, version)?;
        }
    }

    Ok(())
}

/// Gets the current schema version from the database.
fn get_schema_version(conn: &Connection) -> Result<u32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;

    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .ok();

    Ok(version.and_then(|v| v.parse().ok()).unwrap_or(0))
}

/// Sets the schema version in the database.
fn set_schema_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
        [version.to_string()],
    )?;
    Ok(())
}

/// Checks if a table exists.
#[cfg_attr(not(test), allow(dead_code))]
fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Checks if an index exists.
#[cfg_attr(not(test), allow(dead_code))]
fn index_exists(conn: &Connection, index: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name=?1",
        [index],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

// ============================================================================
// Migrations
// ============================================================================

/// V1: Base schema - the six persisted relations and their core indexes.
///
/// `overrides.overridden_usr` deliberately has no foreign key: the overridden
/// method may live in a header that has not been indexed yet, and queries
/// tolerate the dangling edge until it is.
fn migration_v1_base_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Tracked files: path and the mtime as of the last successful index
        -- (0 = never indexed). Deleting a file cascades everywhere.
        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            indexed_at INTEGER NOT NULL DEFAULT 0
        );

        -- Compile commands, at most one per file; args is a JSON array.
        CREATE TABLE IF NOT EXISTS commands (
            file_id INTEGER NOT NULL UNIQUE REFERENCES files(id) ON DELETE CASCADE,
            directory TEXT NOT NULL,
            args TEXT NOT NULL
        );

        -- Include graph: source's compilation transitively pulls in included.
        -- Every file with a compile command also carries its reflexive edge.
        CREATE TABLE IF NOT EXISTS includes (
            source_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            included_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            UNIQUE(source_id, included_id)
        );
        CREATE INDEX IF NOT EXISTS idx_includes_included ON includes(included_id);

        -- Symbol occurrences. The UNIQUE constraint is the ingestion
        -- dedup: the same occurrence is never recorded twice.
        CREATE TABLE IF NOT EXISTS tags (
            file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            usr TEXT NOT NULL,
            kind TEXT NOT NULL,
            spelling TEXT NOT NULL,
            line1 INTEGER NOT NULL,
            col1 INTEGER NOT NULL,
            offset1 INTEGER NOT NULL,
            line2 INTEGER NOT NULL,
            col2 INTEGER NOT NULL,
            offset2 INTEGER NOT NULL,
            is_decl INTEGER NOT NULL DEFAULT 0,
            is_virtual INTEGER NOT NULL DEFAULT 0,
            UNIQUE(file_id, usr, offset1, offset2)
        );
        CREATE INDEX IF NOT EXISTS idx_tags_usr ON tags(usr);

        -- Override graph: usr (a virtual method) overrides overridden_usr.
        CREATE TABLE IF NOT EXISTS overrides (
            usr TEXT NOT NULL,
            overridden_usr TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_overrides_usr ON overrides(usr);

        -- Small persisted key/value settings for surrounding tooling.
        CREATE TABLE IF NOT EXISTS options (
            name TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

/// V2: Composite index for offset containment lookups (find-definition).
fn migration_v2_range_lookup_index(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tags_range ON tags(file_id, offset1, offset2)",
        [],
    )?;
    Ok(())
}
