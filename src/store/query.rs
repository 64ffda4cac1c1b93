//! Read-only query algorithms over the tag store and override graph.
//!
//! All queries return plain records and an empty vec for unknown inputs;
//! "not found" is never an error here.

use rusqlite::Row;

use crate::error::Result;
use crate::store::models::{Definition, RefDef, Reference};
use crate::store::sqlite::SqliteStore;

fn reference_from_row(row: &Row<'_>) -> rusqlite::Result<Reference> {
    Ok(Reference {
        file: row.get(0)?,
        line1: row.get(1)?,
        line2: row.get(2)?,
        col1: row.get(3)?,
        col2: row.get(4)?,
        offset1: row.get(5)?,
        offset2: row.get(6)?,
        kind: row.get(7)?,
        spelling: row.get(8)?,
    })
}

// Columns 9..=17 carry the definition side of a RefDef row.
fn ref_def_from_row(row: &Row<'_>) -> rusqlite::Result<RefDef> {
    Ok(RefDef {
        reference: reference_from_row(row)?,
        definition: Definition {
            usr: row.get(9)?,
            file: row.get(10)?,
            line1: row.get(11)?,
            line2: row.get(12)?,
            col1: row.get(13)?,
            col2: row.get(14)?,
            kind: row.get(15)?,
            spelling: row.get(16)?,
            is_virtual: row.get(17)?,
        },
    })
}

impl SqliteStore {
    /// Every recorded occurrence of `usr`, across all files.
    pub fn grep(&self, usr: &str) -> Result<Vec<Reference>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT ref_file.path, ref.line1, ref.line2, ref.col1, ref.col2,
                    ref.offset1, ref.offset2, ref.kind, ref.spelling
             FROM tags AS ref
             JOIN files AS ref_file ON ref_file.id = ref.file_id
             WHERE ref.usr = ?1",
        )?;
        let rows = stmt.query_map([usr], reference_from_row)?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Resolves whatever symbol occurrence encloses `offset` in `path` to
    /// its declaration(s).
    ///
    /// Ordered ascending by the enclosing reference's range size, so the
    /// tightest enclosing symbol comes first: a local variable reference
    /// nested inside the enclosing function's own range wins over the
    /// function.
    pub fn find_definition(&self, path: &str, offset: i64) -> Result<Vec<RefDef>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT ref_file.path, ref.line1, ref.line2, ref.col1, ref.col2,
                    ref.offset1, ref.offset2, ref.kind, ref.spelling,
                    def.usr, def_file.path, def.line1, def.line2, def.col1,
                    def.col2, def.kind, def.spelling, def.is_virtual
             FROM tags AS ref
             JOIN tags AS def ON def.usr = ref.usr
             JOIN files AS def_file ON def_file.id = def.file_id
             JOIN files AS ref_file ON ref_file.id = ref.file_id
             WHERE def.is_decl = 1
               AND ref_file.path = ?1
               AND ref.offset1 <= ?2
               AND ref.offset2 >= ?2
             ORDER BY (ref.offset2 - ref.offset1)",
        )?;
        let rows = stmt.query_map(rusqlite::params![path, offset], ref_def_from_row)?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Occurrences of every method that `usr` overrides: a grep on a
    /// virtual method extended to surface its ancestors, polymorphism-aware.
    ///
    /// Every tag of every distinct overridden ancestor is returned; edges
    /// whose ancestor has no tags yet (header not indexed) contribute
    /// nothing.
    pub fn find_overridden_references(&self, usr: &str) -> Result<Vec<Reference>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT ref_file.path, ref.line1, ref.line2, ref.col1,
                    ref.col2, ref.offset1, ref.offset2, ref.kind, ref.spelling
             FROM overrides
             JOIN tags AS ref ON ref.usr = overrides.overridden_usr
             JOIN files AS ref_file ON ref_file.id = ref.file_id
             WHERE overrides.usr = ?1",
        )?;
        let rows = stmt.query_map([usr], reference_from_row)?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Like [`find_overridden_references`], but joined through to the full
    /// declaration detail of each ancestor, one row per distinct ancestor,
    /// ordered ascending by the declaration's range size. For callers that
    /// jump straight to the ancestor declaration.
    ///
    /// [`find_overridden_references`]: SqliteStore::find_overridden_references
    pub fn find_overridden_definitions(&self, usr: &str) -> Result<Vec<RefDef>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT ref_file.path, ref.line1, ref.line2, ref.col1, ref.col2,
                    ref.offset1, ref.offset2, ref.kind, ref.spelling,
                    def.usr, def_file.path, def.line1, def.line2, def.col1,
                    def.col2, def.kind, def.spelling, def.is_virtual
             FROM overrides
             JOIN tags AS def ON def.usr = overrides.overridden_usr AND def.is_decl = 1
             JOIN files AS def_file ON def_file.id = def.file_id
             JOIN tags AS ref ON ref.usr = overrides.overridden_usr
             JOIN files AS ref_file ON ref_file.id = ref.file_id
             WHERE overrides.usr = ?1
             GROUP BY overrides.overridden_usr
             ORDER BY (def.offset2 - def.offset1)",
        )?;
        let rows = stmt.query_map([usr], ref_def_from_row)?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }
}
