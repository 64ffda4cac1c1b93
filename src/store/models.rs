use serde::{Deserialize, Serialize};

/// One symbol occurrence reported by the external AST walker.
///
/// `usr` is the symbol's globally unique identifier, stable across
/// translation units; a symbol accumulates one `Fact` per occurrence,
/// possibly across many files. Ranges are inclusive byte offsets with
/// their line/column equivalents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub usr: String,
    pub kind: String,
    pub spelling: String,
    pub file: String,
    pub line1: i64,
    pub col1: i64,
    pub offset1: i64,
    pub line2: i64,
    pub col2: i64,
    pub offset2: i64,
    pub is_declaration: bool,
    pub is_virtual: bool,
    /// USRs of the methods this occurrence overrides. Only consulted when
    /// `is_virtual` is set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overridden_usrs: Vec<String>,
}

/// One record of the walker's ingestion stream (JSON lines).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexEvent {
    /// A symbol occurrence in some file of the translation unit.
    Tag(Fact),
    /// `source`'s compilation transitively includes `included`.
    Include { included: String, source: String },
}

/// A symbol occurrence projected for query results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub file: String,
    pub line1: i64,
    pub line2: i64,
    pub col1: i64,
    pub col2: i64,
    pub offset1: i64,
    pub offset2: i64,
    pub kind: String,
    pub spelling: String,
}

/// Full detail of a symbol's declaration site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Definition {
    pub usr: String,
    pub file: String,
    pub line1: i64,
    pub line2: i64,
    pub col1: i64,
    pub col2: i64,
    pub kind: String,
    pub spelling: String,
    pub is_virtual: bool,
}

/// A reference joined to the declaration it resolves to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefDef {
    #[serde(rename = "ref")]
    pub reference: Reference,
    #[serde(rename = "def")]
    pub definition: Definition,
}

/// Working directory and argument list needed to parse a compilation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileCommand {
    pub directory: String,
    pub args: Vec<String>,
}

/// Row counts for the persisted relations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub files: i64,
    pub tags: i64,
    pub usrs: i64,
    pub includes: i64,
    pub commands: i64,
}
