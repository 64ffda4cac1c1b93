use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{debug, info, warn};

use cxref::error::Result;
use cxref::store::models::IndexEvent;
use cxref::store::{FileStat, FsStat, SqliteStore};

#[derive(Parser)]
#[command(name = "cxref")]
#[command(about = "Incremental cross-reference index for clang-based symbol facts")]
#[command(version)]
#[command(after_long_help = r#"
EXAMPLES:
    # Register compile commands from a clang compilation database
    cxref load-commands compile_commands.json

    # Ask the scheduler which compilation unit to reparse next
    cxref next-file

    # Feed one translation unit's facts (JSON lines from the AST walker)
    cxref ingest --facts a.cpp.facts.jsonl

    # Where is this symbol used?
    cxref grep 'c:@S@B@F@f#'

    # ...including occurrences of the methods it overrides
    cxref grep 'c:@S@B@F@f#' --overrides

    # What declaration does the symbol at this offset resolve to?
    cxref find-def src/main.cpp 1542
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the index database
    #[arg(long, default_value = ".cxref.db")]
    pub db: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register compile commands from a compilation database (JSON)
    LoadCommands {
        /// Path to compile_commands.json
        path: PathBuf,
    },

    /// Ingest AST walker facts (JSON lines) for stale files
    Ingest {
        /// Facts file; stdin when omitted
        #[arg(long)]
        facts: Option<PathBuf>,
    },

    /// Print the next compilation unit that needs reparsing
    NextFile,

    /// List every occurrence of a symbol
    Grep {
        /// The symbol's USR
        usr: String,

        /// Also list declarations of the methods this one overrides
        #[arg(long)]
        overrides: bool,
    },

    /// Resolve the symbol at a byte offset to its declaration(s)
    FindDef {
        /// File path as registered in the index
        file: String,

        /// Byte offset within the file
        offset: i64,
    },

    /// Remove a file and everything referencing it from the index
    Remove {
        /// File path as registered in the index
        path: String,
    },

    /// Drop all tags and mark every file stale
    Clean,

    /// Show row counts for the persisted relations
    Stats,

    /// Read or write persisted settings
    #[command(name = "option")]
    Opt {
        #[command(subcommand)]
        command: OptionCommands,
    },
}

#[derive(Subcommand)]
pub enum OptionCommands {
    /// Print a stored option value
    Get {
        name: String,

        /// Decode the value as a string list
        #[arg(long)]
        list: bool,
    },

    /// Store an option value
    Set {
        name: String,

        /// One value, or several with --list
        #[arg(required = true)]
        values: Vec<String>,

        /// Store the values as a string list
        #[arg(long)]
        list: bool,
    },
}

/// One entry of a clang compilation database.
#[derive(Debug, Deserialize)]
struct CompileDbEntry {
    directory: String,
    file: String,
    #[serde(default)]
    arguments: Option<Vec<String>>,
    #[serde(default)]
    command: Option<String>,
}

impl CompileDbEntry {
    fn args(&self) -> Vec<String> {
        match (&self.arguments, &self.command) {
            (Some(arguments), _) => arguments.clone(),
            // Whitespace split is what clang tooling does absent an
            // `arguments` array; embedded quoting is not interpreted.
            (None, Some(command)) => command.split_whitespace().map(str::to_string).collect(),
            (None, None) => Vec::new(),
        }
    }
}

pub fn load_commands(db_path: &Path, path: &Path) -> Result<()> {
    let store = SqliteStore::open(db_path)?;
    let entries: Vec<CompileDbEntry> = serde_json::from_str(&fs::read_to_string(path)?)?;

    let count = entries.len();
    for entry in entries {
        store.set_compile_command(&entry.file, &entry.directory, &entry.args())?;
    }

    info!(count, "compile commands registered");
    Ok(())
}

pub fn ingest(db_path: &Path, facts: Option<&Path>) -> Result<()> {
    let store = SqliteStore::open(db_path)?;
    let events = read_events(facts)?;

    // Group the translation unit's facts per file: each file is claimed,
    // re-tagged and committed as one unit, so a crash mid-stream leaves
    // untouched files either fully old or fully new.
    let mut tags: BTreeMap<String, Vec<cxref::Fact>> = BTreeMap::new();
    let mut includes: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
    for event in events {
        match event {
            IndexEvent::Tag(fact) => tags.entry(fact.file.clone()).or_default().push(fact),
            IndexEvent::Include { included, source } => includes
                .entry(source.clone())
                .or_default()
                .push((included, source)),
        }
    }

    let mut files: Vec<&String> = tags.keys().chain(includes.keys()).collect();
    files.sort();
    files.dedup();

    let mut indexed = 0usize;
    for file in files {
        let Some(mtime) = FsStat.mtime(Path::new(file)) else {
            warn!(file = %file, "cannot stat file, skipping its facts");
            continue;
        };
        let Some(claim) = store.begin_file(file, mtime)? else {
            debug!(file = %file, "already fresh, skipping");
            continue;
        };
        for fact in tags.get(file).into_iter().flatten() {
            claim.add_tag(fact)?;
        }
        for (included, source) in includes.get(file).into_iter().flatten() {
            claim.add_include(included, source)?;
        }
        claim.commit()?;
        indexed += 1;
    }

    info!(indexed, "files reindexed");
    Ok(())
}

fn read_events(facts: Option<&Path>) -> Result<Vec<IndexEvent>> {
    let reader: Box<dyn BufRead> = match facts {
        Some(path) => Box::new(BufReader::new(fs::File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        events.push(serde_json::from_str(&line)?);
    }
    Ok(events)
}

pub fn next_file(db_path: &Path) -> Result<()> {
    let store = SqliteStore::open(db_path)?;
    if let Some(source) = store.next_file(&FsStat)? {
        println!("{source}");
    }
    Ok(())
}

pub fn grep(db_path: &Path, usr: &str, overrides: bool) -> Result<()> {
    let store = SqliteStore::open(db_path)?;

    for reference in store.grep(usr)? {
        println!("{}", serde_json::to_string(&reference)?);
    }

    if overrides {
        for ref_def in store.find_overridden_definitions(usr)? {
            println!("{}", serde_json::to_string(&ref_def)?);
        }
    }

    Ok(())
}

pub fn find_definition(db_path: &Path, file: &str, offset: i64) -> Result<()> {
    let store = SqliteStore::open(db_path)?;
    for ref_def in store.find_definition(file, offset)? {
        println!("{}", serde_json::to_string(&ref_def)?);
    }
    Ok(())
}

pub fn remove(db_path: &Path, path: &str) -> Result<()> {
    let store = SqliteStore::open(db_path)?;
    store.remove_file(path)?;
    info!(file = %path, "removed from index");
    Ok(())
}

pub fn clean(db_path: &Path) -> Result<()> {
    let store = SqliteStore::open(db_path)?;
    store.clean_index()?;
    info!("index cleaned");
    Ok(())
}

pub fn stats(db_path: &Path) -> Result<()> {
    let store = SqliteStore::open(db_path)?;
    println!("{}", serde_json::to_string_pretty(&store.stats()?)?);
    Ok(())
}

pub fn option_get(db_path: &Path, name: &str, list: bool) -> Result<()> {
    let store = SqliteStore::open(db_path)?;
    if list {
        println!("{}", serde_json::to_string(&store.get_option_list(name)?)?);
    } else {
        println!("{}", store.get_option(name)?);
    }
    Ok(())
}

pub fn option_set(db_path: &Path, name: &str, values: &[String], list: bool) -> Result<()> {
    let store = SqliteStore::open(db_path)?;
    if list || values.len() > 1 {
        store.set_option_list(name, values)?;
    } else {
        store.set_option(name, &values[0])?;
    }
    Ok(())
}
