pub mod error;
pub mod store;

pub use error::{Result, StoreError};
pub use store::models::{
    CompileCommand, Definition, Fact, IndexEvent, IndexStats, RefDef, Reference,
};
pub use store::reindex::FileReindex;
pub use store::sqlite::SqliteStore;
pub use store::{FileStat, FsStat};
