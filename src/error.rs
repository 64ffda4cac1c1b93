use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Unknown file: {0}")]
    UnknownFile(String),

    #[error("No compile command covers file: {0}")]
    NoCompileCommand(String),

    #[error("No stored value for option: {0}")]
    MissingOption(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed stored value for {name}: {source}")]
    Deserialization {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;
