use std::path::PathBuf;
use thiserror::Error;

/// Fatal batchprompt errors, surfaced to the operator before or after a run
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Failed to load file '{path}': {reason}")]
    FileLoad { path: PathBuf, reason: String },

    #[error("Unsupported file type: '{0}'")]
    UnsupportedFormat(String),

    #[error("No output fields declared. The prompt needs a line like 'Output_Fields will be [Field1, Field2]'")]
    NoOutputFieldsDeclared,

    #[error("No data to export")]
    EmptyTable,

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Row {0} out of range")]
    RowOutOfRange(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tab-delimited parse error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet read error: {0}")]
    SpreadsheetRead(#[from] calamine::Error),

    #[error("Spreadsheet write error: {0}")]
    SpreadsheetWrite(#[from] rust_xlsxwriter::XlsxError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Tokio runtime error: {0}")]
    Runtime(String),

    #[error("No API key found. Set AZURE_OPENAI_KEY or OPENAI_API_KEY, or pass --api-key.")]
    MissingApiKey,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl BatchError {
    pub(crate) fn file_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        BatchError::FileLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failure of a single inference exchange. Never fatal to a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    /// The service answered with an error object and declined the request
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Result type alias for batchprompt operations
pub type Result<T> = std::result::Result<T, BatchError>;
