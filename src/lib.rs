//! # batchprompt
//!
//! Sends one chat request per row of a tabular dataset, framed by a fixed
//! prompt template, and merges the JSON fields each response returns back
//! into the table.

pub mod batch;
pub mod client;
pub mod error;
pub mod io;
pub mod parsing;
pub mod table;
pub mod template;
pub mod types;

mod prompts;

// Re-exports
pub use batch::{BatchController, BatchRunContext};
pub use client::{from_config, InferenceClient, OpenAiClient};
pub use error::{BatchError, InferenceError, Result};
pub use io::{export_table, load_table};
pub use prompts::{build_user_message, PromptBuilder};
pub use table::DatasetTable;
pub use template::{parse_output_fields, PromptTemplate};
pub use types::{
    Backend, BatchConfig, BatchReport, Completion, ErrorLogEntry, FailureKind, Progress,
    RowOutcome, UndeclaredKeys, Usage,
};
