use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::InferenceError;

/// LLM backend provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backend {
    /// OpenAI or any OpenAI-compatible endpoint
    OpenAI,
    /// Azure OpenAI deployment
    #[default]
    Azure,
}

/// What to do with response keys the template never declared
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UndeclaredKeys {
    /// Write them anyway, adding the column to the table on first sight
    #[default]
    Append,
    /// Drop them silently
    Ignore,
}

/// Token usage statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input_tokens: input,
            output_tokens: output,
            total_tokens: input + output,
        }
    }

    /// Accumulate usage from another instance
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Raw result of one inference exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub usage: Usage,
}

impl Completion {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: Usage::default(),
        }
    }
}

/// Why a row produced no structured data
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RequestRejected,
    TransportFailure,
    ParseFailure,
    UnexpectedShape,
    NoOutputFields,
    /// A parsed value could not be written back into the table
    StoreFailure,
}

/// Classification of a single row attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    /// Parsed record, values already coerced to text, in response order
    Success(Vec<(String, String)>),
    MalformedResponse {
        kind: FailureKind,
        raw: String,
        cause: String,
    },
    RequestRejected(InferenceError),
}

impl RowOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RowOutcome::Success(_))
    }
}

/// One entry of a run's error log: enough to re-submit the row by hand
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorLogEntry {
    pub row_index: usize,
    pub kind: FailureKind,
    pub cause: String,
    pub serialized_row: String,
}

/// Final report of a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub processed_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub row_limit: Option<usize>,
    pub cancelled: bool,
    pub error_log: Vec<ErrorLogEntry>,
    pub usage: Usage,
    #[serde(with = "humantime_serde")]
    pub execution_time: Duration,
}

/// Progress snapshot handed to the operator after every row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub row_index: usize,
    pub processed_count: usize,
    pub stopping_point: usize,
    pub succeeded: bool,
}

/// Configuration for a batch run
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub model: String,
    pub backend: Backend,
    /// Endpoint URL. For Azure this is the resource endpoint.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Azure API version
    pub api_version: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub request_timeout: Duration,
    pub undeclared_keys: UndeclaredKeys,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            backend: Backend::default(),
            base_url: None,
            api_key: None,
            api_version: "2024-05-01-preview".to_string(),
            temperature: None,
            max_tokens: None,
            request_timeout: Duration::from_secs(120),
            undeclared_keys: UndeclaredKeys::default(),
        }
    }
}

impl BatchConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn with_max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_undeclared_keys(mut self, policy: UndeclaredKeys) -> Self {
        self.undeclared_keys = policy;
        self
    }
}

/// Duration serialization as "1.234s"
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:.3}s", duration.as_secs_f64()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim_end_matches('s');
        let secs: f64 = s.parse().map_err(serde::de::Error::custom)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
