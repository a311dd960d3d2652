//! Prompt templates and the output-field marker line they carry.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use crate::error::{BatchError, Result};
use crate::io::read_text_with_fallback;

/// Literal marker that introduces the declared output fields
pub const OUTPUT_FIELDS_MARKER: &str = "Output_Fields will be";

static OUTPUT_FIELDS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Output_Fields will be \[(.*?)\]").expect("invalid regex")
});

/// Extract the declared output fields from the first marker line.
///
/// Names are trimmed and empty segments dropped. A template without the
/// marker, or with an empty list, yields `NoOutputFieldsDeclared`.
pub fn parse_output_fields(text: &str) -> Result<Vec<String>> {
    let list = OUTPUT_FIELDS_RE
        .captures(text)
        .and_then(|cap| cap.get(1))
        .ok_or(BatchError::NoOutputFieldsDeclared)?;

    let fields: Vec<String> = list
        .as_str()
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();

    if fields.is_empty() {
        return Err(BatchError::NoOutputFieldsDeclared);
    }
    Ok(fields)
}

/// An immutable prompt template plus the output fields parsed out of it
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    text: String,
    output_fields: Vec<String>,
}

impl PromptTemplate {
    /// Wrap template text. A missing marker line is not an error here:
    /// the template simply declares no output fields.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let output_fields = match parse_output_fields(&text) {
            Ok(fields) => fields,
            Err(_) => {
                tracing::warn!("prompt template declares no output fields");
                Vec::new()
            }
        };
        Self {
            text,
            output_fields,
        }
    }

    /// Load a template file, trying UTF-8 then Windows-1252
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = read_text_with_fallback(path.as_ref())?;
        Ok(Self::new(text))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn output_fields(&self) -> &[String] {
        &self.output_fields
    }

    pub fn has_output_fields(&self) -> bool {
        !self.output_fields.is_empty()
    }

    /// Declared output fields, or `NoOutputFieldsDeclared` for the operator
    pub fn require_output_fields(&self) -> Result<&[String]> {
        if self.output_fields.is_empty() {
            Err(BatchError::NoOutputFieldsDeclared)
        } else {
            Ok(&self.output_fields)
        }
    }
}
