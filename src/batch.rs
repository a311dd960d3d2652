//! Row-by-row batch submission and reconciliation.
//!
//! Each row is serialized, sent, extracted and applied before the next one
//! starts. Per-row failures become error-log entries and never stop the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::client::InferenceClient;
use crate::error::{BatchError, InferenceError, Result};
use crate::parsing::{extract_record, Extraction};
use crate::prompts::build_user_message;
use crate::table::DatasetTable;
use crate::template::PromptTemplate;
use crate::types::{
    BatchReport, ErrorLogEntry, FailureKind, Progress, RowOutcome, UndeclaredKeys, Usage,
};

/// State owned by a single run. Created fresh per invocation.
#[derive(Debug)]
pub struct BatchRunContext {
    pub processed_count: usize,
    pub succeeded: usize,
    pub row_limit: Option<usize>,
    pub stopping_point: usize,
    pub error_log: Vec<ErrorLogEntry>,
    pub usage: Usage,
    pub cancelled: bool,
    started: Instant,
}

impl BatchRunContext {
    pub fn new(row_limit: Option<usize>, table_len: usize) -> Self {
        let stopping_point = row_limit.map_or(table_len, |limit| limit.min(table_len));
        Self {
            processed_count: 0,
            succeeded: 0,
            row_limit,
            stopping_point,
            error_log: Vec::new(),
            usage: Usage::default(),
            cancelled: false,
            started: Instant::now(),
        }
    }

    fn is_done(&self) -> bool {
        self.processed_count >= self.stopping_point
    }

    fn log_failure(&mut self, row_index: usize, kind: FailureKind, cause: String, serialized_row: String) {
        tracing::warn!(row = row_index, ?kind, "row failed: {}", cause);
        self.error_log.push(ErrorLogEntry {
            row_index,
            kind,
            cause,
            serialized_row,
        });
    }

    pub fn into_report(self) -> BatchReport {
        BatchReport {
            processed_count: self.processed_count,
            succeeded: self.succeeded,
            failed: self.error_log.len(),
            row_limit: self.row_limit,
            cancelled: self.cancelled,
            error_log: self.error_log,
            usage: self.usage,
            execution_time: self.started.elapsed(),
        }
    }
}

/// Drives a batch run over a dataset table
pub struct BatchController<C: InferenceClient> {
    client: C,
    template: PromptTemplate,
    input_fields: Vec<String>,
    undeclared_keys: UndeclaredKeys,
    cancel: Option<Arc<AtomicBool>>,
}

impl<C: InferenceClient> BatchController<C> {
    /// `input_fields` fixes the serialization order for the whole run.
    /// Nothing checks it against the field descriptions inside the template.
    pub fn new(client: C, template: PromptTemplate, input_fields: Vec<String>) -> Self {
        Self {
            client,
            template,
            input_fields,
            undeclared_keys: UndeclaredKeys::default(),
            cancel: None,
        }
    }

    pub fn with_undeclared_keys(mut self, policy: UndeclaredKeys) -> Self {
        self.undeclared_keys = policy;
        self
    }

    /// Flag checked between rows; setting it stops the run before the next row
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    pub fn input_fields(&self) -> &[String] {
        &self.input_fields
    }

    /// Check the input fields exist and add the declared output columns
    pub fn prepare(&self, table: &mut DatasetTable) -> Result<()> {
        table.validate_fields(&self.input_fields)?;
        table.init_output_columns(self.template.output_fields());
        Ok(())
    }

    pub fn run(&self, table: &mut DatasetTable, row_limit: Option<usize>) -> BatchReport {
        self.run_with_progress(table, row_limit, |_| {})
    }

    /// Process rows in table order until the limit, the end of the table or
    /// cancellation. The table is updated in place, one row at a time.
    ///
    /// Declared output columns are added first if `prepare` has not already
    /// done so.
    pub fn run_with_progress<F>(
        &self,
        table: &mut DatasetTable,
        row_limit: Option<usize>,
        mut on_progress: F,
    ) -> BatchReport
    where
        F: FnMut(&Progress),
    {
        table.init_output_columns(self.template.output_fields());
        let mut ctx = BatchRunContext::new(row_limit, table.len());
        tracing::info!(
            rows = table.len(),
            stopping_point = ctx.stopping_point,
            "starting batch run"
        );

        for index in 0..table.len() {
            if ctx.is_done() {
                break;
            }
            if self.is_cancelled() {
                tracing::warn!(processed = ctx.processed_count, "batch run cancelled");
                ctx.cancelled = true;
                break;
            }
            let Some(serialized) = table.serialize_row(index, &self.input_fields) else {
                break;
            };

            ctx.processed_count += 1;
            let (outcome, usage) = self.submit(&serialized);
            ctx.usage.add(&usage);

            let succeeded = match outcome {
                RowOutcome::Success(fields) => match self.apply(table, index, fields) {
                    Ok(()) => {
                        ctx.succeeded += 1;
                        true
                    }
                    Err(e) => {
                        ctx.log_failure(index, FailureKind::StoreFailure, e.to_string(), serialized);
                        false
                    }
                },
                RowOutcome::MalformedResponse { kind, raw, cause } => {
                    tracing::debug!(row = index, "unusable response: {}", raw);
                    ctx.log_failure(index, kind, cause, serialized);
                    false
                }
                RowOutcome::RequestRejected(err) => {
                    let kind = match err {
                        InferenceError::Rejected(_) => FailureKind::RequestRejected,
                        InferenceError::Transport(_) => FailureKind::TransportFailure,
                    };
                    ctx.log_failure(index, kind, err.to_string(), serialized);
                    false
                }
            };

            tracing::info!("Processed records: {}", ctx.processed_count);
            on_progress(&Progress {
                row_index: index,
                processed_count: ctx.processed_count,
                stopping_point: ctx.stopping_point,
                succeeded,
            });
        }

        let report = ctx.into_report();
        tracing::info!(
            processed = report.processed_count,
            succeeded = report.succeeded,
            failed = report.failed,
            "batch run finished in {:?}",
            report.execution_time
        );
        report
    }

    /// One request/response exchange for an already serialized row
    pub fn submit(&self, serialized_row: &str) -> (RowOutcome, Usage) {
        let user = build_user_message(serialized_row);
        let completion = match self.client.complete(self.template.text(), &user) {
            Ok(completion) => completion,
            Err(err) => return (RowOutcome::RequestRejected(err), Usage::default()),
        };
        tracing::debug!("response: {}", completion.content);

        let outcome = match extract_record(&completion.content) {
            Extraction::Record(_) if !self.template.has_output_fields() => RowOutcome::MalformedResponse {
                kind: FailureKind::NoOutputFields,
                raw: completion.content,
                cause: BatchError::NoOutputFieldsDeclared.to_string(),
            },
            Extraction::Record(fields) => RowOutcome::Success(fields),
            Extraction::Malformed { kind, cause } => RowOutcome::MalformedResponse {
                kind,
                raw: completion.content,
                cause,
            },
        };
        (outcome, completion.usage)
    }

    fn apply(&self, table: &mut DatasetTable, index: usize, fields: Vec<(String, String)>) -> Result<()> {
        for (key, value) in fields {
            let declared = self.template.output_fields().contains(&key);
            if !declared && self.undeclared_keys == UndeclaredKeys::Ignore {
                tracing::debug!(row = index, "ignoring undeclared key '{}'", key);
                continue;
            }
            if !table.has_column(&key) {
                if !declared {
                    tracing::warn!(row = index, "response key '{}' was not declared, adding column", key);
                }
                table.add_column(&key);
            }
            table.set(index, &key, value)?;
        }
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}
