//! batchprompt - batch submission of tabular data to an LLM
//!
//! `run` sends every row (or the first N) of a dataset to the model framed by
//! a prompt template and exports the merged results. `compose` assembles a
//! template, `fields` shows which output fields a template declares.

use batchprompt::{
    export_table, from_config, load_table, Backend, BatchConfig, BatchController, BatchReport,
    PromptBuilder, PromptTemplate, UndeclaredKeys,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Rows sent by `--sample`
const SAMPLE_ROWS: usize = 10;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliBackend {
    Azure,
    #[value(name = "openai")]
    OpenAI,
}

#[derive(Parser, Debug)]
#[command(name = "batchprompt")]
#[command(about = "Batch submission of tabular data to an LLM, one row at a time")]
struct Cli {
    /// Verbose logging (raw requests and responses)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send dataset rows to the model and merge the JSON results
    Run(RunArgs),
    /// Assemble a prompt template
    Compose(ComposeArgs),
    /// Show the output fields a prompt template declares
    Fields {
        /// Prompt template file
        #[arg(short, long)]
        prompt: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Tab-delimited text or spreadsheet with a header row
    #[arg(short, long)]
    data: PathBuf,

    /// Prompt template file
    #[arg(short, long)]
    prompt: PathBuf,

    /// Export results here (.txt/.tsv or .xlsx)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Write the run report (counts and error log) as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    /// Process at most this many rows
    #[arg(short, long, conflicts_with = "sample")]
    limit: Option<usize>,

    /// Test the first 10 rows only
    #[arg(long)]
    sample: bool,

    /// Comma-separated input columns in the order the template describes
    /// them (default: all columns in file order)
    #[arg(long, value_delimiter = ',')]
    input_fields: Option<Vec<String>>,

    /// Drop response keys the template did not declare
    #[arg(long)]
    ignore_undeclared: bool,

    /// Model name (Azure: deployment name)
    #[arg(short, long, env = "AZURE_OPENAI_MODEL", default_value = "gpt-4o-mini")]
    model: String,

    /// Backend: azure or openai
    #[arg(short, long, value_enum, default_value = "azure")]
    backend: CliBackend,

    /// Endpoint URL
    #[arg(short = 'u', long, env = "AZURE_OPENAI_ENDPOINT")]
    endpoint: Option<String>,

    /// API key (falls back to OPENAI_API_KEY)
    #[arg(short = 'k', long, env = "AZURE_OPENAI_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Azure API version
    #[arg(long, default_value = "2024-05-01-preview")]
    api_version: String,

    /// Sampling temperature
    #[arg(short, long)]
    temperature: Option<f32>,

    /// Maximum tokens per response
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "120")]
    timeout: u64,
}

#[derive(clap::Args, Debug)]
struct ComposeArgs {
    /// Role the model should act as
    #[arg(long)]
    role: String,

    /// Problem statement
    #[arg(long)]
    problem: String,

    /// Dataset whose header gives the input field order
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Input field description, COLUMN=description (repeatable)
    #[arg(long = "describe", value_parser = parse_key_value)]
    describe: Vec<(String, String)>,

    /// Requested output field, NAME=description (repeatable)
    #[arg(long = "output", value_parser = parse_key_value, required = true)]
    outputs: Vec<(String, String)>,

    /// Write the template here instead of stdout
    #[arg(short, long)]
    out: Option<PathBuf>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=description, got '{}'", s))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match cli.command {
        Command::Run(args) => run(args),
        Command::Compose(args) => compose(args),
        Command::Fields { prompt } => show_fields(&prompt),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: RunArgs) -> batchprompt::Result<()> {
    let mut table = load_table(&args.data)?;
    println!(
        "Loaded {} rows, columns: {}",
        table.len(),
        table.columns().join(", ")
    );

    let template = PromptTemplate::from_file(&args.prompt)?;
    report_output_fields(&template);

    let input_fields = args.input_fields.clone().unwrap_or_else(|| table.input_fields());
    tracing::debug!(?input_fields, "row serialization order");

    let backend = match args.backend {
        CliBackend::Azure => Backend::Azure,
        CliBackend::OpenAI => Backend::OpenAI,
    };
    let api_key = args
        .api_key
        .clone()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());
    let endpoint = args
        .endpoint
        .clone()
        .or_else(|| std::env::var("OPENAI_BASE_URL").ok());

    let mut config = BatchConfig::new(&args.model)
        .with_backend(backend)
        .with_api_version(&args.api_version)
        .with_request_timeout(Duration::from_secs(args.timeout));
    if let Some(url) = endpoint {
        config = config.with_base_url(url);
    }
    if let Some(key) = api_key {
        config = config.with_api_key(key);
    }
    if let Some(t) = args.temperature {
        config = config.with_temperature(t);
    }
    if let Some(n) = args.max_tokens {
        config = config.with_max_tokens(n);
    }
    if args.ignore_undeclared {
        config = config.with_undeclared_keys(UndeclaredKeys::Ignore);
    }

    let policy = config.undeclared_keys;
    let client = from_config(config)?;
    let controller =
        BatchController::new(client, template, input_fields).with_undeclared_keys(policy);
    controller.prepare(&mut table)?;

    let row_limit = if args.sample { Some(SAMPLE_ROWS) } else { args.limit };
    let report = controller.run_with_progress(&mut table, row_limit, |p| {
        println!("Processed Records: {}", p.processed_count);
    });

    print_summary(&report);

    if let Some(path) = &args.out {
        export_table(&table, path)?;
        println!("Data exported to {}", path.display());
    }
    if let Some(path) = &args.report {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        println!("Report written to {}", path.display());
    }
    Ok(())
}

fn report_output_fields(template: &PromptTemplate) {
    match template.require_output_fields() {
        Ok(fields) => println!(
            "The AI will attempt to output the following items:\n{}",
            fields.join(", ")
        ),
        Err(e) => eprintln!("Warning: {}", e),
    }
}

fn print_summary(report: &BatchReport) {
    println!();
    println!("─────────────────────────────────────────────────────────────");
    println!(
        "Processed: {}  Succeeded: {}  Failed: {}{}",
        report.processed_count,
        report.succeeded,
        report.failed,
        if report.cancelled { "  (cancelled)" } else { "" }
    );
    println!(
        "Tokens: {}  Time: {:?}",
        report.usage.total_tokens, report.execution_time
    );
    if !report.error_log.is_empty() {
        println!("Rows that triggered errors:");
        for entry in &report.error_log {
            println!("  [row {}] {:?}: {}", entry.row_index + 1, entry.kind, entry.cause);
            println!("    {}", entry.serialized_row);
        }
    }
    println!("─────────────────────────────────────────────────────────────");
}

fn compose(args: ComposeArgs) -> batchprompt::Result<()> {
    let mut builder = PromptBuilder::new().role(&args.role).problem(&args.problem);

    match &args.data {
        Some(path) => {
            let table = load_table(path)?;
            for column in table.columns() {
                let description = args
                    .describe
                    .iter()
                    .find(|(name, _)| name == column)
                    .map(|(_, d)| d.as_str())
                    .unwrap_or_default();
                builder = builder.input_field(column, description);
            }
        }
        None => {
            for (name, description) in &args.describe {
                builder = builder.input_field(name, description);
            }
        }
    }
    for (name, description) in &args.outputs {
        builder = builder.output_field(name, description);
    }

    let prompt = builder.build();
    match &args.out {
        Some(path) => {
            std::fs::write(path, &prompt)?;
            println!("Prompt saved as {}", path.display());
        }
        None => print!("{}", prompt),
    }
    Ok(())
}

fn show_fields(path: &Path) -> batchprompt::Result<()> {
    let template = PromptTemplate::from_file(path)?;
    let fields = template.require_output_fields()?;
    println!(
        "The AI will attempt to output the following items:\n{}",
        fields.join(", ")
    );
    Ok(())
}
