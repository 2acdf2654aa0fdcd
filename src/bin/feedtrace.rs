//! feedtrace CLI - Command-line interface for feedtrace
//!
//! Commands:
//! - row: Build the analytics row of one session
//! - dwell: Per-post dwell table of an event log
//! - summarize: Roster summary over stored rows
//! - validate: Report events the aggregators would skip
//! - doctor: Diagnose configuration and stored rows

use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use feedtrace::dwell::{DwellAggregator, PostDwell};
use feedtrace::event_log::EventLog;
use feedtrace::pipeline::{parse_rows, parse_rows_ndjson, parse_session};
use feedtrace::roster::RosterSummarizer;
use feedtrace::row::{RowBuilder, GLOBAL_FIELDS, POST_FIELDS};
use feedtrace::tracker::TrackerOptions;
use feedtrace::{FEEDTRACE_VERSION, PRODUCER_NAME};

/// feedtrace - Engagement analytics for replayed social feeds
#[derive(Parser)]
#[command(name = "feedtrace")]
#[command(version = FEEDTRACE_VERSION)]
#[command(about = "Turn feed session logs into analytics rows and roster summaries", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the analytics row of one session
    Row {
        /// Session JSON file (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "json")]
        output_format: OutputFormat,
    },

    /// Per-post dwell table of an event log
    Dwell {
        /// Event log file (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Roster summary over stored rows
    Summarize {
        /// Stored rows file (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "json")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Report events the aggregators would skip
    Validate {
        /// Event log file (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and stored rows
    Doctor {
        /// Check a stored rows file
        #[arg(long)]
        rows: Option<PathBuf>,

        /// Check a tracker options file
        #[arg(long)]
        options: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), FeedtraceCliError> {
    match cli.command {
        Commands::Row {
            input,
            output,
            output_format,
        } => cmd_row(&input, &output, &output_format),
        Commands::Dwell {
            input,
            input_format,
            output_format,
        } => cmd_dwell(&input, input_format, &output_format),
        Commands::Summarize {
            input,
            input_format,
            output_format,
        } => cmd_summarize(&input, input_format, &output_format),
        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),
        Commands::Doctor {
            rows,
            options,
            json,
        } => cmd_doctor(rows.as_deref(), options.as_deref(), json),
    }
}

fn read_input(input: &Path) -> Result<String, FeedtraceCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn read_events(input: &Path, input_format: InputFormat) -> Result<EventLog, FeedtraceCliError> {
    let input_data = read_input(input)?;
    let log = match input_format {
        InputFormat::Ndjson => EventLog::parse_ndjson(&input_data)?,
        InputFormat::Json => EventLog::parse_array(&input_data)?,
    };
    Ok(log)
}

fn format_output<T: serde::Serialize>(
    value: &T,
    output_format: &OutputFormat,
) -> Result<String, FeedtraceCliError> {
    let mut out = match output_format {
        OutputFormat::Json => serde_json::to_string(value)?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(value)?,
    };
    out.push('\n');
    Ok(out)
}

fn cmd_row(
    input: &Path,
    output: &Path,
    output_format: &OutputFormat,
) -> Result<(), FeedtraceCliError> {
    let session = parse_session(&read_input(input)?)?;
    if session.events.is_empty() {
        log::warn!("session {} has no events", session.session_id);
    }

    let row = RowBuilder::build(&session);
    let output_data = format_output(&row, output_format)?;

    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

fn cmd_dwell(
    input: &Path,
    input_format: InputFormat,
    output_format: &OutputFormat,
) -> Result<(), FeedtraceCliError> {
    let log = read_events(input, input_format)?;
    if log.is_empty() {
        return Err(FeedtraceCliError::NoEvents);
    }

    let dwell: BTreeMap<String, PostDwell> = DwellAggregator::aggregate(log.events());
    print!("{}", format_output(&dwell, output_format)?);
    Ok(())
}

fn cmd_summarize(
    input: &Path,
    input_format: InputFormat,
    output_format: &OutputFormat,
) -> Result<(), FeedtraceCliError> {
    let input_data = read_input(input)?;
    let rows = match input_format {
        InputFormat::Ndjson => parse_rows_ndjson(&input_data)?,
        InputFormat::Json => parse_rows(&input_data)?,
    };

    let summary = RosterSummarizer::summarize(&rows);
    print!("{}", format_output(&summary, output_format)?);
    Ok(())
}

fn cmd_validate(
    input: &Path,
    input_format: InputFormat,
    json: bool,
) -> Result<(), FeedtraceCliError> {
    let log = read_events(input, input_format)?;
    let issues = log.validate();

    let invalid_events = issues
        .iter()
        .filter(|i| !matches!(i.error, feedtrace::EventValidationError::OutOfOrder { .. }))
        .count();

    let report = ValidationReport {
        total_events: log.len(),
        valid_events: log.len() - invalid_events,
        invalid_events,
        out_of_order: issues.len() - invalid_events,
        errors: issues
            .iter()
            .map(|issue| ValidationErrorDetail {
                index: issue.index,
                action: log.events()[issue.index].action.as_str().to_string(),
                error: issue.error.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total events:   {}", report.total_events);
        println!("Valid events:   {}", report.valid_events);
        println!("Invalid events: {}", report.invalid_events);
        println!("Out of order:   {}", report.out_of_order);

        if !report.errors.is_empty() {
            println!("\nIssues:");
            for err in &report.errors {
                println!("  - {} (index {}): {}", err.action, err.index, err.error);
            }
        }
    }

    if report.invalid_events > 0 {
        Err(FeedtraceCliError::ValidationFailed(report.invalid_events))
    } else {
        Ok(())
    }
}

fn cmd_doctor(
    rows: Option<&Path>,
    options: Option<&Path>,
    json: bool,
) -> Result<(), FeedtraceCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("feedtrace version {}", FEEDTRACE_VERSION),
    });

    checks.push(DoctorCheck {
        name: "row_schema".to_string(),
        status: CheckStatus::Ok,
        message: format!(
            "{} global fields, per-post fields <post_id>_{{{}}}",
            GLOBAL_FIELDS.len(),
            POST_FIELDS.join(",")
        ),
    });

    if let Some(path) = options {
        checks.push(check_file(path, "tracker_options", |content| {
            TrackerOptions::from_json(content)
                .map(|o| {
                    format!(
                        "threshold {} (images {})",
                        o.threshold, o.image_threshold
                    )
                })
                .map_err(|e| e.to_string())
        }));
    } else {
        let defaults = TrackerOptions::default();
        checks.push(DoctorCheck {
            name: "tracker_options".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "defaults: threshold {} (images {})",
                defaults.threshold, defaults.image_threshold
            ),
        });
    }

    if let Some(path) = rows {
        checks.push(check_file(path, "rows", |content| {
            let rows = parse_rows(content).map_err(|e| e.to_string())?;
            let unrecognized: usize = rows.iter().map(|r| r.unrecognized.len()).sum();
            Ok(format!(
                "{} rows, {} unrecognized fields",
                rows.len(),
                unrecognized
            ))
        }));
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (use --input -)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: FEEDTRACE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("feedtrace Doctor Report");
        println!("=======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");
        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(FeedtraceCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

/// Read a file and describe it, or report why it is unusable
fn check_file<F>(path: &Path, name: &str, describe: F) -> DoctorCheck
where
    F: FnOnce(&str) -> Result<String, String>,
{
    let (status, message) = if !path.exists() {
        (CheckStatus::Warning, format!("{} does not exist", path.display()))
    } else {
        match fs::read_to_string(path) {
            Ok(content) => match describe(&content) {
                Ok(message) => (CheckStatus::Ok, message),
                Err(e) => (CheckStatus::Error, format!("Invalid {}: {}", name, e)),
            },
            Err(e) => (CheckStatus::Error, format!("Cannot read {}: {}", path.display(), e)),
        }
    };

    DoctorCheck {
        name: name.to_string(),
        status,
        message,
    }
}

// Error types

#[derive(Debug)]
enum FeedtraceCliError {
    Io(io::Error),
    Compute(feedtrace::ComputeError),
    Json(serde_json::Error),
    NoEvents,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for FeedtraceCliError {
    fn from(e: io::Error) -> Self {
        FeedtraceCliError::Io(e)
    }
}

impl From<feedtrace::ComputeError> for FeedtraceCliError {
    fn from(e: feedtrace::ComputeError) -> Self {
        FeedtraceCliError::Compute(e)
    }
}

impl From<serde_json::Error> for FeedtraceCliError {
    fn from(e: serde_json::Error) -> Self {
        FeedtraceCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<FeedtraceCliError> for CliError {
    fn from(e: FeedtraceCliError) -> Self {
        match e {
            FeedtraceCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            FeedtraceCliError::Compute(e) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Ensure input is a session, event log or row export".to_string()),
            },
            FeedtraceCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            FeedtraceCliError::NoEvents => CliError {
                code: "NO_EVENTS".to_string(),
                message: "No events found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            FeedtraceCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} events failed validation", count),
                hint: Some("Malformed events are skipped by dwell and row building".to_string()),
            },
            FeedtraceCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_events: usize,
    valid_events: usize,
    invalid_events: usize,
    out_of_order: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    action: String,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
