//! PipeCheck - CSV ingestion with repair, validation and deduplication

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use pipecheck_common::logging::{init_logging, LogConfig, LogLevel};
use pipecheck_ingest::store::{ErrorEntry, RunStats, DEFAULT_RUN_LIST_LIMIT};
use pipecheck_ingest::{
    IngestReport, Ingestor, MemoryStore, PgStore, PipelineConfig, RecordStore, Run, RunStatus,
    ValidationMode,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "pipecheck")]
#[command(author, version, about = "CSV ingestion with repair, validation and deduplication")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Use an in-memory store (nothing is persisted)
    #[arg(long, global = true)]
    memory: bool,

    /// Disable AI repair even when an API key is configured
    #[arg(long, global = true)]
    no_ai: bool,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a CSV file
    Ingest {
        /// File to ingest
        file: PathBuf,

        /// Rows per committed batch
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Require name and a 10-digit phone in addition to email
        #[arg(long)]
        strict: bool,
    },

    /// List recent runs, newest first
    Runs {
        /// Maximum number of runs
        #[arg(short, long, default_value_t = DEFAULT_RUN_LIST_LIMIT)]
        limit: i64,
    },

    /// Show one run
    Run {
        /// Run ID
        id: Uuid,
    },

    /// List the error entries of a run
    Errors {
        /// Run ID
        id: Uuid,
    },

    /// Aggregate statistics over all runs
    Stats,

    /// Apply database migrations
    Migrate,
}

impl Command {
    /// Commands that only read what earlier runs stored
    fn reads_history(&self) -> bool {
        matches!(
            self,
            Command::Runs { .. } | Command::Run { .. } | Command::Errors { .. } | Command::Stats
        )
    }
}

/// Reject option combinations that could only print an empty history
fn check_store_choice(cli: &Cli) -> Result<()> {
    if cli.memory && cli.command.reads_history() {
        anyhow::bail!(
            "--memory starts an empty store, so there is no history to read. Use DATABASE_URL instead"
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    check_store_choice(&cli)?;

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("pipecheck")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let mut config = PipelineConfig::from_env()?;
    if let Some(url) = &cli.database_url {
        config.database.url = url.clone();
    }
    if cli.no_ai {
        config.ai.api_key = None;
    }

    let store = open_store(&cli, &config).await?;

    match cli.command {
        Command::Ingest {
            ref file,
            batch_size,
            strict,
        } => {
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            if strict {
                config.validation_mode = ValidationMode::Strict;
            }
            config.validate()?;

            let ingestor = Ingestor::from_config(store, config)?;
            let report = ingestor
                .ingest_file(file)
                .await
                .with_context(|| format!("Failed to ingest {}", file.display()))?;
            print_report(&report, cli.json)?;
        }
        Command::Runs { limit } => {
            let runs = store.list_runs(limit).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&runs)?);
            } else {
                print_runs(&runs);
            }
        }
        Command::Run { id } => {
            let run = store
                .get_run(id)
                .await?
                .with_context(|| format!("Run '{}' not found", id))?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&run)?);
            } else {
                print_run(&run);
            }
        }
        Command::Errors { id } => {
            let errors = store.list_errors(id).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&errors)?);
            } else {
                print_errors(&errors)?;
            }
        }
        Command::Stats => {
            let stats = store.stats().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
        }
        Command::Migrate => {
            if cli.memory {
                println!("In-memory store needs no migrations");
            } else {
                println!("{}", "Migrations applied".green());
            }
        }
    }

    Ok(())
}

/// Connect to the configured store; Postgres schemas are migrated on connect
async fn open_store(cli: &Cli, config: &PipelineConfig) -> Result<Arc<dyn RecordStore>> {
    if cli.memory {
        info!("Using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = PgStore::connect(&config.database)
        .await
        .context("Failed to connect to database. Check DATABASE_URL or pass --memory")?;
    store.migrate().await?;
    Ok(Arc::new(store))
}

fn status_label(status: RunStatus) -> String {
    match status {
        RunStatus::Completed => status.as_str().green().to_string(),
        RunStatus::PartialSuccess => status.as_str().yellow().to_string(),
        RunStatus::Failed => status.as_str().red().to_string(),
        RunStatus::Pending | RunStatus::Processing => status.as_str().cyan().to_string(),
    }
}

fn timestamp(value: Option<chrono::DateTime<chrono::Utc>>) -> String {
    value
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_report(report: &IngestReport, json: bool) -> Result<()> {
    if json {
        let value = serde_json::json!({
            "duplicate": report.is_duplicate(),
            "run": report.run(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if let IngestReport::DuplicateFile { existing } = report {
        println!(
            "{} {} was already ingested by run {}",
            "Duplicate file:".yellow().bold(),
            existing.filename,
            existing.id
        );
    }
    print_run(report.run());
    Ok(())
}

fn print_run(run: &Run) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS);

    table.add_row(vec!["Run ID".to_string(), run.id.to_string()]);
    table.add_row(vec!["File".to_string(), run.filename.clone()]);
    table.add_row(vec!["SHA-256".to_string(), run.file_hash.clone()]);
    table.add_row(vec!["Status".to_string(), status_label(run.status)]);
    table.add_row(vec!["Total rows".to_string(), run.counters.total.to_string()]);
    table.add_row(vec!["Inserted".to_string(), run.counters.inserted.to_string()]);
    table.add_row(vec!["Updated".to_string(), run.counters.updated.to_string()]);
    table.add_row(vec!["Skipped".to_string(), run.counters.skipped.to_string()]);
    table.add_row(vec!["Rejected".to_string(), run.counters.rejected.to_string()]);
    table.add_row(vec!["Created".to_string(), timestamp(Some(run.created_at))]);
    table.add_row(vec!["Started".to_string(), timestamp(run.started_at)]);
    table.add_row(vec!["Completed".to_string(), timestamp(run.completed_at)]);

    if let Some(ref message) = run.error_message {
        table.add_row(vec!["Error".to_string(), message.red().to_string()]);
    }

    println!("{}", table);
}

fn print_runs(runs: &[Run]) {
    if runs.is_empty() {
        println!("No runs found");
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            "Run ID", "File", "Status", "Total", "Inserted", "Updated", "Skipped", "Rejected",
            "Created",
        ]);

    for run in runs {
        table.add_row(vec![
            run.id.to_string(),
            run.filename.clone(),
            status_label(run.status),
            run.counters.total.to_string(),
            run.counters.inserted.to_string(),
            run.counters.updated.to_string(),
            run.counters.skipped.to_string(),
            run.counters.rejected.to_string(),
            timestamp(Some(run.created_at)),
        ]);
    }

    println!("{}", table);
}

fn print_errors(errors: &[ErrorEntry]) -> Result<()> {
    if errors.is_empty() {
        println!("No error entries");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Row", "Code", "Message", "Raw"]);

    for entry in errors {
        table.add_row(vec![
            entry.row_index.to_string(),
            entry.kind.to_string(),
            entry.message.clone(),
            serde_json::to_string(&entry.raw)?,
        ]);
    }

    println!("{}", table);
    Ok(())
}

fn print_stats(stats: &RunStats) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS);

    table.add_row(vec!["Total runs".to_string(), stats.total_runs.to_string()]);
    table.add_row(vec!["Completed".to_string(), stats.completed_runs.to_string()]);
    table.add_row(vec!["Partial success".to_string(), stats.partial_runs.to_string()]);
    table.add_row(vec!["Failed".to_string(), stats.failed_runs.to_string()]);
    table.add_row(vec![
        "Success rate".to_string(),
        format!("{:.1}%", stats.success_rate),
    ]);
    table.add_row(vec![
        "Rows processed".to_string(),
        stats.total_rows_processed.to_string(),
    ]);
    table.add_row(vec![
        "Last run".to_string(),
        stats
            .last_run
            .as_ref()
            .map(|run| format!("{} ({})", run.id, run.status))
            .unwrap_or_else(|| "-".to_string()),
    ]);

    println!("{}", table);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("pipecheck").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_memory_store_rejected_for_history_commands() {
        for args in [
            vec!["runs", "--memory"],
            vec!["--memory", "stats"],
            vec!["errors", "--memory", "3f2b6d9e-8c1a-4e5f-9b7d-2a6c4e8f1b3d"],
        ] {
            let err = check_store_choice(&parse(&args)).unwrap_err();
            assert!(err.to_string().starts_with("--memory starts an empty store"));
        }
    }

    #[test]
    fn test_memory_store_allowed_for_ingest() {
        assert!(check_store_choice(&parse(&["ingest", "contacts.csv", "--memory"])).is_ok());
        assert!(check_store_choice(&parse(&["migrate", "--memory"])).is_ok());
        assert!(check_store_choice(&parse(&["stats"])).is_ok());
    }
}
