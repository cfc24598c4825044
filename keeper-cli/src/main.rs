// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Keeper CLI
//!
//! Entry points invoked by agent hooks and cron jobs. Results go to stdout,
//! diagnostics to stderr, and the exit status tells the caller what happened:
//!
//! | status | meaning |
//! |---|---|
//! | 0 | success, or no duplicate found |
//! | 1 | duplicate action found |
//! | 2 | usage error |
//! | 3 | lock timeout |
//! | 4 | corrupt record (for `action check`: treat as duplicate) |
//! | 5 | watermark regression |
//! | 6 | action record not found |
//! | 7 | invalid status transition |
//! | 8 | invalid snapshot or configuration |
//! | 9 | other I/O failure |

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use keeper_core::{
    default_workspace, ActionRecord, ActionStatus, ActionType, KeeperConfig, KeeperError,
    KeeperResult,
};
use keeper_memory::{Aggregator, IngestMode, Ingestor, NotesIndexer, RecoveryAssembler};
use keeper_storage::ActionLedger;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keeper")]
#[command(about = "Keeper - compaction-safe agent memory", long_about = None)]
struct Cli {
    /// Agent workspace root
    #[arg(short, long, env = "KEEPER_WORKSPACE", global = true)]
    workspace: Option<PathBuf>,

    /// Verbose mode
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy new conversation turns into the event log
    Ingest {
        /// Session the snapshot belongs to (optional in direct mode)
        #[arg(long)]
        session_key: Option<String>,

        /// Snapshot file (reads stdin when omitted)
        #[arg(long)]
        input: Option<PathBuf>,

        /// normal, backfill or direct
        #[arg(long, default_value = "normal")]
        mode: IngestMode,
    },

    /// Record and query external actions
    Action {
        #[command(subcommand)]
        command: ActionCommands,
    },

    /// Fold the event log into hourly summaries
    Aggregate {
        /// Day to aggregate (defaults to today, UTC)
        #[arg(long, conflicts_with = "all")]
        date: Option<NaiveDate>,

        /// Aggregate every day present in the event log
        #[arg(long)]
        all: bool,
    },

    /// Rebuild the categorized index of the long-term notes
    Index,

    /// Print the post-compaction recovery payload
    Recover {
        /// Token budget for the payload
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Session whose recent turns are included
        #[arg(long)]
        session_key: Option<String>,

        /// Also note the compaction in today's daily note
        #[arg(long)]
        log_event: bool,
    },
}

#[derive(Subcommand)]
enum ActionCommands {
    /// Record an action about to be attempted
    Log {
        /// Action type (discord_post, dm, email, api_call, file_create, webhook, other)
        #[arg(long = "type")]
        action_type: ActionType,

        /// Channel, recipient, URL or path the action goes to
        #[arg(long)]
        target: String,

        /// Short description of the action
        #[arg(long)]
        summary: String,

        /// Session that performed the action
        #[arg(long)]
        session: Option<String>,

        #[arg(long, default_value = "pending")]
        status: ActionStatus,
    },

    /// Exit 1 if a matching action was recorded within the window
    Check {
        #[arg(long = "type")]
        action_type: ActionType,

        #[arg(long)]
        target: String,

        /// Also require a matching summary
        #[arg(long)]
        summary: Option<String>,

        /// Lookback in hours (default from configuration)
        #[arg(long)]
        window: Option<f64>,
    },

    /// Set the final status of a logged action
    Update {
        /// Record key printed by `action log`
        #[arg(long)]
        ts: String,

        #[arg(long)]
        status: ActionStatus,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_status(&err))
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let workspace = cli.workspace.clone().unwrap_or_else(default_workspace);
    let config = KeeperConfig::load(&workspace)
        .with_context(|| format!("loading configuration for {}", workspace.display()))?;
    let layout = config.layout(&workspace);
    debug!("Using workspace {}", workspace.display());

    match cli.command {
        Commands::Ingest {
            session_key,
            input,
            mode,
        } => {
            let ingestor = Ingestor::new(layout, &config);
            let now = Utc::now();
            let report = if mode == IngestMode::Direct {
                ingestor.ingest_direct(session_key.as_deref(), now)?
            } else {
                let Some(session_key) = session_key else {
                    Cli::command()
                        .error(
                            clap::error::ErrorKind::MissingRequiredArgument,
                            "--session-key is required unless --mode direct",
                        )
                        .exit();
                };
                let raw = read_input(input.as_ref())?;
                ingestor.ingest_snapshot(&raw, &session_key, mode, now)?
            };

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for session in &report.sessions {
                    println!(
                        "{}: appended {}, skipped {}, rejected {}, watermark {} -> {}",
                        session.session_key,
                        session.appended.len(),
                        session.skipped.len(),
                        session.rejected.len(),
                        show_seq(session.watermark_before),
                        show_seq(session.watermark_after),
                    );
                }
                if report.sessions.is_empty() {
                    println!("No turns to ingest");
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Action { command } => {
            let ledger = ActionLedger::new(&layout, config.lock.clone(), config.dedup.clone());
            run_action(&ledger, command, config.dedup.window_hours)
        }

        Commands::Aggregate { date, all } => {
            let aggregator = Aggregator::new(layout, &config);
            let reports = if all {
                aggregator.run_all()?
            } else {
                vec![aggregator.run_date(date.unwrap_or_else(|| Utc::now().date_naive()))?]
            };

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for report in &reports {
                    let hours = report
                        .regenerated_hours
                        .iter()
                        .map(|h| format!("{h:02}"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    println!(
                        "{}: {} new lines, {} corrupt, hours [{}]{}",
                        report.date,
                        report.new_lines,
                        report.corrupt_lines,
                        hours,
                        if report.written { ", written" } else { ", unchanged" }
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Index => {
            let report = NotesIndexer::default().write(&layout, &config.lock, Utc::now())?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Generated: {}", report.path.display());
                println!(
                    "  Entries: {}, size: {} chars (~{} tokens, notes {} chars)",
                    report.entries, report.chars, report.tokens, report.source_chars
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Recover {
            max_tokens,
            session_key,
            log_event,
        } => {
            let budget = max_tokens.unwrap_or(config.recovery.token_budget);
            if budget == 0 {
                Cli::command()
                    .error(clap::error::ErrorKind::ValueValidation, "--max-tokens must be positive")
                    .exit();
            }
            let assembler = RecoveryAssembler::new(layout, &config);
            let payload = assembler.assemble(budget, session_key.as_deref(), Utc::now())?;
            if log_event {
                assembler.log_event(&payload)?;
            }

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                print!("{}", payload.render());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_action(ledger: &ActionLedger, command: ActionCommands, default_window: f64) -> Result<ExitCode> {
    match command {
        ActionCommands::Log {
            action_type,
            target,
            summary,
            session,
            status,
        } => {
            let record = ledger.log(action_type, &target, &summary, session, status)?;
            println!("{}", serde_json::to_string(&record)?);
            Ok(ExitCode::SUCCESS)
        }

        ActionCommands::Check {
            action_type,
            target,
            summary,
            window,
        } => {
            let window = window.unwrap_or(default_window);
            let result = ledger.check(action_type, &target, summary.as_deref(), window);
            let status = report_check(result, &mut std::io::stdout().lock())?;
            Ok(ExitCode::from(status))
        }

        ActionCommands::Update { ts, status } => {
            let outcome = ledger.update(&ts, status)?;
            if !outcome.changed {
                info!("Action {} was already {}", ts, status);
            }
            println!("{}", serde_json::to_string(&outcome.record)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Print the outcome of a duplicate check and return its exit status.
///
/// An unreadable ledger is reported as status 4 so callers treat the action
/// as already attempted.
fn report_check(
    result: KeeperResult<Option<ActionRecord>>,
    out: &mut impl Write,
) -> Result<u8> {
    match result {
        Ok(Some(record)) => {
            writeln!(out, "{}", serde_json::to_string(&record)?)?;
            Ok(1)
        }
        Ok(None) => {
            writeln!(out, "No duplicate found")?;
            Ok(0)
        }
        Err(err @ KeeperError::CorruptRecord { .. }) => {
            writeln!(out, "Ledger unreadable ({err}); treat this action as a duplicate")?;
            Ok(4)
        }
        Err(err) => Err(err.into()),
    }
}

fn read_input(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading snapshot {}", path.display())),
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("reading snapshot from stdin")?;
            Ok(raw)
        }
    }
}

fn show_seq(seq: Option<u64>) -> String {
    seq.map_or_else(|| "-".to_string(), |s| s.to_string())
}

/// Exit status for a failed command
fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<KeeperError>() {
        Some(KeeperError::LockTimeout { .. }) => 3,
        Some(KeeperError::CorruptRecord { .. }) => 4,
        Some(KeeperError::Regression { .. }) => 5,
        Some(KeeperError::RecordNotFound(_)) => 6,
        Some(KeeperError::InvalidTransition { .. }) => 7,
        Some(KeeperError::InvalidSnapshot(_)) | Some(KeeperError::Config(_)) => 8,
        Some(KeeperError::Serialization(_)) | Some(KeeperError::Io(_)) | None => 9,
    }
}
