//! Evidence Ledger CLI
//!
//! Operator surface over the ledger: append and inspect entries, build
//! evidence chains, check sessions and replay them.

#![warn(clippy::all)]

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use commands::{Outcome, QueryArgs, ReplayArgs};
use evidence_chain::PropagationRule;
use evidence_core::{EntryKind, ProvenanceSource, Timestamp};
use evidence_policy::ViolationMode;
use evidence_storage::{EvidenceStore, StoreConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_DB: &str = "evidence.db";

#[derive(Parser)]
#[command(name = "evidence")]
#[command(about = "Append-only evidence ledger with provenance, chains and replay", long_about = None)]
#[command(version)]
struct Cli {
    /// Database file (overrides the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// JSON store configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Attribution policy (overrides the config file)
    #[arg(long, global = true, value_enum)]
    attribution: Option<AttributionMode>,
    /// Writer lock wait in milliseconds (overrides the config file)
    #[arg(long, global = true)]
    busy_timeout_ms: Option<u64>,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AttributionMode {
    Warn,
    Reject,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum OrderBy {
    #[default]
    Timestamp,
    Confidence,
}

#[derive(Subcommand)]
enum Commands {
    /// Append a draft, or an array of drafts as one batch
    Append {
        /// Draft JSON file, `-` for stdin
        #[arg(short, long)]
        file: PathBuf,
        /// Derive ids from content and skip duplicates
        #[arg(long)]
        content_addressed: bool,
    },
    /// Print one entry
    Get { id: String },
    /// Filter entries
    Query {
        #[arg(long = "kind")]
        kinds: Vec<EntryKind>,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        source: Option<ProvenanceSource>,
        /// Substring of the payload
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        since: Option<Timestamp>,
        #[arg(long)]
        until: Option<Timestamp>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        offset: Option<usize>,
        #[arg(long, value_enum, default_value_t = OrderBy::Timestamp)]
        order_by: OrderBy,
        /// Newest or most confident first
        #[arg(long)]
        desc: bool,
    },
    /// Build the evidence chain rooted at an entry
    Chain {
        id: String,
        /// min, max, product, weighted_average or noisy_or
        #[arg(long, default_value = "min")]
        rule: PropagationRule,
    },
    /// Summarize a session
    Session {
        id: String,
        /// Run the integrity scan
        #[arg(long)]
        verify: bool,
    },
    /// List session ids
    Sessions,
    /// Canonical hash of a JSON file
    Hash {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Replay a session, echoing each payload
    Replay {
        session: String,
        #[arg(long)]
        stop_on_mismatch: bool,
        /// Append the replayed results as a new session
        #[arg(long)]
        record: bool,
        /// Name of the recorded session
        #[arg(long)]
        new_session: Option<String>,
        /// Skip hash comparison
        #[arg(long)]
        no_verify: bool,
        /// Show a progress bar
        #[arg(long)]
        progress: bool,
    },
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("evidence=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Config file first, then command-line overrides
fn store_config(cli: &Cli) -> Result<StoreConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text)
                .wrap_err_with(|| format!("parsing config {}", path.display()))?
        }
        None => StoreConfig::default(),
    };

    if let Some(db) = &cli.db {
        config.path = Some(db.clone());
    } else if config.path.is_none() {
        config.path = Some(PathBuf::from(DEFAULT_DB));
    }
    if let Some(ms) = cli.busy_timeout_ms {
        config.busy_timeout = Duration::from_millis(ms);
    }
    match cli.attribution {
        Some(AttributionMode::Warn) => {
            config.attribution.enforce = true;
            config.attribution.on_violation = ViolationMode::Warn;
        }
        Some(AttributionMode::Reject) => {
            config.attribution.enforce = true;
            config.attribution.on_violation = ViolationMode::Reject;
        }
        Some(AttributionMode::Off) => config.attribution.enforce = false,
        None => {}
    }
    Ok(config)
}

fn run(cli: Cli) -> Result<Outcome> {
    if let Commands::Hash { file } = &cli.command {
        return commands::hash(file);
    }

    let config = store_config(&cli)?;
    tracing::debug!(path = ?config.path, "opening store");
    let store = EvidenceStore::open(config)?;
    match cli.command {
        Commands::Append {
            file,
            content_addressed,
        } => commands::append(&store, &file, content_addressed),
        Commands::Get { id } => commands::get(&store, &id),
        Commands::Query {
            kinds,
            session,
            source,
            text,
            since,
            until,
            limit,
            offset,
            order_by,
            desc,
        } => commands::query(
            &store,
            &QueryArgs {
                kinds,
                session,
                source,
                text,
                since,
                until,
                limit,
                offset,
                by_confidence: order_by == OrderBy::Confidence,
                desc,
            },
        ),
        Commands::Chain { id, rule } => commands::chain(&store, &id, rule),
        Commands::Session { id, verify } => commands::session(&store, &id, verify),
        Commands::Sessions => commands::sessions(&store),
        Commands::Replay {
            session,
            stop_on_mismatch,
            record,
            new_session,
            no_verify,
            progress,
        } => commands::replay(
            &store,
            &session,
            &ReplayArgs {
                stop_on_mismatch,
                record,
                new_session,
                no_verify,
                progress,
            },
        ),
        Commands::Hash { file } => commands::hash(&file),
    }
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let outcome = run(cli)?;
    println!("{}", serde_json::to_string_pretty(&outcome.body)?);
    Ok(if outcome.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
