//! # Tutor CLI
//!
//! The `tutor` binary ingests trading-card game data (cards, rules,
//! glossary) into SQLite with vector embeddings and serves semantic search
//! over it.
//!
//! ## Usage
//!
//! ```bash
//! tutor --config ./config/tutor.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tutor init` | Create the SQLite database and run schema migrations |
//! | `tutor ingest all` | Ingest glossary, rules, and cards in sequence |
//! | `tutor ingest <kind>` | Ingest a single kind (cards, rules, glossary) |
//! | `tutor search <kind> "<query>"` | Semantic search over one kind |
//! | `tutor stats` | Document and embedding counts per kind |
//! | `tutor demo` | Run canned example queries |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! tutor init --config ./config/tutor.toml
//!
//! # Full ingestion (requires a running embedding service)
//! tutor ingest all
//!
//! # Re-ingest cards from scratch instead of upserting
//! tutor ingest cards --clear
//!
//! # Search with a custom similarity threshold
//! tutor search rules "how does combat damage work" --threshold 0.6
//! ```

mod config;
mod db;
mod demo;
mod embedding;
mod ingest;
mod kinds;
mod migrate;
mod progress;
mod repo;
mod search;
mod sources;
mod stats;

use anyhow::bail;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::ingest::IngestOptions;
use crate::progress::ProgressMode;

/// Tutor — semantic search over trading-card game data.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/tutor.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "tutor",
    about = "Tutor — semantic search over trading-card game data",
    version,
    long_about = "Tutor ingests cards, comprehensive rules, and glossary entries into SQLite \
    with vector embeddings from an Ollama-compatible embedding service, and answers \
    natural-language queries by cosine similarity."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tutor.toml")]
    config: PathBuf,

    /// Progress reporting on stderr: off, human, or json.
    ///
    /// Defaults to human when stderr is a TTY, otherwise off.
    #[arg(long, global = true)]
    progress: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all six tables (three document
    /// tables plus their paired embedding tables). Idempotent — running it
    /// multiple times is safe.
    Init,

    /// Ingest source data into the database.
    ///
    /// Waits for the embedding service to become ready, then upserts
    /// documents by natural key and generates embeddings in batches.
    /// `all` runs glossary, rules, and cards in sequence. Exits nonzero
    /// when any requested kind fails.
    Ingest {
        /// What to ingest: `all`, `cards`, `rules`, or `glossary`.
        what: String,

        /// Delete the kind's existing rows first instead of upserting.
        /// Destructive.
        #[arg(long)]
        clear: bool,

        /// Parse the source files and report counts without writing
        /// anything.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of records to ingest per kind.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Search one document kind by semantic similarity.
    Search {
        /// Document kind: `cards`, `rules`, or `glossary`.
        kind: String,

        /// The search query text.
        query: String,

        /// Minimum cosine similarity, exclusive (default from config, 0.7).
        #[arg(long)]
        threshold: Option<f32>,

        /// Maximum number of results (default from config, 10).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show document and embedding counts per kind.
    Stats,

    /// Run canned example queries against all three kinds.
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let progress_mode = match cli.progress.as_deref() {
        None => ProgressMode::default_for_tty(),
        Some("off") => ProgressMode::Off,
        Some("human") => ProgressMode::Human,
        Some("json") => ProgressMode::Json,
        Some(other) => bail!("Unknown progress mode: '{}'. Use off, human, or json.", other),
    };

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            what,
            clear,
            dry_run,
            limit,
            batch_size,
        } => {
            let stop = Arc::new(AtomicBool::new(false));
            let stop_signal = stop.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("stop requested — finishing the current batch");
                    stop_signal.store(true, Ordering::Relaxed);
                }
            });

            let opts = IngestOptions {
                clear,
                dry_run,
                limit,
                batch_size,
            };
            let reporter = progress_mode.reporter();
            ingest::run_ingest(&cfg, &what, &opts, reporter.as_ref(), &stop).await?;
        }
        Commands::Search {
            kind,
            query,
            threshold,
            limit,
        } => {
            search::run_search(&cfg, &kind, &query, threshold, limit).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Demo => {
            demo::run_demo(&cfg).await?;
        }
    }

    Ok(())
}
