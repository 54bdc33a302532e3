//! # Memory Search CLI (`msearch`)
//!
//! ## Usage
//!
//! ```bash
//! msearch --config ./config/msearch.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `msearch rebuild [--full]` | Bring the index up to date with the corpus |
//! | `msearch search <query...>` | Hybrid, keyword or vector search |
//! | `msearch stats` | Index summary and content digest |
//!
//! Logs go to stderr; `-v`/`-vv` raise verbosity, `-q` silences them and
//! `RUST_LOG` overrides both.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use memory_search::config::load_config;
use memory_search::stats::print_stats;
use memory_search::{Engine, Error};
use memory_search_core::models::{
    Category, RebuildMode, RebuildReport, SearchMode, SearchOutcome, SearchRequest,
};

/// Hybrid keyword and semantic search over a memory corpus.
#[derive(Parser)]
#[command(name = "msearch", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/msearch.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Silence all logging.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the index with the corpus and refresh embeddings.
    Rebuild {
        /// Clear the index first. Also recovers a corrupt index file.
        #[arg(long)]
        full: bool,
    },

    /// Search the index.
    Search {
        /// Query text; multiple words are joined with spaces.
        #[arg(required = true)]
        query: Vec<String>,

        /// `hybrid`, `bm25` or `vector`.
        #[arg(long, default_value = "hybrid")]
        mode: SearchMode,

        /// Only return chunks of this category.
        #[arg(short, long)]
        category: Option<Category>,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Run an incremental rebuild before searching.
        #[arg(long)]
        refresh: bool,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show index statistics.
    Stats {
        /// Print statistics as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(cli: &Cli) {
    if cli.quiet {
        return;
    }

    let filter = match cli.verbose {
        0 => "warn,memory_search=info,memory_search_core=info",
        1 => "info,memory_search=debug,memory_search_core=debug",
        _ => "debug",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let cfg = load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Rebuild { full } => {
            let opened = if full {
                match Engine::open(cfg.clone()).await {
                    Err(Error::CorruptIndex(reason)) => {
                        tracing::warn!(%reason, "index is corrupt, recreating");
                        Engine::open_reset(cfg).await
                    }
                    other => other,
                }
            } else {
                Engine::open(cfg).await
            };
            let mut engine = opened.map_err(with_hint)?;

            let mode = if full {
                RebuildMode::Full
            } else {
                RebuildMode::Incremental
            };
            let report = engine.rebuild(mode).await.map_err(with_hint)?;
            print_report(&report);
            engine.close().await;
        }
        Commands::Search {
            query,
            mode,
            category,
            limit,
            refresh,
            json,
        } => {
            let mut engine = Engine::open(cfg).await.map_err(with_hint)?;
            if refresh {
                engine
                    .rebuild(RebuildMode::Incremental)
                    .await
                    .map_err(with_hint)?;
            }

            let mut req = SearchRequest::new(query.join(" ")).mode(mode);
            if let Some(category) = category {
                req = req.category(category);
            }
            if let Some(limit) = limit {
                req = req.limit(limit);
            }

            let outcome = engine.search(&req).await.map_err(with_hint)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&outcome);
            }
            engine.close().await;
        }
        Commands::Stats { json } => {
            let engine = Engine::open(cfg).await.map_err(with_hint)?;
            let stats = engine.stats().await.map_err(with_hint)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
            engine.close().await;
        }
    }

    Ok(())
}

fn with_hint(err: Error) -> anyhow::Error {
    if err.is_corrupt_index() {
        anyhow::Error::new(err).context("run `msearch rebuild --full` to recreate the index")
    } else {
        err.into()
    }
}

fn print_report(report: &RebuildReport) {
    println!(
        "Rebuild complete: {} added, {} updated, {} removed, {} unchanged",
        report.chunks_added, report.chunks_updated, report.chunks_removed, report.chunks_unchanged
    );
    println!(
        "  documents: {} indexed, {} skipped",
        report.documents_indexed, report.documents_skipped
    );
    println!(
        "  embeddings: {} written, {} failed, {} pending, {} purged",
        report.embeddings_written,
        report.embeddings_failed,
        report.embeddings_pending,
        report.embeddings_purged
    );
    if let Some(newest) = report.newest_document {
        println!("  newest document: {}", newest.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(reason) = &report.degraded {
        println!("  degraded: {} ({})", reason, reason.code());
    }
}

fn print_outcome(outcome: &SearchOutcome) {
    if let Some(reason) = &outcome.degraded {
        println!("[{}] keyword results only: {}", reason.code(), reason);
        println!();
    }

    if outcome.results.is_empty() {
        println!("No results.");
        return;
    }

    for result in &outcome.results {
        let provenance: Vec<String> = [
            result.keyword_rank.map(|r| format!("BM25#{}", r)),
            result.vector_rank.map(|r| format!("Vec#{}", r)),
        ]
        .into_iter()
        .flatten()
        .collect();

        println!(
            "{}. [{:.4}] {} / {}",
            result.rank, result.score, result.category, result.title
        );
        println!(
            "    path: {}:{}-{}",
            result.path, result.line_start, result.line_end
        );
        println!("    match: {}", provenance.join(" "));
        println!(
            "    excerpt: \"{}\"",
            result.snippet.replace('\n', " ").trim()
        );
        println!();
    }
}
