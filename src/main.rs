//! # Context Triage CLI (`triage`)
//!
//! Runs the triage pipeline from the command line.
//!
//! ## Usage
//!
//! ```bash
//! triage --config ./config/triage.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `triage ask "<question>"` | Classify, retrieve, and synthesize an answer |
//! | `triage classify "<question>"` | Show the classification and routed categories |
//! | `triage sources` | List registered knowledge sources with staleness |
//!
//! `ask` and `sources` accept `--json` for machine-readable output.
//! Logging goes to stderr and honors `RUST_LOG` (default `info`).

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use context_triage::classifier::routing_categories;
use context_triage::config::{self, Config};
use context_triage::TriageService;

#[derive(Parser)]
#[command(
    name = "triage",
    about = "Query triage and multi-source retrieval for grounded answers",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When the file does not exist, built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/triage.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question from the registered knowledge sources.
    Ask {
        question: String,

        /// Print every retrieved quote after the answer.
        #[arg(long)]
        show_sources: bool,

        /// Print the full answer as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Classify a question without searching.
    Classify { question: String },

    /// List knowledge sources and how current they are.
    Sources {
        /// Print the listing as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::default())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let cfg = load(&cli.config)?;
    let service = TriageService::from_config(&cfg).context("Failed to initialize triage service")?;

    match cli.command {
        Commands::Ask {
            question,
            show_sources,
            json,
        } => {
            let answer = service.answer(&question).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
                return Ok(());
            }
            println!("{}", answer.text);

            if show_sources {
                for (label, results) in &answer.sources {
                    println!("\n{} ({} results)", label, results.len());
                    for r in results {
                        println!("  {:.2}  \"{}\" {}", r.confidence, r.quote, r.citation());
                    }
                }
            }
            for failure in &answer.failures {
                eprintln!("warning: {} unavailable: {}", failure.label, failure.error);
            }
        }
        Commands::Classify { question } => {
            let classification = service.classifier().classify(&question).await;
            let categories = routing_categories(&classification, cfg.classifier.confidence_threshold);
            println!("category:   {}", classification.category);
            println!("confidence: {:.2}", classification.confidence);
            println!("reasoning:  {}", classification.reasoning);
            if !classification.secondary.is_empty() {
                let names: Vec<&str> = classification.secondary.iter().map(|c| c.as_str()).collect();
                println!("secondary:  {}", names.join(", "));
            }
            let routed: Vec<&str> = categories.iter().map(|c| c.as_str()).collect();
            println!("routed:     {}", routed.join(", "));
        }
        Commands::Sources { json } => {
            let sources = service.sources();
            if json {
                println!("{}", serde_json::to_string_pretty(&sources)?);
                return Ok(());
            }
            if sources.is_empty() {
                println!("No knowledge sources found under {}", cfg.registry.root.display());
            }
            for status in sources {
                let age = status
                    .age_days
                    .map(|d| format!("{}d", d))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<40} {:<20} {:<9} {:>6}  {}",
                    status.source.key,
                    status.source.category.as_str(),
                    status.staleness.as_str(),
                    age,
                    status.source.label()
                );
            }
        }
    }

    Ok(())
}
