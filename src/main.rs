//! # Image Backfill CLI (`backfill`)
//!
//! ## Usage
//!
//! ```bash
//! backfill [--config ./config/backfill.toml] [-v] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `backfill scan` | List every placeholder marker without calling any service |
//! | `backfill run` | Generate, upload and rewrite every marker, then write the summary |
//!
//! ## Examples
//!
//! ```bash
//! # Dry look at what would be replaced
//! backfill scan --root ./generated-articles
//!
//! # Full run with a 10 minute budget and 4 workers
//! backfill run --timeout-secs 600 --concurrency 4
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use image_backfill::config::{self, Config};
use image_backfill::{coordinator, logging, scan};

/// Replace placeholder images in markdown documents with generated ones.
///
/// Settings are read from an optional TOML file (`--config`); service
/// credentials come from the environment.
#[derive(Parser)]
#[command(name = "backfill", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/backfill.toml`; built-in defaults apply when
    /// the default file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log progress at `info` level (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace every placeholder and write the run summary.
    ///
    /// Requires GEMINI_API_KEY, CLOUDINARY_CLOUD_NAME and
    /// CLOUDINARY_API_KEY. Exits non-zero only when the run cannot start
    /// or a service rejects the credentials.
    Run {
        /// Directory to scan (overrides `[scan].root`).
        #[arg(long)]
        root: Option<PathBuf>,

        /// Summary file path (overrides `[run].summary_path`).
        #[arg(long)]
        summary: Option<PathBuf>,

        /// Number of documents processed in parallel.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Wall-clock budget in seconds; 0 disables it.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// List placeholder markers without contacting any service.
    Scan {
        /// Directory to scan (overrides `[scan].root`).
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut cfg: Config = config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            root,
            summary,
            concurrency,
            timeout_secs,
        } => {
            if let Some(root) = root {
                cfg.scan.root = root;
            }
            if let Some(summary) = summary {
                cfg.run.summary_path = summary;
            }
            if let Some(concurrency) = concurrency {
                cfg.run.concurrency = concurrency;
            }
            if let Some(secs) = timeout_secs {
                cfg.run.wall_clock_secs = secs;
            }
            config::validate(&cfg)?;
            coordinator::run_backfill(&cfg).await?;
        }
        Commands::Scan { root } => {
            if let Some(root) = root {
                cfg.scan.root = root;
            }
            config::validate(&cfg)?;
            scan::run_scan(&cfg)?;
        }
    }

    Ok(())
}
