//! # page-ingest CLI (`pingest`)
//!
//! ## Usage
//!
//! ```bash
//! pingest --config ./config/pingest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pingest run [images\|text\|all]` | Enrich and ingest staged artifacts |
//! | `pingest check` | Validate config, prompts and credentials; list staged artifacts |
//! | `pingest schema` | Print the expected index mapping |
//!
//! Logging goes to stderr through `tracing`; set `RUST_LOG` to change the
//! filter (default `info`) and pass `--log-json` for JSON lines.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use page_ingest::acquire::StagingDir;
use page_ingest::config;
use page_ingest::models::ArtifactKind;
use page_ingest::pipeline::{self, Prompts, Which};
use page_ingest::progress::ProgressMode;
use page_ingest::schema;
use page_ingest::sigv4::Credentials;

/// Page artifact enrichment and ingestion.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/pingest.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "pingest",
    about = "Enrich page images and text with entities and embeddings and load them into a search index",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pingest.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the image and/or text pipelines over the staging directory.
    ///
    /// Artifact failures are reported but never change the exit status;
    /// only configuration, prompt, credential or staging errors do.
    Run {
        #[arg(value_enum, default_value = "all")]
        which: Which,

        /// Download artifacts from `[storage.s3]` into the staging directory first.
        #[arg(long)]
        fetch: bool,

        /// Batch progress on stderr. Defaults to `human` on a TTY, `off` otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Validate configuration, prompt templates and credentials, and list
    /// the staged artifacts by kind.
    Check,

    /// Print the index mapping the ingest records expect.
    Schema {
        /// Vector dimension; defaults to `models.dims` from the config, or 1536.
        #[arg(long)]
        dims: Option<usize>,
    },
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    match cli.command {
        Commands::Schema { dims } => {
            let dims = match dims {
                Some(d) => d,
                None => config::load_config(&cli.config)
                    .map(|c| c.models.dims)
                    .unwrap_or(1536),
            };
            println!("{}", serde_json::to_string_pretty(&schema::index_mapping(dims))?);
        }
        Commands::Check => {
            let cfg = config::load_config(&cli.config)?;
            Prompts::load(&cfg.paths)?;
            Credentials::from_env()?;
            let artifacts = StagingDir::new(&cfg.paths.staging_dir)
                .scan()
                .context("Failed to scan staging directory")?;
            let images = artifacts.iter().filter(|a| a.kind == ArtifactKind::Image).count();
            let texts = artifacts.len() - images;
            let unnumbered = artifacts.iter().filter(|a| a.page_number().is_none()).count();

            println!("config: {}", cli.config.display());
            println!("  staging dir: {}", cfg.paths.staging_dir.display());
            println!("  image artifacts: {}", images);
            println!("  text artifacts: {}", texts);
            if unnumbered > 0 {
                println!("  without page number: {}", unnumbered);
            }
            println!("ok");
        }
        Commands::Run {
            which,
            fetch,
            progress,
        } => {
            let cfg = config::load_config(&cli.config)?;
            let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();
            pipeline::run(&cfg, which, fetch, reporter.as_ref()).await?;
        }
    }

    Ok(())
}
