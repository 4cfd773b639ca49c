//! # Product Harvest CLI (`harvest`)
//!
//! ## Usage
//!
//! ```bash
//! harvest --config ./config/harvest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `harvest init` | Create the SQLite database and run schema migrations |
//! | `harvest sources` | List configured sources and whether their directory exists |
//! | `harvest run` | Run sources, ingest their artifacts, print the run summary |
//! | `harvest upload` | Ingest records from a file or inline JSON |
//! | `harvest enrich` | Generate embeddings for stored products |
//! | `harvest admin` | Back up, inspect or clear a collection |
//!
//! `harvest run` exits with status 1 when no source succeeded.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use product_harvest::{admin, config, enrich, logging, migrate, pipeline, sources, upload};

/// Product Harvest CLI: runs product scrapers and stores their output.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/harvest.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "harvest",
    about = "Product Harvest: runs product scrapers and upserts their output into a document store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/harvest.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// List configured sources.
    Sources,

    /// Run sources and ingest what they produce.
    ///
    /// Sources run one after another; a failing source never stops the
    /// rest. The run summary is printed as JSON and saved to the output
    /// directory.
    Run {
        /// Comma-separated source names. Defaults to every configured source.
        #[arg(long)]
        sources: Option<String>,

        /// Number of pages each source should scrape.
        #[arg(long)]
        pages: Option<u32>,
    },

    /// Upsert records from a JSON / JSON-Lines file or an inline JSON string.
    Upload {
        #[arg(long, conflicts_with = "json", required_unless_present = "json")]
        file: Option<PathBuf>,

        #[arg(long)]
        json: Option<String>,
    },

    /// Generate embeddings for stored products.
    Enrich {
        /// Maximum number of products to embed.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Back up, inspect or clear a collection.
    ///
    /// Without flags nothing is deleted; clearing requires `--confirm-clear`
    /// and always writes a backup first.
    Admin {
        /// Collection to operate on. Defaults to the products collection.
        #[arg(long, short = 'c')]
        collection: Option<String>,

        /// Only write a backup.
        #[arg(long)]
        backup_only: bool,

        /// Back up, then delete every document in the collection.
        #[arg(long)]
        confirm_clear: bool,

        /// Only print statistics.
        #[arg(long)]
        stats_only: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    let guard = logging::init(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg.db).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Run { sources, pages } => {
            let summary = pipeline::run_harvest(&cfg, sources.as_deref(), pages).await?;
            if !summary.anything_accomplished() {
                drop(guard);
                std::process::exit(1);
            }
        }
        Commands::Upload { file, json } => {
            upload::run_upload(&cfg, file.as_deref(), json.as_deref()).await?;
        }
        Commands::Enrich { limit } => {
            enrich::run_enrich(&cfg, limit).await?;
        }
        Commands::Admin {
            collection,
            backup_only,
            confirm_clear,
            stats_only,
        } => {
            admin::run_admin(
                &cfg,
                collection.as_deref(),
                backup_only,
                confirm_clear,
                stats_only,
            )
            .await?;
        }
    }

    Ok(())
}
