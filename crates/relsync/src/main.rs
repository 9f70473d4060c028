//! relsync CLI
//!
//! Converges a SQLite database onto a JSON model file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::sqlite::SqlitePoolOptions;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use relsync::prelude::*;
use relsync_core::dialect::SqliteDialect;

/// Converges a live database onto a declared schema.
#[derive(Parser)]
#[command(name = "relsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL.
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite::memory:")]
    database: String,

    /// JSON model file.
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Enable verbose output, including every executed statement.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the model to the database.
    Sync {
        /// Only these tables and views (all if not specified).
        #[arg(short, long)]
        table: Vec<String>,

        /// Show SQL without executing (dry run).
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the SQL a sync would execute.
    Plan {
        /// Only these tables and views (all if not specified).
        #[arg(short, long)]
        table: Vec<String>,
    },

    /// Print the database schema as JSON.
    Inspect,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&cli.database)
        .await?;
    let dialect = Arc::new(SqliteDialect::new());
    let session = SqliteSession::acquire(&pool).await?;
    let mut exec = Executor::new(Box::new(session), dialect.clone());
    let catalog = SqliteCatalog::new();

    match cli.command {
        Commands::Inspect => {
            let physical = catalog.load(&mut exec).await?;
            println!("{}", serde_json::to_string_pretty(&physical)?);
        }

        Commands::Sync { table, dry_run } => {
            let path = cli.model.context("sync needs --model")?;
            let schema = ModelFile::load(&path)?
                .into_model()?
                .compile(dialect.as_ref())?;
            info!(model = %path.display(), "Synchronizing");
            let plan = SchemaSync::new(&schema, &catalog)
                .only(table)
                .dry_run(dry_run)
                .run(&mut exec)
                .await?;
            if dry_run {
                print!("{plan}");
            }
        }

        Commands::Plan { table } => {
            let path = cli.model.context("plan needs --model")?;
            let schema = ModelFile::load(&path)?
                .into_model()?
                .compile(dialect.as_ref())?;
            let plan = SchemaSync::new(&schema, &catalog)
                .only(table)
                .plan(&mut exec)
                .await?;
            if plan.is_converged() {
                info!("Schema is up to date");
            }
            print!("{plan}");
        }
    }

    Ok(())
}
