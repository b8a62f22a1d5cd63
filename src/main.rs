use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mongoboot::mongo::MongoCatalog;
use mongoboot_core::{engine, Manifest, Secrets};

#[derive(Parser)]
#[command(name = "mboot")]
#[command(about = "Declarative, idempotent schema and index bootstrap for MongoDB")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a manifest against a live database
    Apply {
        /// Path to the manifest file
        #[arg(short, long)]
        manifest: PathBuf,

        /// Connection string; falls back to MBOOT_URI
        #[arg(long)]
        uri: Option<String>,

        /// Target database; falls back to the manifest's database field
        #[arg(short, long)]
        database: Option<String>,
    },
    /// Validate a manifest without connecting anywhere
    Check {
        /// Path to the manifest file
        #[arg(short, long)]
        manifest: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "mongoboot=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Apply {
            manifest,
            uri,
            database,
        } => {
            let manifest = Manifest::from_path(&manifest)?;
            let secrets = Secrets::from_env(&manifest)?;

            let uri = uri
                .or_else(|| std::env::var("MBOOT_URI").ok())
                .context("no connection string: pass --uri or set MBOOT_URI")?;
            let database = database
                .or_else(|| manifest.database.clone())
                .context("no target database: pass --database or set it in the manifest")?;

            tracing::info!(database = %database, "starting bootstrap");
            let catalog = MongoCatalog::connect(&uri, &database).await?;
            let report = engine::apply(&manifest, &secrets, &catalog).await?;

            tracing::info!(
                users = report.created_users.len(),
                collections = report.created_collections.len(),
                indexes = report.created_indexes.len(),
                skipped = report.skipped_users.len()
                    + report.skipped_collections.len()
                    + report.skipped_indexes.len(),
                "bootstrap complete"
            );
            if !report.changed() {
                tracing::info!("database already matched the manifest");
            }
        }
        Commands::Check { manifest } => {
            let manifest = Manifest::from_path(&manifest)?;
            println!(
                "manifest ok: {} user(s), {} collection(s), {} index(es)",
                manifest.users.len(),
                manifest.collections.len(),
                manifest.indexes.len()
            );
            for collection in &manifest.collections {
                println!(
                    "  collection {} ({} required field(s))",
                    collection.name,
                    collection.required.len()
                );
            }
            for index in &manifest.indexes {
                println!(
                    "  index {}.{}{}",
                    index.collection,
                    index.index_name(),
                    if index.unique { " (unique)" } else { "" }
                );
            }
        }
    }

    Ok(())
}
