// Frontbase core entry point.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use frontbase::{
    create_core_store, init_logging_with_level, AppState, CacheLayer, SecretBox, SettingsHolder,
};

#[derive(Parser)]
#[command(name = "frontbase")]
#[command(about = "Page-builder backend core: datasource adapters, schema cache, publish compiler")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 8000)]
        port: u16,

        /// Core store connection string
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,

        /// Directory for generated state (encryption key)
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging_with_level(cli.verbose, cli.quiet)?;

    match cli.command {
        Commands::Serve {
            port,
            database_url,
            data_dir,
        } => serve(port, &database_url, &data_dir).await,
    }
}

async fn serve(port: u16, database_url: &str, data_dir: &std::path::Path) -> Result<()> {
    let secrets = SecretBox::load_or_generate(data_dir).context("failed to set up secrets")?;
    let store = create_core_store(database_url, secrets)
        .await
        .context("failed to open core store")?;

    let settings = SettingsHolder::new();
    settings.init(&store).await;
    let cache = CacheLayer::new(settings.clone());

    info!("Core store ready; starting HTTP surface");
    let state = AppState::new(store, cache, settings);
    frontbase::start_server(state, port).await
}
