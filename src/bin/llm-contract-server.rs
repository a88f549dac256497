use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use llm_contract::config::{EngineConfig, StoreConfig};
use llm_contract::engine::Engine;
use llm_contract::http::{AppState, router};
use llm_contract::profile::Env;
use llm_contract::providers::OpenAICompatible;
use llm_contract::store::{StateFile, Store};

#[derive(Parser, Debug)]
#[command(
    name = "llm-contract-server",
    about = "Serve typed LLM endpoints with metered credits"
)]
struct Args {
    /// Engine config (TOML). Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config.
    #[arg(long)]
    listen: Option<String>,

    /// `.env` file consulted before the process environment.
    #[arg(long)]
    dotenv: Option<PathBuf>,

    /// JSON state file with users and projects to seed the store with.
    #[arg(long)]
    state: Option<PathBuf>,

    #[arg(long)]
    json_logs: bool,
}

async fn open_store(config: &StoreConfig) -> Result<Store, Box<dyn std::error::Error>> {
    match config {
        StoreConfig::Memory => Ok(Store::memory()),
        #[cfg(feature = "store-sqlite")]
        StoreConfig::Sqlite { path } => {
            let sqlite = llm_contract::store::SqliteStore::new(path);
            sqlite.init().await?;
            Ok(Store::new(Arc::new(sqlite)))
        }
        #[cfg(not(feature = "store-sqlite"))]
        StoreConfig::Sqlite { .. } => {
            Err("sqlite store requires the `store-sqlite` feature".into())
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    llm_contract::telemetry::init_tracing(args.json_logs)?;

    let mut config = match args.config.as_deref() {
        Some(path) => EngineConfig::load(path).await?,
        None => EngineConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let env = match args.dotenv.as_deref() {
        Some(path) => Env::load(path).await?,
        None => Env::default(),
    };

    let store = open_store(&config.store).await?;
    if let Some(path) = args.state.as_deref() {
        let state = StateFile::load(path)?;
        state.seed(&store).await?;
        tracing::info!(
            users = state.users.len(),
            projects = state.projects.len(),
            "seeded store"
        );
    }

    let model = OpenAICompatible::from_config(&config.provider, &env)?;
    let engine = Engine::from_config(&config, store, Arc::new(model))?;
    let app = router(AppState::new(engine));

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    tracing::info!(listen = %config.listen, "llm-contract-server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
