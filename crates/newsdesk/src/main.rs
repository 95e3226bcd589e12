//! Binary entrypoint: CLI argument parsing, subsystem wiring, and dispatch
//! to `init` (schema creation) or `serve` (HTTP API + scheduler + background
//! executor, run until signaled to stop).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use newsdesk::config::{self, Config};
use newsdesk::embedder;
use newsdesk::executor::Executor;
use newsdesk::fetcher::Fetcher;
use newsdesk::ingest::IngestCoordinator;
use newsdesk::llm_client::LlmClient;
use newsdesk::migrate;
use newsdesk::reranker as reranker_wiring;
use newsdesk::retrieval::RetrievalPipeline;
use newsdesk::scheduler::Scheduler;
use newsdesk::server;
use newsdesk::sqlite_store::SqliteMetadataStore;
use newsdesk::vector_store::VectorStoreManager;
use newsdesk::web_fallback::{ExternalSearchProvider, HttpExternalSearchProvider};
use newsdesk_core::embedding::Embedder;
use newsdesk_core::reranker::Reranker;
use newsdesk_core::store::MetadataStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "newsdesk", about = "Personal news knowledge base: acquisition, vector search, and reranked retrieval", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "./config/newsdesk.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema if it does not already exist.
    Init,
    /// Start the HTTP API, background executor, and scheduler.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("newsdesk=info,tower_http=info")))
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config).context("loading configuration")?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&config).await?;
            info!(path = %config.db.path.display(), "database schema initialized");
        }
        Commands::Serve => run_serve(config).await?,
    }

    Ok(())
}

async fn run_serve(config: Config) -> Result<()> {
    migrate::run_migrations(&config).await.context("running migrations")?;

    let pool = newsdesk::db::connect(&config).await.context("connecting to database")?;
    let store: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new(pool));

    let embedder: Arc<dyn Embedder> = embedder::build_embedder(&config.embedder).await;
    let reranker: Arc<dyn Reranker> = reranker_wiring::build_reranker(&config.reranker).await;
    let fetcher = Arc::new(Fetcher::new(&config.fetcher).context("building fetcher")?);

    let vectors = Arc::new(VectorStoreManager::new(&config.vector_store, embedder.model_id().to_string()));

    let llm = Arc::new(LlmClient::new(&config.llm).context("building llm client")?);
    let external: Option<Arc<dyn ExternalSearchProvider>> = match HttpExternalSearchProvider::new(&config.web_fallback) {
        Ok(provider) => Some(Arc::new(provider)),
        Err(e) => {
            tracing::warn!(error = %e, "web fallback provider not configured, external search disabled");
            None
        }
    };

    let ingest = IngestCoordinator::new(store.clone(), vectors.clone(), embedder.clone(), fetcher.clone(), config.fetcher.per_host_rps);

    let executor = Arc::new(Executor::spawn(&config.executor, ingest.clone() as Arc<dyn newsdesk::executor::TaskHandler>));
    ingest.attach_executor(executor.clone());

    let retrieval = Arc::new(RetrievalPipeline::new(
        store.clone(),
        vectors.clone(),
        embedder.clone(),
        reranker.clone(),
        external,
        Some(llm.clone()),
        config.search.clone(),
    ));

    let scheduler = Arc::new(Scheduler::new(store.clone(), executor.clone(), config.scheduler.clone()));
    let scheduler_handle = tokio::spawn(scheduler.run());

    let state = server::AppState {
        store,
        vectors,
        ingest,
        retrieval,
        executor: executor.clone(),
        upload_max_bytes: config.upload.max_bytes,
    };
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await.context("binding http listener")?;
    info!(addr = %config.server.bind, "newsdesk listening");

    axum::serve(listener, app).await.context("serving http")?;

    scheduler_handle.abort();
    Ok(())
}
