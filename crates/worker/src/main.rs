use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flashcast_orchestrator::{
    standard_registry, EntityStore, InMemoryEntityStore, InMemoryResources, Orchestrator,
    PlanContext, PlannerRegistry, PostgresEntityStore, ResourceProvider, StyleLookup,
    WorkflowDeps,
};
use flashcast_providers::{AiServerClient, HttpArtifactFetcher, RunningHubClient};

mod config;

use config::{StoreBackend, WorkerConfig};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

struct Backend {
    store: Arc<dyn EntityStore>,
    resources: Arc<dyn ResourceProvider>,
    styles: Arc<dyn StyleLookup>,
}

async fn connect_backend(config: &WorkerConfig) -> Result<Backend> {
    match config.store_backend {
        StoreBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&config.database_url)
                .await
                .context("Failed to connect to database")?;
            let store = Arc::new(PostgresEntityStore::new(pool));
            store.migrate().await.context("Failed to run migrations")?;
            tracing::info!("Connected to database");
            Ok(Backend {
                store: store.clone(),
                resources: store.clone(),
                styles: store,
            })
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; jobs are lost on exit");
            let resources = Arc::new(InMemoryResources::new());
            Ok(Backend {
                store: Arc::new(InMemoryEntityStore::new()),
                resources: resources.clone(),
                styles: resources,
            })
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "flashcast_worker=info,flashcast_orchestrator=info,flashcast_providers=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("flashcast-worker starting...");

    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    tracing::info!(
        backend = ?config.store_backend,
        ai_server = %config.ai_server_url,
        max_tasks = config.ai_server_max_tasks,
        workers = config.engine.worker_count,
        "Configuration loaded"
    );

    let backend = connect_backend(&config).await?;

    let queue = Arc::new(AiServerClient::new(
        &config.ai_server_url,
        config.ai_server_max_tasks,
    ));
    let deps = WorkflowDeps {
        engine: Arc::new(RunningHubClient::new(
            &config.running_hub_url,
            config.running_hub_api_key.clone(),
        )),
        resources: backend.resources.clone(),
        fetcher: Some(Arc::new(HttpArtifactFetcher::new(&config.resource_dir))),
    };
    let handlers = standard_registry(
        config.engine.poll_interval,
        queue.clone(),
        deps,
        &config.workflows,
    );
    let planners = PlannerRegistry::standard(PlanContext {
        resources: backend.resources,
        styles: backend.styles,
    });

    let orchestrator = Arc::new(Orchestrator::new(
        backend.store,
        Arc::new(planners),
        Arc::new(handlers),
        queue,
        config.engine.clone(),
    ));

    let scheduler = orchestrator
        .start()
        .context("Failed to start orchestrator")?;
    let resumed = orchestrator
        .resume_jobs()
        .await
        .context("Failed to resume unfinished jobs")?;
    tracing::info!(resumed, "Worker ready, waiting for shutdown signal...");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Received shutdown signal");

    orchestrator
        .shutdown(scheduler, SHUTDOWN_TIMEOUT)
        .await
        .context("Shutdown did not complete cleanly")?;

    tracing::info!("Worker shutdown complete");
    Ok(())
}
