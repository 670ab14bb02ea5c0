//! `gmaps-fleet` entry point: `manager` serves the control plane,
//! `worker` connects to one and executes tasks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use manager_core::broker::{Consumer, ConsumerConfig, PriorityBroker};
use manager_core::server::{build_router, AppState};
use manager_core::service::{
    reconcile, ExporterRegistry, IngestConfig, JobService, PersistedTaskHandler, RegistryConfig,
    ResultIngester, StatsService, TaskDispatcher, WorkerRegistry,
};
use manager_core::storage::{
    db, migrate, JobRepository, ProxyRepository, ResultRepository, StatsRepository,
    TaskRepository, WorkerRepository,
};
use manager_core::worker::{self, UnimplementedExecutor, WorkerConfig};
use manager_core::Config;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (commit ",
    env!("FLEET_GIT_COMMIT"),
    ", built ",
    env!("FLEET_BUILD_DATE"),
    ")"
);

#[derive(Parser)]
#[command(name = "gmaps-fleet", version, long_version = LONG_VERSION)]
#[command(about = "Distributed control plane for a Google-Maps scraping fleet")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP control plane, broker, and background loops.
    Manager {
        #[arg(long, env = "PORT")]
        port: Option<u16>,
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
    },
    /// Connect to a manager, claim tasks, and execute them.
    Worker {
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        manager_url: String,
        /// Defaults to `<hostname>-<8 hex>`.
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, env = "API_TOKEN")]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,manager_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Cli::parse().command {
        Command::Manager { port, database_url } => run_manager(port, database_url).await,
        Command::Worker {
            manager_url,
            id,
            name,
            token,
        } => run_worker(manager_url, id, name, token).await,
    }
}

async fn run_manager(port: Option<u16>, database_url: Option<String>) -> Result<()> {
    let mut config = Config::from_env().context("load configuration")?;
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(database_url) = database_url {
        config.database_url = database_url;
    }
    tracing::info!(version = LONG_VERSION, "starting manager");

    let pool = db::connect(&config.database_url)
        .await
        .context("connect to database")?;
    migrate::run(&pool).await.context("evolve schema")?;

    // Repositories and services
    let jobs_repo = JobRepository::new(pool.clone());
    let tasks_repo = TaskRepository::new(pool.clone());
    let workers_repo = WorkerRepository::new(pool.clone());
    let results_repo = ResultRepository::new(pool.clone());
    let proxies_repo = ProxyRepository::new(pool.clone());
    let stats_repo = StatsRepository::new(pool.clone());

    let broker = Arc::new(PriorityBroker::new(config.queue_capacity));
    let dispatcher = TaskDispatcher::new(jobs_repo.clone(), tasks_repo.clone(), broker.clone());
    let registry = WorkerRegistry::new(
        workers_repo.clone(),
        tasks_repo.clone(),
        jobs_repo.clone(),
        RegistryConfig {
            liveness_window: config.liveness_window,
            sweep_interval: config.sweep_interval,
            failure_fails_parent: config.worker_failure_fails_job,
        },
    );
    let ingester = ResultIngester::new(
        results_repo.clone(),
        tasks_repo.clone(),
        jobs_repo.clone(),
        IngestConfig {
            buffer_size: config.ingest_buffer_size,
            flush_interval: config.ingest_flush_interval,
            sync_parent_progress: config.sync_parent_progress,
        },
    );

    // Startup reconciliation: recover work interrupted by the last stop.
    reconcile::republish_pending_tasks(&tasks_repo, &broker)
        .await
        .context("republish pending tasks")?;
    reconcile::offline_stale_workers(&workers_repo, chrono::Utc::now())
        .await
        .context("offline stale workers")?;

    let shutdown = CancellationToken::new();

    // Background loops
    let consumer_handle = {
        let consumer = Consumer::new(
            broker.clone(),
            ConsumerConfig {
                prefetch: config.prefetch,
                max_retries: config.max_retries,
                ..ConsumerConfig::default()
            },
        );
        let handler = Arc::new(PersistedTaskHandler::new(tasks_repo.clone()));
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = consumer.run(handler, cancel).await {
                tracing::error!(error = %e, "broker consumer exited");
            }
        })
    };
    let sweeper_handle = {
        let registry = registry.clone();
        let cancel = shutdown.clone();
        tokio::spawn(async move { registry.run_sweeper(cancel).await })
    };
    let ingester_handle = {
        let ingester = ingester.clone();
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = ingester.run(cancel).await {
                tracing::error!(error = %e, "result ingester exited");
            }
        })
    };

    let state = AppState {
        jobs: JobService::new(jobs_repo),
        dispatcher,
        registry,
        ingester,
        stats: StatsService::new(stats_repo, config.liveness_window),
        proxies: proxies_repo,
        results: results_repo,
        exporters: ExporterRegistry::builtin(),
        api_token: config.api_token.clone(),
    };
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(addr = %addr, "control plane listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown signal received");
                }
                _ = server_shutdown.cancelled() => {}
            }
        })
        .await
        .context("serve http")?;

    // Stop background loops and wait for them to drain.
    shutdown.cancel();
    let _ = tokio::time::timeout(
        Duration::from_secs(10),
        futures::future::join3(consumer_handle, sweeper_handle, ingester_handle),
    )
    .await;
    tracing::info!("manager stopped");
    Ok(())
}

async fn run_worker(
    manager_url: String,
    id: Option<String>,
    name: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let mut config = WorkerConfig::new(manager_url);
    if let Some(id) = id {
        config.worker_id = id;
    }
    config.name = name;
    config.api_token = token;
    tracing::info!(version = LONG_VERSION, worker_id = %config.worker_id, "starting worker");

    let shutdown = CancellationToken::new();
    let signal_cancel = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        signal_cancel.cancel();
    });

    worker::run(config, Arc::new(UnimplementedExecutor), shutdown)
        .await
        .context("run worker")?;
    Ok(())
}
