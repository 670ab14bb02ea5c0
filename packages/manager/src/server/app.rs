//! Router assembly and shared application state.

use axum::http::{header, HeaderName, Method};
use axum::routing::{get, patch, post};
use axum::{middleware, Router};
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::middleware::{handle_panic, require_api_token, security_headers};
use crate::server::routes::{health, jobs, proxygate, results, stats, workers};
use crate::service::{
    ExporterRegistry, JobService, ResultIngester, StatsService, TaskDispatcher, WorkerRegistry,
};
use crate::storage::{ProxyRepository, ResultRepository};

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub jobs: JobService,
    pub dispatcher: TaskDispatcher,
    pub registry: WorkerRegistry,
    pub ingester: ResultIngester,
    pub stats: StatsService,
    pub proxies: ProxyRepository,
    pub results: ResultRepository,
    pub exporters: ExporterRegistry,
    pub api_token: Option<String>,
}

/// Build the full control-plane router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-requested-with"),
        ])
        .max_age(Duration::from_secs(86_400));

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v2/health", get(health::health_handler))
        .route("/api/v2/stats", get(stats::dashboard_stats))
        .route("/api/v2/jobs", get(jobs::list_jobs).post(jobs::create_job))
        .route("/api/v2/jobs/stats", get(jobs::job_stats))
        .route(
            "/api/v2/jobs/:id",
            get(jobs::get_job).delete(jobs::delete_job),
        )
        .route("/api/v2/jobs/:id/pause", post(jobs::pause_job))
        .route("/api/v2/jobs/:id/resume", post(jobs::resume_job))
        .route("/api/v2/jobs/:id/cancel", post(jobs::cancel_job))
        .route(
            "/api/v2/jobs/:id/results",
            get(jobs::list_job_results).post(jobs::submit_job_results),
        )
        .route("/api/v2/jobs/:id/download", get(jobs::download_job_results))
        .route("/api/v2/workers", get(workers::list_workers))
        .route("/api/v2/workers/stats", get(workers::worker_stats))
        .route("/api/v2/workers/register", post(workers::register_worker))
        .route("/api/v2/workers/heartbeat", post(workers::heartbeat_worker))
        .route(
            "/api/v2/workers/:id",
            get(workers::get_worker).delete(workers::delete_worker),
        )
        .route("/api/v2/workers/:id/claim", post(workers::claim_task))
        .route("/api/v2/workers/:id/complete", post(workers::complete_task))
        .route("/api/v2/workers/:id/fail", post(workers::fail_task))
        .route("/api/v2/workers/:id/release", post(workers::release_task))
        .route("/api/v2/results", get(results::list_results))
        .route("/api/v2/results/download", get(results::download_results))
        .route("/api/v2/proxygate/stats", get(proxygate::proxy_stats))
        .route(
            "/api/v2/proxygate/sources",
            get(proxygate::list_sources).post(proxygate::create_source),
        )
        .route(
            "/api/v2/proxygate/sources/:id",
            patch(proxygate::patch_source).delete(proxygate::delete_source),
        )
        .route("/api/v2/proxygate/refresh", post(proxygate::refresh_sources))
        // Layer order, outermost first at runtime: trace, security
        // headers, panic recovery, CORS (answers preflight before auth),
        // then token auth.
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_token,
        ))
        .layer(cors)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
