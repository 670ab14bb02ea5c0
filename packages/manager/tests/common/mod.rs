//! Shared fixture: a fully wired control plane over an in-memory store.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use manager_core::broker::PriorityBroker;
use manager_core::server::{build_router, AppState};
use manager_core::service::{
    ExporterRegistry, IngestConfig, JobService, RegistryConfig, ResultIngester, StatsService,
    TaskDispatcher, WorkerRegistry,
};
use manager_core::storage::{
    db, migrate, JobRepository, ProxyRepository, ResultRepository, StatsRepository,
    TaskRepository, WorkerRepository,
};

pub struct TestApp {
    pub router: Router,
    pub broker: Arc<PriorityBroker>,
}

pub async fn spawn_app(api_token: Option<&str>) -> TestApp {
    let pool = db::memory_pool().await;
    migrate::run(&pool).await.expect("schema evolves");

    let jobs_repo = JobRepository::new(pool.clone());
    let tasks_repo = TaskRepository::new(pool.clone());
    let workers_repo = WorkerRepository::new(pool.clone());
    let results_repo = ResultRepository::new(pool.clone());
    let broker = Arc::new(PriorityBroker::new(1024));

    let state = AppState {
        jobs: JobService::new(jobs_repo.clone()),
        dispatcher: TaskDispatcher::new(jobs_repo.clone(), tasks_repo.clone(), broker.clone()),
        registry: WorkerRegistry::new(
            workers_repo,
            tasks_repo.clone(),
            jobs_repo.clone(),
            RegistryConfig::default(),
        ),
        ingester: ResultIngester::new(
            results_repo.clone(),
            tasks_repo,
            jobs_repo,
            IngestConfig::default(),
        ),
        stats: StatsService::new(
            StatsRepository::new(pool.clone()),
            std::time::Duration::from_secs(60),
        ),
        proxies: ProxyRepository::new(pool),
        results: results_repo,
        exporters: ExporterRegistry::builtin(),
        api_token: api_token.map(String::from),
    };

    TestApp {
        router: build_router(state),
        broker,
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Value,
}

impl TestApp {
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request builds");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router responds");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body reads");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body), None).await
    }

    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None, None).await
    }
}
