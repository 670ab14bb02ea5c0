//! Worker-mode runtime.
//!
//! A worker process connects to a manager URL, registers, heartbeats,
//! claims tasks, executes them through the pluggable [`Executor`] seam,
//! submits result batches, and completes or fails the claim. The scraper
//! engine itself is an external collaborator behind [`Executor`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::common::{Error, Result};
use crate::domain::Place;
use crate::server::routes::workers::ClaimedTask;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub manager_url: String,
    pub worker_id: String,
    pub name: Option<String>,
    pub api_token: Option<String>,
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
}

impl WorkerConfig {
    pub fn new(manager_url: String) -> Self {
        Self {
            manager_url,
            worker_id: default_worker_id(),
            name: None,
            api_token: None,
            heartbeat_interval: Duration::from_secs(15),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// `<hostname>-<8 hex>`, the default worker identity.
pub fn default_worker_id() -> String {
    let hostname = gethostname::gethostname();
    let hostname = hostname.to_string_lossy();
    let suffix = &Uuid::new_v4().simple().to_string()[..8];
    format!("{hostname}-{suffix}")
}

/// Executes one claimed task and returns the scraped places.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, task: &ClaimedTask) -> anyhow::Result<Vec<Place>>;
}

/// Placeholder executor for builds without a bundled scraper engine;
/// every claim is failed back to the manager.
pub struct UnimplementedExecutor;

#[async_trait]
impl Executor for UnimplementedExecutor {
    async fn execute(&self, _task: &ClaimedTask) -> anyhow::Result<Vec<Place>> {
        anyhow::bail!("no scraper engine is bundled with this worker build")
    }
}

/// Thin HTTP client over the manager's worker endpoints.
pub struct ManagerClient {
    http: reqwest::Client,
    base_url: String,
    worker_id: String,
    api_token: Option<String>,
}

impl ManagerClient {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.manager_url.trim_end_matches('/').to_string(),
            worker_id: config.worker_id.clone(),
            api_token: config.api_token.clone(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{path}", self.base_url));
        if let Some(token) = &self.api_token {
            builder = builder.header("x-api-key", token);
        }
        builder
    }

    fn transport(context: &str) -> impl FnOnce(reqwest::Error) -> Error + '_ {
        move |e| Error::Transport(format!("{context}: {e}"))
    }

    pub async fn register(&self, name: Option<&str>) -> Result<()> {
        self.request(reqwest::Method::POST, "/api/v2/workers/register")
            .json(&serde_json::json!({ "id": self.worker_id, "name": name }))
            .send()
            .await
            .map_err(Self::transport("register"))?
            .error_for_status()
            .map_err(Self::transport("register"))?;
        Ok(())
    }

    pub async fn heartbeat(&self) -> Result<()> {
        self.request(reqwest::Method::POST, "/api/v2/workers/heartbeat")
            .json(&serde_json::json!({ "worker_id": self.worker_id }))
            .send()
            .await
            .map_err(Self::transport("heartbeat"))?
            .error_for_status()
            .map_err(Self::transport("heartbeat"))?;
        Ok(())
    }

    /// `None` is the manager's typed no-work signal (204).
    pub async fn claim(&self) -> Result<Option<ClaimedTask>> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/api/v2/workers/{}/claim", self.worker_id),
            )
            .send()
            .await
            .map_err(Self::transport("claim"))?
            .error_for_status()
            .map_err(Self::transport("claim"))?;
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let task = response
            .json::<ClaimedTask>()
            .await
            .map_err(Self::transport("claim"))?;
        Ok(Some(task))
    }

    pub async fn submit_results(
        &self,
        parent_job_id: Uuid,
        task_id: &str,
        places: Vec<Place>,
    ) -> Result<()> {
        self.request(
            reqwest::Method::POST,
            &format!("/api/v2/jobs/{parent_job_id}/results"),
        )
        .json(&ResultSubmissionBody {
            task_id: Some(task_id.to_string()),
            places,
        })
        .send()
        .await
        .map_err(Self::transport("submit results"))?
        .error_for_status()
        .map_err(Self::transport("submit results"))?;
        Ok(())
    }

    pub async fn complete(&self) -> Result<()> {
        self.lifecycle("complete", None).await
    }

    pub async fn fail(&self, message: &str) -> Result<()> {
        self.lifecycle("fail", Some(message)).await
    }

    pub async fn release(&self) -> Result<()> {
        self.lifecycle("release", None).await
    }

    async fn lifecycle(&self, action: &str, message: Option<&str>) -> Result<()> {
        let mut builder = self.request(
            reqwest::Method::POST,
            &format!("/api/v2/workers/{}/{action}", self.worker_id),
        );
        if let Some(message) = message {
            builder = builder.json(&serde_json::json!({ "message": message }));
        }
        builder
            .send()
            .await
            .map_err(Self::transport(action))?
            .error_for_status()
            .map_err(Self::transport(action))?;
        Ok(())
    }
}

/// Serialized form of the manager's result-submission payload; the
/// service-side type is deserialize-only because it is inbound there.
#[derive(serde::Serialize)]
struct ResultSubmissionBody {
    task_id: Option<String>,
    places: Vec<Place>,
}

/// Run the worker until the token fires.
pub async fn run(
    config: WorkerConfig,
    executor: Arc<dyn Executor>,
    shutdown: CancellationToken,
) -> Result<()> {
    let client = Arc::new(ManagerClient::new(&config));
    client.register(config.name.as_deref()).await?;
    info!(worker_id = %config.worker_id, manager = %config.manager_url, "worker registered");

    let heartbeat = {
        let client = client.clone();
        let cancel = shutdown.clone();
        let interval = config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = client.heartbeat().await {
                            warn!(error = %e, "heartbeat failed");
                        }
                    }
                }
            }
        })
    };

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let task = match client.claim().await {
            Ok(Some(task)) => task,
            Ok(None) => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(config.poll_interval) => continue,
                }
            }
            Err(e) => {
                warn!(error = %e, "claim failed, backing off");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(config.poll_interval) => continue,
                }
            }
        };

        info!(task_id = %task.task_id, "executing task");
        match executor.execute(&task).await {
            Ok(places) => {
                if let Some(parent_job_id) = task.parent_job_id {
                    if let Err(e) = client
                        .submit_results(parent_job_id, &task.task_id, places)
                        .await
                    {
                        error!(task_id = %task.task_id, error = %e, "result submission failed");
                        let _ = client.release().await;
                        continue;
                    }
                }
                if let Err(e) = client.complete().await {
                    error!(task_id = %task.task_id, error = %e, "completion failed");
                }
            }
            Err(e) => {
                warn!(task_id = %task.task_id, error = %e, "task execution failed");
                if let Err(fail_err) = client.fail(&e.to_string()).await {
                    error!(task_id = %task.task_id, error = %fail_err, "failure report failed");
                }
            }
        }
    }

    shutdown.cancel();
    let _ = heartbeat.await;
    info!(worker_id = %config.worker_id, "worker stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_worker_id_is_host_derived() {
        let id = default_worker_id();
        let (host, suffix) = id.rsplit_once('-').unwrap();
        assert!(!host.is_empty());
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn worker_ids_are_unique_per_process() {
        assert_ne!(default_worker_id(), default_worker_id());
    }
}
