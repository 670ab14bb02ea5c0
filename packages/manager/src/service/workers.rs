//! Worker registry: register/heartbeat/unregister, the claim protocol,
//! and the stale-worker liveness sweep.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::common::{Error, Result};
use crate::domain::{JobStatus, Task, TaskStatus, Worker, WorkerStatus};
use crate::storage::{JobRepository, TaskRepository, WorkerRepository};

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub liveness_window: Duration,
    pub sweep_interval: Duration,
    /// When set, a worker-reported task failure also fails the parent job.
    pub failure_fails_parent: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            liveness_window: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
            failure_fails_parent: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct WorkerStatsSnapshot {
    pub total: i64,
    pub online: i64,
    pub busy: i64,
    pub offline: i64,
}

#[derive(Clone)]
pub struct WorkerRegistry {
    workers: WorkerRepository,
    tasks: TaskRepository,
    jobs: JobRepository,
    config: RegistryConfig,
}

impl WorkerRegistry {
    pub fn new(
        workers: WorkerRepository,
        tasks: TaskRepository,
        jobs: JobRepository,
        config: RegistryConfig,
    ) -> Self {
        Self {
            workers,
            tasks,
            jobs,
            config,
        }
    }

    pub fn liveness_window(&self) -> Duration {
        self.config.liveness_window
    }

    pub async fn register(&self, id: String, name: Option<String>) -> Result<Worker> {
        let worker = Worker::register(id, name);
        self.workers.upsert(&worker).await?;
        info!(worker_id = %worker.id, "worker registered");
        self.workers.get(&worker.id).await
    }

    /// Record a heartbeat; an offline worker flips back to online, or busy
    /// if it still holds a claim.
    pub async fn heartbeat(&self, id: &str) -> Result<Worker> {
        let worker = self.workers.get(id).await?;
        let status = if worker.current_job_id.is_some() {
            WorkerStatus::Busy
        } else if worker.status == WorkerStatus::Offline {
            WorkerStatus::Online
        } else {
            worker.status
        };
        self.workers.heartbeat(id, Utc::now(), status).await?;
        self.workers.get(id).await
    }

    pub async fn get(&self, id: &str) -> Result<Worker> {
        let mut worker = self.workers.get(id).await?;
        worker.status = worker.effective_status(Utc::now(), self.config.liveness_window);
        Ok(worker)
    }

    pub async fn list(&self) -> Result<Vec<Worker>> {
        let now = Utc::now();
        let mut workers = self.workers.list().await?;
        for worker in &mut workers {
            worker.status = worker.effective_status(now, self.config.liveness_window);
        }
        Ok(workers)
    }

    pub async fn unregister(&self, id: &str) -> Result<()> {
        // Any held claim returns to the pool with the row.
        self.workers.delete(id).await?;
        info!(worker_id = %id, "worker unregistered");
        Ok(())
    }

    /// Atomically claim the next task in priority order. `Ok(None)` is the
    /// typed no-work signal, not an error.
    pub async fn claim(&self, worker_id: &str) -> Result<Option<Task>> {
        let worker = self.workers.get(worker_id).await?;
        if let Some(held) = &worker.current_job_id {
            return Err(Error::Conflict(format!(
                "worker {worker_id} already holds task {held}"
            )));
        }

        let Some(task) = self.tasks.claim_next(worker_id).await? else {
            return Ok(None);
        };

        // First claim moves a queued parent into running.
        if let Some(parent_id) = task.parent_job_id {
            if let Ok(parent) = self.jobs.get(parent_id).await {
                if parent.status == JobStatus::Queued {
                    self.jobs.mark_started(parent_id).await?;
                }
            }
        }

        info!(worker_id, task_id = %task.id, "task claimed");
        Ok(Some(task))
    }

    pub async fn complete(&self, worker_id: &str) -> Result<Worker> {
        let worker = self.workers.get(worker_id).await?;
        if worker.current_job_id.is_none() {
            return Err(Error::Conflict(format!(
                "worker {worker_id} holds no claim to complete"
            )));
        }
        self.workers.clear_claim(worker_id, true).await?;
        self.workers.get(worker_id).await
    }

    pub async fn fail(&self, worker_id: &str, message: &str) -> Result<Worker> {
        let worker = self.workers.get(worker_id).await?;
        let Some(task_id) = worker.current_job_id.clone() else {
            return Err(Error::Conflict(format!(
                "worker {worker_id} holds no claim to fail"
            )));
        };

        self.tasks.update_status(&task_id, TaskStatus::Failed).await?;
        let task = self.tasks.get(&task_id).await?;
        if let Some(parent_id) = task.parent_job_id {
            self.jobs.add_failed_places(parent_id, 1).await?;
            if self.config.failure_fails_parent {
                let parent = self.jobs.get(parent_id).await?;
                if parent.status.can_transition(JobStatus::Failed) {
                    self.jobs.mark_failed(parent_id, message).await?;
                }
            }
        }

        warn!(worker_id, task_id = %task_id, message, "task failed by worker");
        self.workers.clear_claim(worker_id, false).await?;
        self.workers.get(worker_id).await
    }

    /// Return the claim to the pool without scoring.
    pub async fn release(&self, worker_id: &str) -> Result<Worker> {
        let worker = self.workers.get(worker_id).await?;
        if worker.current_job_id.is_none() {
            return Err(Error::Conflict(format!(
                "worker {worker_id} holds no claim to release"
            )));
        }
        self.workers.clear_claim(worker_id, false).await?;
        self.workers.get(worker_id).await
    }

    pub async fn stats(&self) -> Result<WorkerStatsSnapshot> {
        let workers = self.list().await?;
        let mut snapshot = WorkerStatsSnapshot {
            total: workers.len() as i64,
            online: 0,
            busy: 0,
            offline: 0,
        };
        for worker in workers {
            match worker.status {
                WorkerStatus::Online => snapshot.online += 1,
                WorkerStatus::Busy => snapshot.busy += 1,
                WorkerStatus::Offline => snapshot.offline += 1,
            }
        }
        Ok(snapshot)
    }

    /// One sweep pass: mark silent workers offline and release their
    /// claims. Returns how many were swept.
    pub async fn sweep(&self) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.liveness_window)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let stale = self.workers.stale(cutoff).await?;
        for worker in &stale {
            warn!(
                worker_id = %worker.id,
                last_heartbeat = %worker.last_heartbeat,
                claim = ?worker.current_job_id,
                "worker missed liveness window, marking offline"
            );
            self.workers.mark_offline(&worker.id).await?;
        }
        Ok(stale.len())
    }

    /// Periodic sweep loop; runs until the token fires.
    pub async fn run_sweeper(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.tick().await; // skip the immediate tick
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        warn!(error = %e, "liveness sweep failed");
                    }
                }
            }
        }
        info!("liveness sweeper stopped");
    }
}
