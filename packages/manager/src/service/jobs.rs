//! Job lifecycle service.
//!
//! Every status change goes through the transition predicates; a failing
//! predicate returns a typed error and leaves the persisted row untouched.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::common::{Error, Result};
use crate::domain::{Job, JobConfig, JobProgress, JobStatus};
use crate::storage::jobs::JobFilter;
use crate::storage::JobRepository;

/// Payload accepted by job creation.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreateJobRequest {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(flatten)]
    pub config: JobConfig,
}

#[derive(Clone)]
pub struct JobService {
    jobs: JobRepository,
}

impl JobService {
    pub fn new(jobs: JobRepository) -> Self {
        Self { jobs }
    }

    pub async fn create(&self, request: CreateJobRequest) -> Result<Job> {
        if request.config.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(Error::InvalidInput(
                "at least one keyword is required".to_string(),
            ));
        }
        if request.name.trim().is_empty() {
            return Err(Error::InvalidInput("job name is required".to_string()));
        }

        let job = Job::new(request.name, request.priority, request.config);
        self.jobs.create(&job).await?;
        info!(job_id = %job.id, name = %job.name, "job created");
        Ok(job)
    }

    pub async fn get(&self, id: Uuid) -> Result<Job> {
        self.jobs.get(id).await
    }

    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        self.jobs.list(filter).await
    }

    pub async fn pause(&self, id: Uuid) -> Result<Job> {
        self.transition(id, JobStatus::Paused, "pausable", JobStatus::can_pause)
            .await
    }

    /// Resuming returns the job to `pending` so the dispatcher can pick it
    /// back up.
    pub async fn resume(&self, id: Uuid) -> Result<Job> {
        self.transition(id, JobStatus::Pending, "resumable", JobStatus::can_resume)
            .await
    }

    pub async fn cancel(&self, id: Uuid) -> Result<Job> {
        self.transition(id, JobStatus::Cancelled, "cancellable", JobStatus::can_cancel)
            .await
    }

    async fn transition(
        &self,
        id: Uuid,
        to: JobStatus,
        action: &'static str,
        allowed: fn(JobStatus) -> bool,
    ) -> Result<Job> {
        let job = self.jobs.get(id).await?;
        if !allowed(job.status) {
            return Err(Error::InvalidTransition {
                status: job.status.to_string(),
                action,
            });
        }
        self.jobs.update_status(id, to).await?;
        info!(job_id = %id, from = %job.status, to = %to, "job transitioned");
        self.jobs.get(id).await
    }

    /// Results are deleted explicitly before the job row; child tasks go
    /// with the parent via the cascade.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let job = self.jobs.get(id).await?;
        if !job.status.can_delete() {
            return Err(Error::InvalidTransition {
                status: job.status.to_string(),
                action: "deletable",
            });
        }
        let removed = self.jobs.delete_with_results(id).await?;
        info!(job_id = %id, results_removed = removed, "job deleted");
        Ok(())
    }

    pub async fn update_progress(&self, id: Uuid, mut progress: JobProgress) -> Result<Job> {
        progress.recompute();
        self.jobs.update_progress(id, &progress).await?;
        self.jobs.get(id).await
    }

    pub async fn complete(&self, id: Uuid) -> Result<Job> {
        let job = self.jobs.get(id).await?;
        if !job.status.can_transition(JobStatus::Completed) {
            return Err(Error::InvalidTransition {
                status: job.status.to_string(),
                action: "completable",
            });
        }
        self.jobs.mark_completed(id, Utc::now()).await?;
        self.jobs.get(id).await
    }

    pub async fn fail(&self, id: Uuid, message: &str) -> Result<Job> {
        let job = self.jobs.get(id).await?;
        if !job.status.can_transition(JobStatus::Failed) {
            return Err(Error::InvalidTransition {
                status: job.status.to_string(),
                action: "failable",
            });
        }
        self.jobs.mark_failed(id, message).await?;
        self.jobs.get(id).await
    }
}
