//! Startup reconciliation.
//!
//! Work interrupted by a manager restart is recovered here: tasks that
//! were persisted but never picked up are re-published, and workers whose
//! last heartbeat precedes the restart are treated as gone.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::broker::{PriorityBroker, TaskMessage};
use crate::common::Result;
use crate::storage::{TaskRepository, WorkerRepository};

/// Re-publish every `new` task whose parent is `queued` or `running`.
/// Republishing an already-delivered task is harmless: delivery is
/// at-least-once and completion is idempotent.
pub async fn republish_pending_tasks(
    tasks: &TaskRepository,
    broker: &Arc<PriorityBroker>,
) -> Result<usize> {
    let pending = tasks.list_new_for_republish(&["queued", "running"]).await?;
    let mut published = 0;
    for task in &pending {
        match broker.publish(&TaskMessage {
            job_id: task.id.clone(),
            priority: task.priority,
            kind: task.payload_type.clone(),
        }) {
            Ok(()) => published += 1,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "startup republish failed");
            }
        }
    }
    if published > 0 {
        info!(published, "republished unstarted tasks");
    }
    Ok(published)
}

/// Every worker silent since before `startup` is set offline and its
/// claim released; their sessions did not survive the restart.
pub async fn offline_stale_workers(
    workers: &WorkerRepository,
    startup: DateTime<Utc>,
) -> Result<usize> {
    let stale = workers.stale(startup).await?;
    for worker in &stale {
        workers.mark_offline(&worker.id).await?;
    }
    if !stale.is_empty() {
        info!(count = stale.len(), "marked pre-restart workers offline");
    }
    Ok(stale.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::QUEUE_DEFAULT;
    use crate::domain::{CoverageMode, Job, JobConfig, JobStatus, SearchPayload, Task, Worker};
    use crate::storage::db::memory_pool;
    use crate::storage::{migrate, JobRepository};

    fn config() -> JobConfig {
        JobConfig {
            keywords: vec!["kw".to_string()],
            language: "en".to_string(),
            lat: 0.0,
            lon: 0.0,
            zoom: 15,
            radius: 10_000,
            depth: 10,
            fast_mode: false,
            extract_emails: false,
            max_time_seconds: 0,
            proxies: None,
            bounding_box: None,
            coverage: CoverageMode::Single,
        }
    }

    fn payload() -> SearchPayload {
        SearchPayload {
            keyword: "kw".to_string(),
            language: "en".to_string(),
            coordinates: String::new(),
            zoom: 15,
            radius: 10_000,
            depth: 10,
            fast_mode: false,
            extract_emails: false,
            max_time_seconds: 0,
            proxies: None,
        }
    }

    #[tokio::test]
    async fn republishes_only_tasks_of_live_parents() {
        let pool = memory_pool().await;
        migrate::run(&pool).await.unwrap();
        let jobs = JobRepository::new(pool.clone());
        let tasks = TaskRepository::new(pool);
        let broker = Arc::new(PriorityBroker::new(64));

        let live = Job::new("live".to_string(), 0, config());
        jobs.create(&live).await.unwrap();
        jobs.update_status(live.id, JobStatus::Queued).await.unwrap();
        tasks
            .create(&Task::search(live.id, 0, &payload()).unwrap())
            .await
            .unwrap();

        let paused = Job::new("paused".to_string(), 0, config());
        jobs.create(&paused).await.unwrap();
        jobs.update_status(paused.id, JobStatus::Paused).await.unwrap();
        tasks
            .create(&Task::search(paused.id, 0, &payload()).unwrap())
            .await
            .unwrap();

        let published = republish_pending_tasks(&tasks, &broker).await.unwrap();
        assert_eq!(published, 1);
        assert_eq!(broker.queue_depth(QUEUE_DEFAULT).unwrap(), 1);
    }

    #[tokio::test]
    async fn offlines_workers_from_before_startup() {
        let pool = memory_pool().await;
        migrate::run(&pool).await.unwrap();
        let workers = WorkerRepository::new(pool);

        let mut old = Worker::register("old".to_string(), None);
        old.last_heartbeat = Utc::now() - chrono::Duration::seconds(10);
        old.current_job_id = Some("t1".to_string());
        workers.upsert(&old).await.unwrap();

        let swept = offline_stale_workers(&workers, Utc::now()).await.unwrap();
        assert_eq!(swept, 1);
        let worker = workers.get("old").await.unwrap();
        assert_eq!(worker.status.as_str(), "offline");
        assert!(worker.current_job_id.is_none());
    }
}
