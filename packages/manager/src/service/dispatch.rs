//! Task dispatcher: expands a pending job into child tasks and publishes
//! them with parent-derived priority.

use std::sync::Arc;

use tracing::{info, warn};

use crate::broker::{PriorityBroker, TaskMessage};
use crate::common::{Error, Result};
use crate::domain::geo::{format_coordinates, grid_points};
use crate::domain::{CoverageMode, Job, SearchPayload, Task};
use crate::storage::{JobRepository, TaskRepository};

#[derive(Clone)]
pub struct TaskDispatcher {
    jobs: JobRepository,
    tasks: TaskRepository,
    broker: Arc<PriorityBroker>,
}

impl TaskDispatcher {
    pub fn new(jobs: JobRepository, tasks: TaskRepository, broker: Arc<PriorityBroker>) -> Self {
        Self { jobs, tasks, broker }
    }

    /// Fan a pending job out into one task per keyword × geo point,
    /// persist and publish each, then seed the parent's totals and flip it
    /// to `queued`.
    ///
    /// A publish failure mid-batch aborts here and leaves the persisted
    /// tasks in place; startup reconciliation re-publishes them.
    pub async fn dispatch(&self, job: &Job) -> Result<usize> {
        if !job.status.can_transition(crate::domain::JobStatus::Queued) {
            return Err(Error::InvalidTransition {
                status: job.status.to_string(),
                action: "dispatchable",
            });
        }
        let keywords: Vec<&str> = job
            .config
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(Error::InvalidInput(
                "at least one keyword is required".to_string(),
            ));
        }

        let points = self.geo_points(job);
        let mut published = 0usize;
        for keyword in &keywords {
            for point in &points {
                let coordinates = match point {
                    Some((lat, lon)) => format_coordinates(*lat, *lon),
                    None => String::new(),
                };
                let payload = SearchPayload {
                    keyword: (*keyword).to_string(),
                    language: job.config.language.clone(),
                    coordinates,
                    zoom: job.config.zoom,
                    radius: job.config.radius,
                    depth: job.config.depth,
                    fast_mode: job.config.fast_mode,
                    extract_emails: job.config.extract_emails,
                    max_time_seconds: job.config.max_time_seconds,
                    proxies: job.config.proxies.clone(),
                };
                let task = Task::search(job.id, job.priority, &payload)?;
                self.tasks.create(&task).await?;
                self.broker.publish(&TaskMessage {
                    job_id: task.id.clone(),
                    priority: task.priority,
                    kind: task.payload_type.clone(),
                })?;
                published += 1;
            }
        }

        self.jobs.mark_dispatched(job.id, published as i64).await?;
        info!(
            job_id = %job.id,
            tasks = published,
            keywords = keywords.len(),
            points = points.len(),
            "job dispatched"
        );
        Ok(published)
    }

    /// Geo strategy: single-point coverage uses the configured center (or
    /// no point at all when unset); full coverage expands the bounding box
    /// into a grid.
    fn geo_points(&self, job: &Job) -> Vec<Option<(f64, f64)>> {
        match (job.config.coverage, &job.config.bounding_box) {
            (CoverageMode::Full, Some(bbox)) => grid_points(bbox, job.config.radius)
                .into_iter()
                .map(Some)
                .collect(),
            (CoverageMode::Full, None) => {
                warn!(job_id = %job.id, "full coverage requested without bounding box");
                vec![job.config.geo_center()]
            }
            (CoverageMode::Single, _) => vec![job.config.geo_center()],
        }
    }
}

/// Manager-side broker handler.
///
/// Remote workers pull work through the claim endpoints; the manager's
/// consumer acknowledges a delivery once its task row is persisted and
/// claimable. A message whose task row is missing (deleted parent, lost
/// write) goes through the retry protocol and ends up dead-lettered for
/// inspection.
pub struct PersistedTaskHandler {
    tasks: TaskRepository,
}

impl PersistedTaskHandler {
    pub fn new(tasks: TaskRepository) -> Self {
        Self { tasks }
    }
}

#[async_trait::async_trait]
impl crate::broker::MessageHandler for PersistedTaskHandler {
    async fn handle(&self, message: &TaskMessage) -> anyhow::Result<()> {
        self.tasks
            .get(&message.job_id)
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("task {} not persisted: {e}", message.job_id))
    }
}
