//! Result ingestion pipeline.
//!
//! Submissions mark their child task `queued` immediately, pass every
//! email field through the deny list, and buffer the places for a batched
//! conflict-skip insert (50 entries or 60 seconds, whichever first).
//! After a flush the parent-progress reconciliation runs set-based; its
//! failure is logged and swallowed because the insert has already
//! committed.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::common::{Error, Result};
use crate::domain::email::filter_emails;
use crate::domain::{Place, TaskStatus};
use crate::storage::{JobRepository, ResultRepository, TaskRepository};

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub buffer_size: usize,
    pub flush_interval: Duration,
    pub sync_parent_progress: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            buffer_size: 50,
            flush_interval: Duration::from_secs(60),
            sync_parent_progress: true,
        }
    }
}

/// Worker-submitted batch for one finished task.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultSubmission {
    /// The child task these places came from; legacy CLI submissions may
    /// omit it.
    #[serde(default)]
    pub task_id: Option<String>,
    pub places: Vec<Place>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct IngestOutcome {
    pub accepted: usize,
    pub emails_filtered: usize,
}

struct Entry {
    job_id: Option<Uuid>,
    place: Place,
}

#[derive(Clone)]
pub struct ResultIngester {
    results: ResultRepository,
    tasks: TaskRepository,
    jobs: JobRepository,
    config: IngestConfig,
    tx: mpsc::Sender<Entry>,
    rx: Arc<tokio::sync::Mutex<Option<mpsc::Receiver<Entry>>>>,
}

impl ResultIngester {
    pub fn new(
        results: ResultRepository,
        tasks: TaskRepository,
        jobs: JobRepository,
        config: IngestConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.buffer_size.max(1) * 4);
        Self {
            results,
            tasks,
            jobs,
            config,
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(Some(rx))),
        }
    }

    /// Accept one submission for a parent job: reconcile the task to
    /// `queued`, filter emails, and buffer the places.
    pub async fn submit(
        &self,
        parent_job_id: Uuid,
        submission: ResultSubmission,
    ) -> Result<IngestOutcome> {
        // The parent must exist before anything is buffered against it.
        self.jobs.get(parent_job_id).await?;

        if let Some(task_id) = &submission.task_id {
            let task = self.tasks.get(task_id).await?;
            if task.parent_job_id != Some(parent_job_id) {
                return Err(Error::Conflict(format!(
                    "task {task_id} does not belong to job {parent_job_id}"
                )));
            }
            self.tasks.update_status(task_id, TaskStatus::Queued).await?;
        }

        let mut emails_filtered = 0;
        let accepted = submission.places.len();
        for mut place in submission.places {
            let before = place.emails.len();
            place.emails = filter_emails(place.emails);
            emails_filtered += before - place.emails.len();
            self.tx
                .send(Entry {
                    job_id: Some(parent_job_id),
                    place,
                })
                .await
                .map_err(|_| Error::DependencyDown("result buffer closed".to_string()))?;
        }

        // Direct-call variant of the reconciliation so completion does not
        // wait for the next flush; best-effort like the flush-time sync.
        if self.config.sync_parent_progress {
            if let Err(e) = self.update_parent_progress(parent_job_id).await {
                warn!(job_id = %parent_job_id, error = %e, "parent progress sync failed");
            }
        }

        Ok(IngestOutcome {
            accepted,
            emails_filtered,
        })
    }

    /// Single-parent reconciliation using the same set-based rule as the
    /// flush-time sync.
    pub async fn update_parent_progress(&self, parent_job_id: Uuid) -> Result<()> {
        let completed = self.jobs.reconcile_parents(Some(parent_job_id)).await?;
        if completed > 0 {
            info!(job_id = %parent_job_id, "job completed");
        }
        Ok(())
    }

    /// Flush loop: runs until the token fires, then drains the buffer.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut rx = self
            .rx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Conflict("ingester already running".to_string()))?;

        let mut buffer: Vec<Entry> = Vec::with_capacity(self.config.buffer_size);
        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.tick().await; // the first tick completes immediately

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    // Drain whatever is already buffered in the channel.
                    while let Ok(entry) = rx.try_recv() {
                        buffer.push(entry);
                    }
                    self.flush(&mut buffer).await;
                    break;
                }
                _ = ticker.tick() => {
                    self.flush(&mut buffer).await;
                }
                entry = rx.recv() => match entry {
                    Some(entry) => {
                        buffer.push(entry);
                        if buffer.len() >= self.config.buffer_size {
                            self.flush(&mut buffer).await;
                            ticker.reset();
                        }
                    }
                    None => {
                        self.flush(&mut buffer).await;
                        break;
                    }
                },
            }
        }

        info!("result ingester stopped");
        Ok(())
    }

    /// One batched insert per parent job, then the set-based progress sync.
    async fn flush(&self, buffer: &mut Vec<Entry>) {
        if buffer.is_empty() {
            return;
        }
        let entries = std::mem::take(buffer);
        let count = entries.len();

        // Group while preserving arrival order within each parent.
        let mut groups: Vec<(Option<Uuid>, Vec<Place>)> = Vec::new();
        for entry in entries {
            match groups.iter_mut().find(|(job_id, _)| *job_id == entry.job_id) {
                Some((_, places)) => places.push(entry.place),
                None => groups.push((entry.job_id, vec![entry.place])),
            }
        }

        let mut written = 0;
        for (job_id, places) in groups {
            match self.results.insert_batch(job_id, &places).await {
                Ok(n) => written += n,
                Err(e) => {
                    warn!(error = %e, "result batch insert failed, dropping batch");
                }
            }
        }
        debug!(buffered = count, written, "results flushed");

        if self.config.sync_parent_progress {
            if let Err(e) = self.jobs.reconcile_parents(None).await {
                // The insert has already committed; sync is best-effort.
                warn!(error = %e, "parent progress sync failed");
            }
        }
    }
}
