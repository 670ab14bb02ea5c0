//! Worker model and liveness classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Online,
    Busy,
    Offline,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Online => "online",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Offline => "offline",
        }
    }
}

impl std::str::FromStr for WorkerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(WorkerStatus::Online),
            "busy" => Ok(WorkerStatus::Busy),
            "offline" => Ok(WorkerStatus::Offline),
            other => Err(format!("unknown worker status {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    /// Host-derived identifier, e.g. `scraper-03-9f2a41bc`.
    pub id: String,
    pub name: Option<String>,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
    /// Claimed child task, if any. `status = busy` implies this is set.
    pub current_job_id: Option<String>,
    pub jobs_completed: i64,
    pub uptime_seconds: i64,
    pub registered_at: DateTime<Utc>,
}

impl Worker {
    pub fn register(id: String, name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            status: WorkerStatus::Online,
            last_heartbeat: now,
            current_job_id: None,
            jobs_completed: 0,
            uptime_seconds: 0,
            registered_at: now,
        }
    }

    /// Effective status at `now`: the stored field may lag, so a worker
    /// silent past the liveness window reads as offline.
    pub fn effective_status(&self, now: DateTime<Utc>, liveness_window: Duration) -> WorkerStatus {
        let silence = now
            .signed_duration_since(self.last_heartbeat)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if silence > liveness_window {
            WorkerStatus::Offline
        } else {
            self.status
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn fresh_worker_is_online() {
        let worker = Worker::register("w1".to_string(), None);
        assert_eq!(worker.status, WorkerStatus::Online);
        assert!(worker.current_job_id.is_none());
    }

    #[test]
    fn stale_heartbeat_reads_as_offline() {
        let mut worker = Worker::register("w1".to_string(), None);
        let now = Utc::now();
        worker.last_heartbeat = now - ChronoDuration::seconds(120);
        assert_eq!(
            worker.effective_status(now, Duration::from_secs(60)),
            WorkerStatus::Offline
        );
    }

    #[test]
    fn recent_heartbeat_keeps_stored_status() {
        let mut worker = Worker::register("w1".to_string(), None);
        worker.status = WorkerStatus::Busy;
        worker.current_job_id = Some("t1".to_string());
        assert_eq!(
            worker.effective_status(Utc::now(), Duration::from_secs(60)),
            WorkerStatus::Busy
        );
    }
}
