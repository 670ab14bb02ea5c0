//! Child task model — one scraping unit produced by job fan-out.
//!
//! Internally these are "gmaps jobs": the rows workers actually execute.
//! A null `parent_job_id` marks a CLI-originated legacy task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::{Error, Result};

/// Payload kind for place searches produced by the dispatcher.
pub const PAYLOAD_TYPE_SEARCH: &str = "search";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Persisted, waiting to be claimed.
    #[default]
    New,
    /// Finished and enqueued for result persistence.
    Queued,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::New => "new",
            TaskStatus::Queued => "queued",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(TaskStatus::New),
            "queued" => Ok(TaskStatus::Queued),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub priority: i32,
    pub payload_type: String,
    /// Opaque payload bytes; search tasks carry JSON-encoded [`SearchPayload`].
    pub payload: Vec<u8>,
    pub parent_job_id: Option<Uuid>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Build a search task carrying its parent's priority.
    pub fn search(parent_job_id: Uuid, priority: i32, payload: &SearchPayload) -> Result<Self> {
        let payload = serde_json::to_vec(payload)
            .map_err(|e| Error::InvalidInput(format!("encode search payload: {e}")))?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            priority,
            payload_type: PAYLOAD_TYPE_SEARCH.to_string(),
            payload,
            parent_job_id: Some(parent_job_id),
            status: TaskStatus::New,
            created_at: Utc::now(),
        })
    }

    pub fn search_payload(&self) -> Result<SearchPayload> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| Error::InvalidInput(format!("decode search payload: {e}")))
    }
}

/// Parameters a worker needs to run one place search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPayload {
    pub keyword: String,
    pub language: String,
    /// `"lat,lon"` or empty when the job has no geo center.
    pub coordinates: String,
    pub zoom: i32,
    pub radius: i32,
    pub depth: i32,
    pub fast_mode: bool,
    pub extract_emails: bool,
    pub max_time_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxies: Option<Vec<String>>,
}
