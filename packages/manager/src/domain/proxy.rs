//! Proxy source records. The refresh crawler is an external collaborator;
//! only the CRUD contract lives here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    #[default]
    Pending,
    Fetched,
    Failed,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Pending => "pending",
            FetchStatus::Fetched => "fetched",
            FetchStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for FetchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FetchStatus::Pending),
            "fetched" => Ok(FetchStatus::Fetched),
            "failed" => Ok(FetchStatus::Failed),
            other => Err(format!("unknown fetch status {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySource {
    pub id: Uuid,
    pub url: String,
    pub active: bool,
    pub fetch_status: FetchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProxySource {
    pub fn new(url: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            url,
            active: true,
            fetch_status: FetchStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
