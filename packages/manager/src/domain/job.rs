//! Parent job model: configuration, aggregate progress, and the status
//! state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::geo::BoundingBox;

// ============================================================================
// Status machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Pending,
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Paused,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `to`.
    ///
    /// Terminal statuses never transition further; every allowedness check
    /// in the service layer goes through this single table.
    pub fn can_transition(self, to: JobStatus) -> bool {
        use JobStatus::*;
        match self {
            Pending => matches!(to, Queued | Cancelled | Failed),
            Queued => matches!(to, Running | Paused | Cancelled | Failed),
            Running => matches!(to, Paused | Completed | Failed | Cancelled),
            Paused => matches!(to, Pending | Cancelled),
            Completed | Failed | Cancelled => false,
        }
    }

    pub fn can_pause(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    pub fn can_resume(self) -> bool {
        self == JobStatus::Paused
    }

    pub fn can_cancel(self) -> bool {
        !self.is_terminal()
    }

    pub fn can_delete(self) -> bool {
        self != JobStatus::Running
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status {s:?}"))
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Configuration & progress
// ============================================================================

/// How a job covers its geographic area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoverageMode {
    /// Scrape around the configured center point only.
    #[default]
    Single,
    /// Expand the bounding box into a radius-stepped grid of points.
    Full,
}

/// Scraping parameters carried by a job and inherited by its child tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub keywords: Vec<String>,
    #[serde(default = "default_language")]
    pub language: String,
    /// Geo center; both zero means "not set".
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lon: f64,
    #[serde(default = "default_zoom")]
    pub zoom: i32,
    /// Search radius in meters.
    #[serde(default = "default_radius")]
    pub radius: i32,
    /// Review/scroll depth per place listing.
    #[serde(default = "default_depth")]
    pub depth: i32,
    #[serde(default)]
    pub fast_mode: bool,
    #[serde(default)]
    pub extract_emails: bool,
    /// Maximum runtime per task, seconds.
    #[serde(default)]
    pub max_time_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxies: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default)]
    pub coverage: CoverageMode,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_zoom() -> i32 {
    15
}

fn default_radius() -> i32 {
    10_000
}

fn default_depth() -> i32 {
    10
}

impl JobConfig {
    /// The configured center, or `None` when lat and lon are both zero.
    pub fn geo_center(&self) -> Option<(f64, f64)> {
        if self.lat == 0.0 && self.lon == 0.0 {
            None
        } else {
            Some((self.lat, self.lon))
        }
    }
}

/// Aggregate progress over a job's places.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub total_places: i64,
    pub scraped_places: i64,
    pub failed_places: i64,
    pub percentage: i64,
}

impl JobProgress {
    /// `⌊100·scraped/max(total,1)⌋`
    pub fn computed_percentage(&self) -> i64 {
        100 * self.scraped_places / self.total_places.max(1)
    }

    pub fn recompute(&mut self) {
        self.percentage = self.computed_percentage();
    }
}

// ============================================================================
// Job model
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub priority: i32,
    pub config: JobConfig,
    pub progress: JobProgress,
    pub status: JobStatus,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub total_tasks: i64,
    pub completed_tasks: i64,
}

impl Job {
    /// Construct a fresh job in `pending` with zeroed counters.
    pub fn new(name: String, priority: i32, config: JobConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            priority,
            config,
            progress: JobProgress::default(),
            status: JobStatus::Pending,
            worker_id: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            error_message: None,
            total_tasks: 0,
            completed_tasks: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> JobConfig {
        JobConfig {
            keywords: vec!["pizza".to_string()],
            language: "en".to_string(),
            lat: 0.0,
            lon: 0.0,
            zoom: 15,
            radius: 10_000,
            depth: 10,
            fast_mode: false,
            extract_emails: true,
            max_time_seconds: 0,
            proxies: None,
            bounding_box: None,
            coverage: CoverageMode::Single,
        }
    }

    #[test]
    fn new_job_starts_pending_with_zero_counters() {
        let job = Job::new("test".to_string(), 0, sample_config());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.total_tasks, 0);
        assert_eq!(job.completed_tasks, 0);
        assert_eq!(job.progress.percentage, 0);
    }

    #[test]
    fn transition_table_allows_expected_edges() {
        use JobStatus::*;
        assert!(Pending.can_transition(Queued));
        assert!(Pending.can_transition(Cancelled));
        assert!(Pending.can_transition(Failed));
        assert!(!Pending.can_transition(Running));

        assert!(Queued.can_transition(Running));
        assert!(Queued.can_transition(Paused));
        assert!(!Queued.can_transition(Completed));

        assert!(Running.can_transition(Completed));
        assert!(Running.can_transition(Paused));
        assert!(Running.can_transition(Cancelled));
        assert!(!Running.can_transition(Queued));

        assert!(Paused.can_transition(Pending));
        assert!(Paused.can_transition(Cancelled));
        assert!(!Paused.can_transition(Running));
    }

    #[test]
    fn terminal_statuses_never_transition() {
        use JobStatus::*;
        for terminal in [Completed, Failed, Cancelled] {
            for target in JobStatus::ALL {
                assert!(!terminal.can_transition(target));
            }
        }
    }

    #[test]
    fn predicates_match_status_sets() {
        use JobStatus::*;
        assert!(Queued.can_pause());
        assert!(Running.can_pause());
        assert!(!Paused.can_pause());
        assert!(Paused.can_resume());
        assert!(!Running.can_resume());
        assert!(Pending.can_cancel());
        assert!(!Completed.can_cancel());
        assert!(!Running.can_delete());
        assert!(Completed.can_delete());
    }

    #[test]
    fn percentage_floors_and_handles_zero_total() {
        let mut progress = JobProgress {
            total_places: 3,
            scraped_places: 2,
            failed_places: 0,
            percentage: 0,
        };
        progress.recompute();
        assert_eq!(progress.percentage, 66);

        let empty = JobProgress::default();
        assert_eq!(empty.computed_percentage(), 0);
    }

    #[test]
    fn zero_coordinates_mean_unset_center() {
        let mut config = sample_config();
        assert!(config.geo_center().is_none());
        config.lat = 40.7128;
        config.lon = -74.006;
        assert_eq!(config.geo_center(), Some((40.7128, -74.006)));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<JobStatus>().is_err());
    }
}
