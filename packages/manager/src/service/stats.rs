//! Point-in-time dashboard stats, composed from three aggregate queries.

use std::time::Duration;

use serde::Serialize;

use crate::common::Result;
use crate::storage::stats::{JobCounts, PlaceCounts, WorkerCounts};
use crate::storage::StatsRepository;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DashboardStats {
    pub jobs: JobCounts,
    pub workers: WorkerCounts,
    pub places: PlaceCounts,
}

#[derive(Clone)]
pub struct StatsService {
    stats: StatsRepository,
    liveness_window: Duration,
}

impl StatsService {
    pub fn new(stats: StatsRepository, liveness_window: Duration) -> Self {
        Self {
            stats,
            liveness_window,
        }
    }

    /// No caching: every call reflects the store at this instant.
    pub async fn dashboard(&self) -> Result<DashboardStats> {
        Ok(DashboardStats {
            jobs: self.stats.job_counts().await?,
            workers: self.stats.worker_counts(self.liveness_window).await?,
            places: self.stats.place_counts().await?,
        })
    }

    pub async fn job_counts(&self) -> Result<JobCounts> {
        self.stats.job_counts().await
    }
}
