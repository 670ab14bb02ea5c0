//! Aggregate queries backing the dashboard stats endpoint.

use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::common::time::format_timestamp;
use crate::common::{Error, Result};

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct JobCounts {
    pub total: i64,
    pub pending: i64,
    pub queued: i64,
    pub running: i64,
    pub paused: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WorkerCounts {
    pub total: i64,
    pub online: i64,
    pub busy: i64,
    pub idle: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PlaceCounts {
    pub total_scraped: i64,
    pub today: i64,
    pub total_emails: i64,
    pub rate_per_hour: i64,
}

#[derive(Clone)]
pub struct StatsRepository {
    pool: SqlitePool,
}

impl StatsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn job_counts(&self) -> Result<JobCounts> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(status = 'pending'), 0) AS pending,
                   COALESCE(SUM(status = 'queued'), 0) AS queued,
                   COALESCE(SUM(status = 'running'), 0) AS running,
                   COALESCE(SUM(status = 'paused'), 0) AS paused,
                   COALESCE(SUM(status = 'completed'), 0) AS completed,
                   COALESCE(SUM(status = 'failed'), 0) AS failed,
                   COALESCE(SUM(status = 'cancelled'), 0) AS cancelled
            FROM jobs_queue
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::db("job counts"))?;
        Ok(JobCounts {
            total: row.get("total"),
            pending: row.get("pending"),
            queued: row.get("queued"),
            running: row.get("running"),
            paused: row.get("paused"),
            completed: row.get("completed"),
            failed: row.get("failed"),
            cancelled: row.get("cancelled"),
        })
    }

    /// Liveness-aware worker counts: a worker with no heartbeat inside the
    /// window counts as neither online nor busy.
    pub async fn worker_counts(&self, liveness_window: std::time::Duration) -> Result<WorkerCounts> {
        let cutoff = Utc::now()
            - Duration::from_std(liveness_window).unwrap_or_else(|_| Duration::seconds(60));
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(last_heartbeat >= ?1 AND status != 'offline'), 0) AS live,
                   COALESCE(SUM(last_heartbeat >= ?1 AND status = 'busy'), 0) AS busy
            FROM workers
            "#,
        )
        .bind(format_timestamp(cutoff))
        .fetch_one(&self.pool)
        .await
        .map_err(Error::db("worker counts"))?;
        let live: i64 = row.get("live");
        let busy: i64 = row.get("busy");
        Ok(WorkerCounts {
            total: row.get("total"),
            online: live,
            busy,
            idle: live - busy,
        })
    }

    pub async fn place_counts(&self) -> Result<PlaceCounts> {
        let now = Utc::now();
        let day_ago = format_timestamp(now - Duration::hours(24));
        let hour_ago = format_timestamp(now - Duration::hours(1));
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total_scraped,
                   COALESCE(SUM(created_at >= ?), 0) AS today,
                   COALESCE(SUM(json_array_length(json_extract(data, '$.emails'))), 0) AS total_emails,
                   COALESCE(SUM(created_at >= ?), 0) AS last_hour
            FROM results
            "#,
        )
        .bind(day_ago)
        .bind(hour_ago)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::db("place counts"))?;
        Ok(PlaceCounts {
            total_scraped: row.get("total_scraped"),
            today: row.get("today"),
            total_emails: row.get("total_emails"),
            rate_per_hour: row.get("last_hour"),
        })
    }
}
