//! Parent-job repository over `jobs_queue`.
//!
//! Raw reads and writes only; status predicates live in the service layer.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::common::time::{format_timestamp, read_timestamp, read_timestamp_opt};
use crate::common::{Error, Result};
use crate::domain::{Job, JobProgress, JobStatus};

const JOB_COLUMNS: &str = "id, name, priority, config, total_places, scraped_places, \
     failed_places, percentage, status, worker_id, created_at, updated_at, started_at, \
     completed_at, error_message, total_tasks, completed_tasks";

/// Optional list filter.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Clone)]
pub struct JobRepository {
    pool: SqlitePool,
}

impl JobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, job: &Job) -> Result<()> {
        let config = serde_json::to_string(&job.config)
            .map_err(|e| Error::InvalidInput(format!("encode job config: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO jobs_queue (
                id, name, priority, config, total_places, scraped_places, failed_places,
                percentage, status, worker_id, created_at, updated_at, started_at,
                completed_at, error_message, total_tasks, completed_tasks
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.name)
        .bind(job.priority)
        .bind(config)
        .bind(job.progress.total_places)
        .bind(job.progress.scraped_places)
        .bind(job.progress.failed_places)
        .bind(job.progress.percentage)
        .bind(job.status.as_str())
        .bind(&job.worker_id)
        .bind(format_timestamp(job.created_at))
        .bind(format_timestamp(job.updated_at))
        .bind(job.started_at.map(format_timestamp))
        .bind(job.completed_at.map(format_timestamp))
        .bind(&job.error_message)
        .bind(job.total_tasks)
        .bind(job.completed_tasks)
        .execute(&self.pool)
        .await
        .map_err(Error::db("create job"))?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Job> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs_queue WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::db("load job"))?
        .ok_or(Error::NotFound("job"))?;
        row_to_job(&row)
    }

    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let limit = filter.limit.unwrap_or(100).clamp(1, 1000);
        let offset = filter.offset.unwrap_or(0).max(0);
        let rows = match filter.status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs_queue WHERE status = ? \
                     ORDER BY created_at DESC LIMIT ? OFFSET ?"
                ))
                .bind(status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs_queue \
                     ORDER BY created_at DESC LIMIT ? OFFSET ?"
                ))
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(Error::db("list jobs"))?;
        rows.iter().map(row_to_job).collect()
    }

    /// Raw status write; the caller has already checked the transition.
    pub async fn update_status(&self, id: Uuid, status: JobStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs_queue SET status = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(format_timestamp(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(Error::db("update job status"))?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("job"));
        }
        Ok(())
    }

    pub async fn update_progress(&self, id: Uuid, progress: &JobProgress) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs_queue
            SET total_places = ?, scraped_places = ?, failed_places = ?,
                percentage = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(progress.total_places)
        .bind(progress.scraped_places)
        .bind(progress.failed_places)
        .bind(progress.percentage)
        .bind(format_timestamp(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(Error::db("update job progress"))?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("job"));
        }
        Ok(())
    }

    /// Seed fan-out totals and flip the job to `queued` in one statement.
    pub async fn mark_dispatched(&self, id: Uuid, total_tasks: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs_queue
            SET total_tasks = ?, total_places = ?, status = 'queued', updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(total_tasks)
        .bind(total_tasks)
        .bind(format_timestamp(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(Error::db("mark job dispatched"))?;
        Ok(())
    }

    pub async fn mark_started(&self, id: Uuid) -> Result<()> {
        let now = format_timestamp(Utc::now());
        sqlx::query(
            "UPDATE jobs_queue SET status = 'running', started_at = COALESCE(started_at, ?), \
             updated_at = ? WHERE id = ? AND status = 'queued'",
        )
        .bind(&now)
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(Error::db("mark job started"))?;
        Ok(())
    }

    pub async fn mark_completed(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE jobs_queue SET status = 'completed', completed_at = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(format_timestamp(at))
        .bind(format_timestamp(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(Error::db("mark job completed"))?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: Uuid, message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs_queue SET status = 'failed', error_message = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(message)
        .bind(format_timestamp(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(Error::db("mark job failed"))?;
        Ok(())
    }

    pub async fn add_failed_places(&self, id: Uuid, count: i64) -> Result<()> {
        sqlx::query(
            "UPDATE jobs_queue SET failed_places = failed_places + ?, updated_at = ? WHERE id = ?",
        )
        .bind(count)
        .bind(format_timestamp(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(Error::db("count failed places"))?;
        Ok(())
    }

    /// Set-based parent-progress reconciliation over every parent that has
    /// child tasks: `completed_tasks` (and `scraped_places`) become the
    /// count of children in `queued`, percentages are recomputed, and any
    /// non-terminal parent whose completed count has reached its total is
    /// transitioned to `completed`. One round trip, no per-job loop.
    ///
    /// The `total_tasks > 0` guard keeps a parent mid-dispatch (children
    /// persisted, totals not yet seeded) from completing spuriously.
    pub async fn reconcile_parents(&self, scope: Option<Uuid>) -> Result<u64> {
        let now = format_timestamp(Utc::now());
        let scope = scope.map(|id| id.to_string());
        let mut tx = self.pool.begin().await.map_err(Error::db("begin reconcile"))?;

        sqlx::query(
            r#"
            UPDATE jobs_queue SET
                completed_tasks = (
                    SELECT COUNT(*) FROM gmaps_jobs g
                    WHERE g.parent_job_id = jobs_queue.id AND g.status = 'queued'
                ),
                scraped_places = (
                    SELECT COUNT(*) FROM gmaps_jobs g
                    WHERE g.parent_job_id = jobs_queue.id AND g.status = 'queued'
                ),
                updated_at = ?1
            WHERE status NOT IN ('completed', 'failed', 'cancelled')
              AND id IN (
                  SELECT DISTINCT parent_job_id FROM gmaps_jobs
                  WHERE parent_job_id IS NOT NULL
              )
              AND (?2 IS NULL OR id = ?2)
            "#,
        )
        .bind(&now)
        .bind(&scope)
        .execute(&mut *tx)
        .await
        .map_err(Error::db("reconcile progress"))?;

        sqlx::query(
            r#"
            UPDATE jobs_queue
            SET percentage = MIN(100, 100 * scraped_places / MAX(total_places, 1))
            WHERE status NOT IN ('completed', 'failed', 'cancelled')
              AND (?1 IS NULL OR id = ?1)
            "#,
        )
        .bind(&scope)
        .execute(&mut *tx)
        .await
        .map_err(Error::db("reconcile percentage"))?;

        let completed = sqlx::query(
            r#"
            UPDATE jobs_queue
            SET status = 'completed', completed_at = ?1, updated_at = ?1
            WHERE status NOT IN ('completed', 'failed', 'cancelled')
              AND total_tasks > 0
              AND completed_tasks >= total_tasks
              AND id IN (
                  SELECT DISTINCT parent_job_id FROM gmaps_jobs
                  WHERE parent_job_id IS NOT NULL
              )
              AND (?2 IS NULL OR id = ?2)
            "#,
        )
        .bind(&now)
        .bind(&scope)
        .execute(&mut *tx)
        .await
        .map_err(Error::db("reconcile completion"))?;

        tx.commit().await.map_err(Error::db("commit reconcile"))?;
        Ok(completed.rows_affected())
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM jobs_queue WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(Error::db("delete job"))?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("job"));
        }
        Ok(())
    }

    /// Delete a job and its results in one transaction. Results go first,
    /// explicitly; child tasks follow the job row via the cascade. Returns
    /// the number of result rows removed.
    pub async fn delete_with_results(&self, id: Uuid) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(Error::db("begin delete"))?;

        let removed = sqlx::query("DELETE FROM results WHERE job_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(Error::db("delete job results"))?
            .rows_affected();

        let deleted = sqlx::query("DELETE FROM jobs_queue WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(Error::db("delete job"))?;
        if deleted.rows_affected() == 0 {
            tx.rollback().await.map_err(Error::db("rollback delete"))?;
            return Err(Error::NotFound("job"));
        }

        tx.commit().await.map_err(Error::db("commit delete"))?;
        Ok(removed)
    }
}

pub(crate) fn row_to_job(row: &SqliteRow) -> Result<Job> {
    let id: String = row.try_get("id").map_err(Error::db("read job id"))?;
    let config: String = row.try_get("config").map_err(Error::db("read job config"))?;
    let status: String = row.try_get("status").map_err(Error::db("read job status"))?;
    Ok(Job {
        id: Uuid::parse_str(&id).map_err(|e| Error::InvalidInput(format!("job id: {e}")))?,
        name: row.try_get("name").map_err(Error::db("read job name"))?,
        priority: row
            .try_get("priority")
            .map_err(Error::db("read job priority"))?,
        config: serde_json::from_str(&config)
            .map_err(|e| Error::InvalidInput(format!("decode job config: {e}")))?,
        progress: JobProgress {
            total_places: row
                .try_get("total_places")
                .map_err(Error::db("read progress"))?,
            scraped_places: row
                .try_get("scraped_places")
                .map_err(Error::db("read progress"))?,
            failed_places: row
                .try_get("failed_places")
                .map_err(Error::db("read progress"))?,
            percentage: row
                .try_get("percentage")
                .map_err(Error::db("read progress"))?,
        },
        status: status
            .parse()
            .map_err(|e: String| Error::InvalidInput(e))?,
        worker_id: row
            .try_get("worker_id")
            .map_err(Error::db("read worker id"))?,
        created_at: read_timestamp(row, "created_at")?,
        updated_at: read_timestamp(row, "updated_at")?,
        started_at: read_timestamp_opt(row, "started_at")?,
        completed_at: read_timestamp_opt(row, "completed_at")?,
        error_message: row
            .try_get("error_message")
            .map_err(Error::db("read error message"))?,
        total_tasks: row
            .try_get("total_tasks")
            .map_err(Error::db("read total tasks"))?,
        completed_tasks: row
            .try_get("completed_tasks")
            .map_err(Error::db("read completed tasks"))?,
    })
}
