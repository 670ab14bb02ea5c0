//! Worker repository over `workers`.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::common::time::{format_timestamp, read_timestamp};
use crate::common::{Error, Result};
use crate::domain::{Worker, WorkerStatus};

const WORKER_COLUMNS: &str =
    "id, name, status, last_heartbeat, current_job_id, jobs_completed, uptime_seconds, registered_at";

#[derive(Clone)]
pub struct WorkerRepository {
    pool: SqlitePool,
}

impl WorkerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or refresh a worker registration, preserving its counters.
    pub async fn upsert(&self, worker: &Worker) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workers (id, name, status, last_heartbeat, current_job_id,
                                 jobs_completed, uptime_seconds, registered_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                status = excluded.status,
                last_heartbeat = excluded.last_heartbeat,
                current_job_id = excluded.current_job_id
            "#,
        )
        .bind(&worker.id)
        .bind(&worker.name)
        .bind(worker.status.as_str())
        .bind(format_timestamp(worker.last_heartbeat))
        .bind(&worker.current_job_id)
        .bind(worker.jobs_completed)
        .bind(worker.uptime_seconds)
        .bind(format_timestamp(worker.registered_at))
        .execute(&self.pool)
        .await
        .map_err(Error::db("register worker"))?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Worker> {
        let row = sqlx::query(&format!("SELECT {WORKER_COLUMNS} FROM workers WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::db("load worker"))?
            .ok_or(Error::NotFound("worker"))?;
        row_to_worker(&row)
    }

    pub async fn list(&self) -> Result<Vec<Worker>> {
        let rows = sqlx::query(&format!(
            "SELECT {WORKER_COLUMNS} FROM workers ORDER BY registered_at"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::db("list workers"))?;
        rows.iter().map(row_to_worker).collect()
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM workers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::db("delete worker"))?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("worker"));
        }
        Ok(())
    }

    pub async fn heartbeat(&self, id: &str, at: DateTime<Utc>, status: WorkerStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE workers SET last_heartbeat = ?, status = ?, \
             uptime_seconds = CAST((julianday(?) - julianday(registered_at)) * 86400 AS INTEGER) \
             WHERE id = ?",
        )
        .bind(format_timestamp(at))
        .bind(status.as_str())
        .bind(format_timestamp(at))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::db("record heartbeat"))?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("worker"));
        }
        Ok(())
    }

    pub async fn set_status(&self, id: &str, status: WorkerStatus) -> Result<()> {
        sqlx::query("UPDATE workers SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::db("set worker status"))?;
        Ok(())
    }

    /// Drop the claim; optionally score the completion.
    pub async fn clear_claim(&self, id: &str, completed: bool) -> Result<()> {
        let increment = i64::from(completed);
        sqlx::query(
            "UPDATE workers SET current_job_id = NULL, status = 'online', \
             jobs_completed = jobs_completed + ? WHERE id = ?",
        )
        .bind(increment)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::db("clear claim"))?;
        Ok(())
    }

    /// Workers whose last heartbeat is older than `cutoff` and that are not
    /// already offline.
    pub async fn stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Worker>> {
        let rows = sqlx::query(&format!(
            "SELECT {WORKER_COLUMNS} FROM workers WHERE status != 'offline' AND last_heartbeat < ?"
        ))
        .bind(format_timestamp(cutoff))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::db("list stale workers"))?;
        rows.iter().map(row_to_worker).collect()
    }

    /// Mark a worker offline and release any held claim in one statement.
    pub async fn mark_offline(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE workers SET status = 'offline', current_job_id = NULL WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::db("mark worker offline"))?;
        Ok(())
    }
}

fn row_to_worker(row: &SqliteRow) -> Result<Worker> {
    let status: String = row
        .try_get("status")
        .map_err(Error::db("read worker status"))?;
    Ok(Worker {
        id: row.try_get("id").map_err(Error::db("read worker id"))?,
        name: row.try_get("name").map_err(Error::db("read worker name"))?,
        status: status.parse().map_err(|e: String| Error::InvalidInput(e))?,
        last_heartbeat: read_timestamp(row, "last_heartbeat")?,
        current_job_id: row
            .try_get("current_job_id")
            .map_err(Error::db("read claim"))?,
        jobs_completed: row
            .try_get("jobs_completed")
            .map_err(Error::db("read jobs completed"))?,
        uptime_seconds: row
            .try_get("uptime_seconds")
            .map_err(Error::db("read uptime"))?,
        registered_at: read_timestamp(row, "registered_at")?,
    })
}
