//! Child-task repository over `gmaps_jobs`.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::common::time::{format_timestamp, read_timestamp};
use crate::common::{Error, Result};
use crate::domain::{Task, TaskStatus};

const TASK_COLUMNS: &str = "id, priority, payload_type, payload, status, created_at, parent_job_id";

#[derive(Clone)]
pub struct TaskRepository {
    pool: SqlitePool,
}

impl TaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, task: &Task) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO gmaps_jobs (id, priority, payload_type, payload, status, created_at, parent_job_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(task.priority)
        .bind(&task.payload_type)
        .bind(&task.payload)
        .bind(task.status.as_str())
        .bind(format_timestamp(task.created_at))
        .bind(task.parent_job_id.map(|id| id.to_string()))
        .execute(&self.pool)
        .await
        .map_err(Error::db("create task"))?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Task> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM gmaps_jobs WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::db("load task"))?
            .ok_or(Error::NotFound("task"))?;
        row_to_task(&row)
    }

    pub async fn update_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let result = sqlx::query("UPDATE gmaps_jobs SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::db("update task status"))?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("task"));
        }
        Ok(())
    }

    pub async fn list_by_parent(&self, parent_job_id: Uuid) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM gmaps_jobs WHERE parent_job_id = ? ORDER BY created_at"
        ))
        .bind(parent_job_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::db("list tasks by parent"))?;
        rows.iter().map(row_to_task).collect()
    }

    pub async fn count_by_parent_and_status(
        &self,
        parent_job_id: Uuid,
        status: TaskStatus,
    ) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM gmaps_jobs WHERE parent_job_id = ? AND status = ?",
        )
        .bind(parent_job_id.to_string())
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::db("count tasks"))
    }

    /// Atomically claim the next unclaimed `new` task for a worker.
    ///
    /// The worker row is the claim record: a task is unclaimed when no
    /// worker holds it in `current_job_id`. The select and the claim write
    /// happen in one transaction, so two workers can never claim the same
    /// task.
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<Task>> {
        let mut tx = self.pool.begin().await.map_err(Error::db("begin claim"))?;

        let row = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM gmaps_jobs
            WHERE status = 'new'
              AND id NOT IN (
                  SELECT current_job_id FROM workers WHERE current_job_id IS NOT NULL
              )
            ORDER BY priority DESC, created_at ASC
            LIMIT 1
            "#
        ))
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::db("select claimable task"))?;

        let Some(row) = row else {
            tx.rollback().await.map_err(Error::db("rollback claim"))?;
            return Ok(None);
        };
        let task = row_to_task(&row)?;

        let updated = sqlx::query(
            "UPDATE workers SET status = 'busy', current_job_id = ? WHERE id = ?",
        )
        .bind(&task.id)
        .bind(worker_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::db("record claim"))?;
        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(Error::db("rollback claim"))?;
            return Err(Error::NotFound("worker"));
        }

        tx.commit().await.map_err(Error::db("commit claim"))?;
        Ok(Some(task))
    }

    /// Tasks never picked up whose parent is in one of `parent_statuses`;
    /// startup reconciliation republishes these.
    pub async fn list_new_for_republish(&self, parent_statuses: &[&str]) -> Result<Vec<Task>> {
        let placeholders = vec!["?"; parent_statuses.len()].join(", ");
        let sql = format!(
            r#"
            SELECT t.id, t.priority, t.payload_type, t.payload, t.status, t.created_at, t.parent_job_id
            FROM gmaps_jobs t
            JOIN jobs_queue j ON j.id = t.parent_job_id
            WHERE t.status = 'new' AND j.status IN ({placeholders})
            ORDER BY t.created_at
            "#
        );
        let mut query = sqlx::query(&sql);
        for status in parent_statuses {
            query = query.bind(*status);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(Error::db("list tasks for republish"))?;
        rows.iter().map(row_to_task).collect()
    }
}

fn row_to_task(row: &SqliteRow) -> Result<Task> {
    let status: String = row.try_get("status").map_err(Error::db("read task status"))?;
    let parent: Option<String> = row
        .try_get("parent_job_id")
        .map_err(Error::db("read parent id"))?;
    Ok(Task {
        id: row.try_get("id").map_err(Error::db("read task id"))?,
        priority: row
            .try_get("priority")
            .map_err(Error::db("read task priority"))?,
        payload_type: row
            .try_get("payload_type")
            .map_err(Error::db("read payload type"))?,
        payload: row.try_get("payload").map_err(Error::db("read payload"))?,
        parent_job_id: parent
            .map(|id| Uuid::parse_str(&id))
            .transpose()
            .map_err(|e| Error::InvalidInput(format!("parent job id: {e}")))?,
        status: status.parse().map_err(|e: String| Error::InvalidInput(e))?,
        created_at: read_timestamp(row, "created_at")?,
    })
}
