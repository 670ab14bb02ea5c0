//! Schema evolver.
//!
//! Detection never consults `migration_history`: the database's shape is
//! presence-checked fresh on every startup, and exactly one of five states
//! is recognized. Each forward migration runs in a single transaction and
//! records its symbolic name; reruns on an already-migrated database are
//! no-ops.

use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::common::time::format_timestamp;
use crate::common::{Error, Result};

/// The five recognized database shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaState {
    /// Neither core table exists.
    FreshInstall,
    /// Both tables exist and tasks are linked to parents.
    AlreadyMigrated,
    /// Both tables exist but tasks carry no parent link.
    BothExistUnlinked,
    /// Legacy CLI database: child tasks only.
    OnlyGmapsJobs,
    /// Parent jobs only; no child table yet.
    OnlyJobsQueue,
}

impl SchemaState {
    pub fn migration_name(&self) -> Option<&'static str> {
        match self {
            SchemaState::FreshInstall => Some("auto_migrate_fresh_install"),
            SchemaState::AlreadyMigrated => None,
            SchemaState::BothExistUnlinked => Some("auto_migrate_both_exist_unlinked"),
            SchemaState::OnlyGmapsJobs => Some("auto_migrate_only_gmaps_jobs"),
            SchemaState::OnlyJobsQueue => Some("auto_migrate_only_jobs_queue"),
        }
    }
}

const CREATE_JOBS_QUEUE: &str = r#"
CREATE TABLE IF NOT EXISTS jobs_queue (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    config TEXT NOT NULL,
    total_places INTEGER NOT NULL DEFAULT 0,
    scraped_places INTEGER NOT NULL DEFAULT 0,
    failed_places INTEGER NOT NULL DEFAULT 0,
    percentage INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    worker_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    error_message TEXT,
    total_tasks INTEGER NOT NULL DEFAULT 0,
    completed_tasks INTEGER NOT NULL DEFAULT 0
)
"#;

const CREATE_GMAPS_JOBS: &str = r#"
CREATE TABLE IF NOT EXISTS gmaps_jobs (
    id TEXT PRIMARY KEY,
    priority INTEGER NOT NULL DEFAULT 0,
    payload_type TEXT NOT NULL,
    payload BLOB NOT NULL,
    status TEXT NOT NULL DEFAULT 'new',
    created_at TEXT NOT NULL,
    parent_job_id TEXT REFERENCES jobs_queue(id) ON DELETE CASCADE
)
"#;

const CREATE_PARENT_INDEXES: [&str; 2] = [
    "CREATE INDEX IF NOT EXISTS idx_gmaps_jobs_parent ON gmaps_jobs(parent_job_id)",
    "CREATE INDEX IF NOT EXISTS idx_gmaps_jobs_parent_status ON gmaps_jobs(parent_job_id, status)",
];

const CREATE_ANCILLARY: [&str; 4] = [
    r#"
CREATE TABLE IF NOT EXISTS results (
    place_id TEXT PRIMARY KEY,
    job_id TEXT,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#,
    r#"
CREATE TABLE IF NOT EXISTS workers (
    id TEXT PRIMARY KEY,
    name TEXT,
    status TEXT NOT NULL DEFAULT 'online',
    last_heartbeat TEXT NOT NULL,
    current_job_id TEXT,
    jobs_completed INTEGER NOT NULL DEFAULT 0,
    uptime_seconds INTEGER NOT NULL DEFAULT 0,
    registered_at TEXT NOT NULL
)
"#,
    r#"
CREATE TABLE IF NOT EXISTS proxy_sources (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    fetch_status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#,
    r#"
CREATE TABLE IF NOT EXISTS migration_history (
    name TEXT PRIMARY KEY,
    applied_at TEXT NOT NULL
)
"#,
];

/// Detect the database's current shape.
pub async fn detect(pool: &SqlitePool) -> Result<SchemaState> {
    let has_parent_table = table_exists(pool, "jobs_queue").await?;
    let has_child_table = table_exists(pool, "gmaps_jobs").await?;
    let has_link = if has_child_table {
        column_exists(pool, "gmaps_jobs", "parent_job_id").await?
    } else {
        false
    };

    match (has_parent_table, has_child_table, has_link) {
        (false, false, _) => Ok(SchemaState::FreshInstall),
        (true, true, true) => Ok(SchemaState::AlreadyMigrated),
        (true, true, false) => Ok(SchemaState::BothExistUnlinked),
        (false, true, false) => Ok(SchemaState::OnlyGmapsJobs),
        (true, false, _) => Ok(SchemaState::OnlyJobsQueue),
        (false, true, true) => Err(Error::Conflict(
            "unrecognized schema: linked tasks without a parent table".to_string(),
        )),
    }
}

/// Detect and apply the appropriate forward migration. Safe to rerun.
pub async fn run(pool: &SqlitePool) -> Result<SchemaState> {
    let state = detect(pool).await?;
    info!(state = ?state, "schema state detected");

    let mut tx = pool.begin().await.map_err(Error::db("begin migration"))?;

    match state {
        SchemaState::FreshInstall => {
            sqlx::query(CREATE_JOBS_QUEUE)
                .execute(&mut *tx)
                .await
                .map_err(Error::db("create jobs_queue"))?;
            sqlx::query(CREATE_GMAPS_JOBS)
                .execute(&mut *tx)
                .await
                .map_err(Error::db("create gmaps_jobs"))?;
            for stmt in CREATE_PARENT_INDEXES {
                sqlx::query(stmt)
                    .execute(&mut *tx)
                    .await
                    .map_err(Error::db("create parent index"))?;
            }
        }
        SchemaState::AlreadyMigrated => {}
        SchemaState::BothExistUnlinked => {
            add_parent_link(&mut tx).await?;
            add_task_counters(&mut tx).await?;
        }
        SchemaState::OnlyGmapsJobs => {
            sqlx::query(CREATE_JOBS_QUEUE)
                .execute(&mut *tx)
                .await
                .map_err(Error::db("create jobs_queue"))?;
            add_parent_link(&mut tx).await?;
        }
        SchemaState::OnlyJobsQueue => {
            sqlx::query(CREATE_GMAPS_JOBS)
                .execute(&mut *tx)
                .await
                .map_err(Error::db("create gmaps_jobs"))?;
            for stmt in CREATE_PARENT_INDEXES {
                sqlx::query(stmt)
                    .execute(&mut *tx)
                    .await
                    .map_err(Error::db("create parent index"))?;
            }
            add_task_counters(&mut tx).await?;

            let pending: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM jobs_queue WHERE status IN ('pending', 'queued')",
            )
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::db("count pending parents"))?;
            if pending > 0 {
                warn!(
                    pending,
                    "parent jobs predate the task table and need re-fanout"
                );
            }
        }
    }

    for stmt in CREATE_ANCILLARY {
        sqlx::query(stmt)
            .execute(&mut *tx)
            .await
            .map_err(Error::db("create ancillary table"))?;
    }

    if let Some(name) = state.migration_name() {
        sqlx::query("INSERT OR IGNORE INTO migration_history (name, applied_at) VALUES (?, ?)")
            .bind(name)
            .bind(format_timestamp(chrono::Utc::now()))
            .execute(&mut *tx)
            .await
            .map_err(Error::db("record migration"))?;
        info!(migration = name, "migration applied");
    }

    tx.commit().await.map_err(Error::db("commit migration"))?;
    Ok(state)
}

async fn add_parent_link(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> Result<()> {
    sqlx::query(
        "ALTER TABLE gmaps_jobs ADD COLUMN parent_job_id TEXT REFERENCES jobs_queue(id) ON DELETE CASCADE",
    )
    .execute(&mut **tx)
    .await
    .map_err(Error::db("add parent_job_id column"))?;
    for stmt in CREATE_PARENT_INDEXES {
        sqlx::query(stmt)
            .execute(&mut **tx)
            .await
            .map_err(Error::db("create parent index"))?;
    }
    Ok(())
}

async fn add_task_counters(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> Result<()> {
    for column in ["total_tasks", "completed_tasks"] {
        if !column_exists_tx(tx, "jobs_queue", column).await? {
            sqlx::query(&format!(
                "ALTER TABLE jobs_queue ADD COLUMN {column} INTEGER NOT NULL DEFAULT 0"
            ))
            .execute(&mut **tx)
            .await
            .map_err(Error::db(format!("add {column} column")))?;
        }
    }
    Ok(())
}

async fn table_exists(pool: &SqlitePool, name: &str) -> Result<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await
            .map_err(Error::db("check table existence"))?;
    Ok(found.is_some())
}

async fn column_exists(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(pool)
        .await
        .map_err(Error::db("read table info"))?;
    Ok(rows
        .iter()
        .any(|row| row.get::<String, _>("name") == column))
}

async fn column_exists_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    table: &str,
    column: &str,
) -> Result<bool> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::db("read table info"))?;
    Ok(rows
        .iter()
        .any(|row| row.get::<String, _>("name") == column))
}

/// Names recorded in `migration_history`, oldest first.
pub async fn history(pool: &SqlitePool) -> Result<Vec<String>> {
    sqlx::query_scalar("SELECT name FROM migration_history ORDER BY applied_at, name")
        .fetch_all(pool)
        .await
        .map_err(Error::db("read migration history"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::memory_pool;

    async fn create_legacy_jobs_queue(pool: &SqlitePool) {
        sqlx::query(
            r#"
            CREATE TABLE jobs_queue (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                config TEXT NOT NULL,
                total_places INTEGER NOT NULL DEFAULT 0,
                scraped_places INTEGER NOT NULL DEFAULT 0,
                failed_places INTEGER NOT NULL DEFAULT 0,
                percentage INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending',
                worker_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                error_message TEXT
            )
            "#,
        )
        .execute(pool)
        .await
        .unwrap();
    }

    async fn create_legacy_gmaps_jobs(pool: &SqlitePool) {
        sqlx::query(
            r#"
            CREATE TABLE gmaps_jobs (
                id TEXT PRIMARY KEY,
                priority INTEGER NOT NULL DEFAULT 0,
                payload_type TEXT NOT NULL,
                payload BLOB NOT NULL,
                status TEXT NOT NULL DEFAULT 'new',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn fresh_install_creates_everything_and_records_history() {
        let pool = memory_pool().await;
        assert_eq!(detect(&pool).await.unwrap(), SchemaState::FreshInstall);

        let state = run(&pool).await.unwrap();
        assert_eq!(state, SchemaState::FreshInstall);
        assert!(table_exists(&pool, "jobs_queue").await.unwrap());
        assert!(table_exists(&pool, "gmaps_jobs").await.unwrap());
        assert!(table_exists(&pool, "workers").await.unwrap());
        assert!(table_exists(&pool, "results").await.unwrap());
        assert!(table_exists(&pool, "proxy_sources").await.unwrap());
        assert_eq!(
            history(&pool).await.unwrap(),
            vec!["auto_migrate_fresh_install".to_string()]
        );
    }

    #[tokio::test]
    async fn rerun_is_a_no_op() {
        let pool = memory_pool().await;
        run(&pool).await.unwrap();
        let state = run(&pool).await.unwrap();
        assert_eq!(state, SchemaState::AlreadyMigrated);
        assert_eq!(history(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn both_exist_unlinked_gains_link_and_counters() {
        let pool = memory_pool().await;
        create_legacy_jobs_queue(&pool).await;
        create_legacy_gmaps_jobs(&pool).await;
        assert_eq!(detect(&pool).await.unwrap(), SchemaState::BothExistUnlinked);

        run(&pool).await.unwrap();
        assert!(column_exists(&pool, "gmaps_jobs", "parent_job_id")
            .await
            .unwrap());
        assert!(column_exists(&pool, "jobs_queue", "total_tasks")
            .await
            .unwrap());
        assert!(column_exists(&pool, "jobs_queue", "completed_tasks")
            .await
            .unwrap());
        assert_eq!(
            history(&pool).await.unwrap(),
            vec!["auto_migrate_both_exist_unlinked".to_string()]
        );

        // Rerun must detect the migrated shape and change nothing.
        assert_eq!(run(&pool).await.unwrap(), SchemaState::AlreadyMigrated);
        assert_eq!(history(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn only_gmaps_jobs_gains_parent_table_and_link() {
        let pool = memory_pool().await;
        create_legacy_gmaps_jobs(&pool).await;
        assert_eq!(detect(&pool).await.unwrap(), SchemaState::OnlyGmapsJobs);

        run(&pool).await.unwrap();
        assert!(table_exists(&pool, "jobs_queue").await.unwrap());
        assert!(column_exists(&pool, "gmaps_jobs", "parent_job_id")
            .await
            .unwrap());
        assert_eq!(
            history(&pool).await.unwrap(),
            vec!["auto_migrate_only_gmaps_jobs".to_string()]
        );
    }

    #[tokio::test]
    async fn only_jobs_queue_gains_child_table_and_counters() {
        let pool = memory_pool().await;
        create_legacy_jobs_queue(&pool).await;
        sqlx::query(
            "INSERT INTO jobs_queue (id, name, config, status, created_at, updated_at)
             VALUES ('j1', 'legacy', '{}', 'pending', '2023-01-01 00:00:00', '2023-01-01 00:00:00')",
        )
        .execute(&pool)
        .await
        .unwrap();
        assert_eq!(detect(&pool).await.unwrap(), SchemaState::OnlyJobsQueue);

        run(&pool).await.unwrap();
        assert!(table_exists(&pool, "gmaps_jobs").await.unwrap());
        assert!(column_exists(&pool, "jobs_queue", "total_tasks")
            .await
            .unwrap());
        assert_eq!(
            history(&pool).await.unwrap(),
            vec!["auto_migrate_only_jobs_queue".to_string()]
        );
        assert_eq!(run(&pool).await.unwrap(), SchemaState::AlreadyMigrated);
    }

    #[tokio::test]
    async fn linked_tasks_without_parent_table_is_fatal() {
        let pool = memory_pool().await;
        sqlx::query(
            "CREATE TABLE gmaps_jobs (
                id TEXT PRIMARY KEY,
                priority INTEGER NOT NULL DEFAULT 0,
                payload_type TEXT NOT NULL,
                payload BLOB NOT NULL,
                status TEXT NOT NULL DEFAULT 'new',
                created_at TEXT NOT NULL,
                parent_job_id TEXT
            )",
        )
        .execute(&pool)
        .await
        .unwrap();
        assert!(detect(&pool).await.is_err());
    }
}
