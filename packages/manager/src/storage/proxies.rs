//! Proxy-source repository over `proxy_sources`.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::common::time::{format_timestamp, read_timestamp};
use crate::common::{Error, Result};
use crate::domain::{FetchStatus, ProxySource};

const PROXY_COLUMNS: &str = "id, url, active, fetch_status, created_at, updated_at";

#[derive(Clone)]
pub struct ProxyRepository {
    pool: SqlitePool,
}

impl ProxyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, source: &ProxySource) -> Result<()> {
        sqlx::query(
            "INSERT INTO proxy_sources (id, url, active, fetch_status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(source.id.to_string())
        .bind(&source.url)
        .bind(source.active)
        .bind(source.fetch_status.as_str())
        .bind(format_timestamp(source.created_at))
        .bind(format_timestamp(source.updated_at))
        .execute(&self.pool)
        .await
        .map_err(Error::db("create proxy source"))?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<ProxySource>> {
        let rows = sqlx::query(&format!(
            "SELECT {PROXY_COLUMNS} FROM proxy_sources ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::db("list proxy sources"))?;
        rows.iter().map(row_to_source).collect()
    }

    pub async fn set_active(&self, id: Uuid, active: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE proxy_sources SET active = ?, updated_at = ? WHERE id = ?",
        )
        .bind(active)
        .bind(format_timestamp(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(Error::db("update proxy source"))?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("proxy source"));
        }
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM proxy_sources WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(Error::db("delete proxy source"))?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("proxy source"));
        }
        Ok(())
    }

    /// Queue every active source for the external refresh crawler.
    pub async fn mark_active_pending(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE proxy_sources SET fetch_status = 'pending', updated_at = ? WHERE active = 1",
        )
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(Error::db("mark sources pending"))?;
        Ok(result.rows_affected())
    }

    /// Counts per fetch status plus active/total, for the proxygate stats
    /// endpoint.
    pub async fn stats(&self) -> Result<ProxyStats> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(active), 0) AS active,
                   COALESCE(SUM(fetch_status = 'pending'), 0) AS pending,
                   COALESCE(SUM(fetch_status = 'fetched'), 0) AS fetched,
                   COALESCE(SUM(fetch_status = 'failed'), 0) AS failed
            FROM proxy_sources
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::db("proxy stats"))?;
        Ok(ProxyStats {
            total: row.get("total"),
            active: row.get("active"),
            pending: row.get("pending"),
            fetched: row.get("fetched"),
            failed: row.get("failed"),
        })
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ProxyStats {
    pub total: i64,
    pub active: i64,
    pub pending: i64,
    pub fetched: i64,
    pub failed: i64,
}

fn row_to_source(row: &SqliteRow) -> Result<ProxySource> {
    let id: String = row.try_get("id").map_err(Error::db("read source id"))?;
    let fetch_status: String = row
        .try_get("fetch_status")
        .map_err(Error::db("read fetch status"))?;
    Ok(ProxySource {
        id: Uuid::parse_str(&id).map_err(|e| Error::InvalidInput(format!("source id: {e}")))?,
        url: row.try_get("url").map_err(Error::db("read source url"))?,
        active: row.try_get("active").map_err(Error::db("read active"))?,
        fetch_status: fetch_status
            .parse()
            .map_err(|e: String| Error::InvalidInput(e))?,
        created_at: read_timestamp(row, "created_at")?,
        updated_at: read_timestamp(row, "updated_at")?,
    })
}
