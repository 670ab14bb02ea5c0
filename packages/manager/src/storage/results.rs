//! Scraped-place repository over `results`.
//!
//! Rows are idempotent by `place_id`: batch inserts skip conflicts so
//! re-ingesting a place is silently a no-op.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, SqlitePool};
use uuid::Uuid;

use crate::common::pagination::Page;
use crate::common::time::format_timestamp;
use crate::common::{Error, Result};
use crate::domain::Place;

/// SQLite's bind limit is generous, but cap rows per statement anyway.
const MAX_BATCH_ROWS: usize = 200;

#[derive(Clone)]
pub struct ResultRepository {
    pool: SqlitePool,
}

impl ResultRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Multi-row insert with conflict-skip on `place_id`. Returns the
    /// number of rows actually written.
    pub async fn insert_batch(&self, job_id: Option<Uuid>, places: &[Place]) -> Result<u64> {
        if places.is_empty() {
            return Ok(0);
        }
        let now = format_timestamp(Utc::now());
        let job_id = job_id.map(|id| id.to_string());
        let mut written = 0;

        for chunk in places.chunks(MAX_BATCH_ROWS) {
            let mut builder =
                QueryBuilder::new("INSERT INTO results (place_id, job_id, data, created_at) ");
            let mut encode_err = None;
            builder.push_values(chunk, |mut row, place| {
                let data = match serde_json::to_string(place) {
                    Ok(data) => data,
                    Err(e) => {
                        encode_err = Some(Error::InvalidInput(format!("encode place: {e}")));
                        String::new()
                    }
                };
                row.push_bind(&place.place_id)
                    .push_bind(job_id.clone())
                    .push_bind(data)
                    .push_bind(now.clone());
            });
            if let Some(err) = encode_err {
                return Err(err);
            }
            builder.push(" ON CONFLICT (place_id) DO NOTHING");

            let result = builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(Error::db("insert result batch"))?;
            written += result.rows_affected();
        }
        Ok(written)
    }

    pub async fn list(&self, job_id: Option<Uuid>, page: Page) -> Result<Vec<Place>> {
        let rows = match &job_id {
            Some(id) => {
                sqlx::query(
                    "SELECT data FROM results WHERE job_id = ? ORDER BY created_at, place_id \
                     LIMIT ? OFFSET ?",
                )
                .bind(id.to_string())
                .bind(page.per_page)
                .bind(page.offset)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT data FROM results ORDER BY created_at, place_id LIMIT ? OFFSET ?",
                )
                .bind(page.per_page)
                .bind(page.offset)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(Error::db("list results"))?;
        rows.iter().map(row_to_place).collect()
    }

    pub async fn count(&self, job_id: Option<Uuid>) -> Result<i64> {
        match job_id {
            Some(id) => sqlx::query_scalar("SELECT COUNT(*) FROM results WHERE job_id = ?")
                .bind(id.to_string())
                .fetch_one(&self.pool)
                .await,
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM results")
                    .fetch_one(&self.pool)
                    .await
            }
        }
        .map_err(Error::db("count results"))
    }

}

fn row_to_place(row: &SqliteRow) -> Result<Place> {
    let data: String = row.try_get("data").map_err(Error::db("read place data"))?;
    serde_json::from_str(&data).map_err(|e| Error::InvalidInput(format!("decode place: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::pagination::PageParams;
    use crate::storage::db::memory_pool;
    use crate::storage::migrate;

    async fn repo() -> ResultRepository {
        let pool = memory_pool().await;
        migrate::run(&pool).await.unwrap();
        ResultRepository::new(pool)
    }

    fn place(id: &str) -> Place {
        Place {
            place_id: id.to_string(),
            title: format!("Place {id}"),
            ..Default::default()
        }
    }

    fn first_page() -> Page {
        PageParams {
            page: None,
            per_page: None,
        }
        .normalize()
    }

    #[tokio::test]
    async fn batch_insert_skips_duplicates() {
        let repo = repo().await;
        let job = Uuid::new_v4();
        let batch = vec![place("a"), place("b")];

        assert_eq!(repo.insert_batch(Some(job), &batch).await.unwrap(), 2);
        // Re-ingesting the same payload writes nothing new.
        assert_eq!(repo.insert_batch(Some(job), &batch).await.unwrap(), 0);
        assert_eq!(repo.count(None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn list_is_scoped_by_job() {
        let repo = repo().await;
        let job_a = Uuid::new_v4();
        let job_b = Uuid::new_v4();
        repo.insert_batch(Some(job_a), &[place("a1")]).await.unwrap();
        repo.insert_batch(Some(job_b), &[place("b1"), place("b2")])
            .await
            .unwrap();

        assert_eq!(repo.list(Some(job_a), first_page()).await.unwrap().len(), 1);
        assert_eq!(repo.list(Some(job_b), first_page()).await.unwrap().len(), 2);
        assert_eq!(repo.list(None, first_page()).await.unwrap().len(), 3);
        assert_eq!(repo.count(Some(job_b)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn large_batches_are_chunked() {
        let repo = repo().await;
        let batch: Vec<Place> = (0..450).map(|i| place(&format!("p{i}"))).collect();
        assert_eq!(repo.insert_batch(None, &batch).await.unwrap(), 450);
        assert_eq!(repo.count(None).await.unwrap(), 450);
    }
}
