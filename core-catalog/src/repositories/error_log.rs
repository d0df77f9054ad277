//! Error Log: append-only per-item remote failures.

use crate::error::{CatalogError, Result};
use crate::models::{ErrorRecord, QueueItemId};
use async_trait::async_trait;
use sqlx::{query, query_as, FromRow, SqlitePool};

#[async_trait]
pub trait ErrorLogRepository: Send + Sync {
    /// Appends records; returns how many were written.
    ///
    /// A record for an item and job that is already logged is skipped.
    async fn append(&self, records: &[ErrorRecord]) -> Result<u64>;

    /// Newest first.
    async fn find_by_campaign(&self, campaign_id: &str) -> Result<Vec<ErrorRecord>>;

    /// Newest first.
    async fn find_by_account(&self, account_id: &str) -> Result<Vec<ErrorRecord>>;

    async fn count_for_item(&self, queue_item_id: &QueueItemId) -> Result<i64>;
}

pub struct SqliteErrorLogRepository {
    pool: SqlitePool,
}

impl SqliteErrorLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ErrorLogRepository for SqliteErrorLogRepository {
    async fn append(&self, records: &[ErrorRecord]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for record in records {
            written += query(
                r#"
                INSERT OR IGNORE INTO error_records (
                    operand, account_id, campaign_id, queue_item_id, batch_job_id,
                    message, category, created_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(record.operand.as_str())
            .bind(&record.account_id)
            .bind(&record.campaign_id)
            .bind(record.queue_item_id.as_string())
            .bind(&record.batch_job_id)
            .bind(&record.message)
            .bind(&record.category)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn find_by_campaign(&self, campaign_id: &str) -> Result<Vec<ErrorRecord>> {
        let rows = query_as::<_, ErrorRow>(
            "SELECT * FROM error_records WHERE campaign_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ErrorRecord::try_from).collect()
    }

    async fn find_by_account(&self, account_id: &str) -> Result<Vec<ErrorRecord>> {
        let rows = query_as::<_, ErrorRow>(
            "SELECT * FROM error_records WHERE account_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ErrorRecord::try_from).collect()
    }

    async fn count_for_item(&self, queue_item_id: &QueueItemId) -> Result<i64> {
        let count: (i64,) =
            query_as("SELECT COUNT(*) FROM error_records WHERE queue_item_id = ?")
                .bind(queue_item_id.as_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0)
    }
}

#[derive(Debug, FromRow)]
struct ErrorRow {
    id: i64,
    operand: String,
    account_id: String,
    campaign_id: String,
    queue_item_id: String,
    batch_job_id: Option<String>,
    message: String,
    category: String,
    created_at: i64,
}

impl TryFrom<ErrorRow> for ErrorRecord {
    type Error = CatalogError;

    fn try_from(row: ErrorRow) -> Result<Self> {
        Ok(ErrorRecord {
            id: Some(row.id),
            operand: row.operand.parse()?,
            account_id: row.account_id,
            campaign_id: row.campaign_id,
            queue_item_id: QueueItemId::from_string(&row.queue_item_id).map_err(|e| {
                CatalogError::invalid("queue_item_id", format!("{}: {}", row.queue_item_id, e))
            })?,
            batch_job_id: row.batch_job_id,
            message: row.message,
            category: row.category,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::OperandType;

    fn record(item: QueueItemId, campaign: &str, at: i64) -> ErrorRecord {
        record_for_job(item, campaign, at, "job")
    }

    fn record_for_job(item: QueueItemId, campaign: &str, at: i64, job: &str) -> ErrorRecord {
        ErrorRecord {
            id: None,
            operand: OperandType::Keyword,
            account_id: "acct".to_string(),
            campaign_id: campaign.to_string(),
            queue_item_id: item,
            batch_job_id: Some(job.to_string()),
            message: "Keyword text too long".to_string(),
            category: "invalid_field".to_string(),
            created_at: at,
        }
    }

    #[tokio::test]
    async fn test_append_and_query() {
        let repo = SqliteErrorLogRepository::new(create_test_pool().await.unwrap());
        let item = QueueItemId::new();
        repo.append(&[
            record_for_job(item, "c-1", 1, "job-1"),
            record_for_job(item, "c-1", 2, "job-2"),
            record(QueueItemId::new(), "c-2", 3),
        ])
        .await
        .unwrap();

        let for_campaign = repo.find_by_campaign("c-1").await.unwrap();
        assert_eq!(for_campaign.len(), 2);
        assert_eq!(for_campaign[0].created_at, 2);
        assert!(for_campaign[0].id.is_some());

        assert_eq!(repo.find_by_account("acct").await.unwrap().len(), 3);
        assert_eq!(repo.count_for_item(&item).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_append_skips_record_already_logged_for_job() {
        let repo = SqliteErrorLogRepository::new(create_test_pool().await.unwrap());
        let item = QueueItemId::new();

        assert_eq!(repo.append(&[record(item, "c-1", 1)]).await.unwrap(), 1);
        assert_eq!(repo.append(&[record(item, "c-1", 5)]).await.unwrap(), 0);
        assert_eq!(repo.count_for_item(&item).await.unwrap(), 1);
    }
}
