//! # Batch Job Repository
//!
//! Persistence for [`BatchJob`]s.
//!
//! ## Overview
//!
//! Jobs live in `batch_jobs`; their ordered item ids live in
//! `batch_job_items(job_id, position, queue_item_id)` and are written once,
//! in the same transaction as the job row. `update` never touches the item
//! list.

use crate::job::{BatchJob, BatchJobId, BatchJobStatus};
use crate::remote::JobRef;
use crate::{BulkError, Result};
use async_trait::async_trait;
use core_catalog::{QueueItemId, QueueScope};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

// ============================================================================
// Repository Trait
// ============================================================================

#[async_trait]
pub trait BatchJobRepository: Send + Sync {
    /// Inserts the job together with its ordered item ids.
    async fn insert(&self, job: &BatchJob) -> Result<()>;

    /// Updates status, attempts, schedule and error fields.
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` if the job doesn't exist
    async fn update(&self, job: &BatchJob) -> Result<()>;

    async fn find_by_id(&self, id: &BatchJobId) -> Result<Option<BatchJob>>;

    /// Active jobs whose next poll is due at `now`, oldest schedule first.
    async fn find_due(&self, now: i64) -> Result<Vec<BatchJob>>;

    async fn find_active_for_scope(&self, scope: &QueueScope) -> Result<Vec<BatchJob>>;

    /// Deletes terminal jobs finished before `before`; returns how many.
    async fn prune_terminal(&self, before: i64) -> Result<u64>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

pub struct SqliteBatchJobRepository {
    pool: SqlitePool,
}

impl SqliteBatchJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_item_ids(&self, job_id: &str) -> Result<Vec<QueueItemId>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT queue_item_id FROM batch_job_items WHERE job_id = ? ORDER BY position ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id,)| {
                QueueItemId::from_string(&id)
                    .map_err(|e| BulkError::Database(format!("Invalid queue item id {id}: {e}")))
            })
            .collect()
    }

    async fn hydrate(&self, row: BatchJobRow) -> Result<BatchJob> {
        let item_ids = self.load_item_ids(&row.id).await?;
        row.into_job(item_ids)
    }

    async fn hydrate_all(&self, rows: Vec<BatchJobRow>) -> Result<Vec<BatchJob>> {
        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            jobs.push(self.hydrate(row).await?);
        }
        Ok(jobs)
    }
}

const SELECT_COLUMNS: &str = "SELECT id, account_id, operand, action, status, remote_job_id, \
     remote_resource, operation_count, attempts, next_poll_at, error_message, created_at, \
     updated_at, completed_at FROM batch_jobs";

#[derive(Debug, FromRow)]
struct BatchJobRow {
    id: String,
    account_id: String,
    operand: String,
    action: String,
    status: String,
    remote_job_id: String,
    remote_resource: String,
    operation_count: i64,
    attempts: i64,
    next_poll_at: i64,
    error_message: Option<String>,
    created_at: i64,
    updated_at: i64,
    completed_at: Option<i64>,
}

impl BatchJobRow {
    fn into_job(self, item_ids: Vec<QueueItemId>) -> Result<BatchJob> {
        Ok(BatchJob {
            id: BatchJobId::from_string(&self.id)?,
            account_id: self.account_id,
            operand: self.operand.parse()?,
            action: self.action.parse()?,
            status: self.status.parse::<BatchJobStatus>()?,
            remote: JobRef::new(self.remote_job_id, self.remote_resource),
            operation_count: usize::try_from(self.operation_count).map_err(|_| {
                BulkError::Database(format!("Invalid operation_count {}", self.operation_count))
            })?,
            attempts: u32::try_from(self.attempts)
                .map_err(|_| BulkError::Database(format!("Invalid attempts {}", self.attempts)))?,
            next_poll_at: self.next_poll_at,
            item_ids,
            error_message: self.error_message,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}

#[async_trait]
impl BatchJobRepository for SqliteBatchJobRepository {
    async fn insert(&self, job: &BatchJob) -> Result<()> {
        let id = job.id.as_str();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO batch_jobs (
                id, account_id, operand, action, status, remote_job_id, remote_resource,
                operation_count, attempts, next_poll_at, error_message,
                created_at, updated_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&job.account_id)
        .bind(job.operand.as_str())
        .bind(job.action.as_str())
        .bind(job.status.as_str())
        .bind(&job.remote.job_id)
        .bind(&job.remote.resource_name)
        .bind(job.operation_count as i64)
        .bind(i64::from(job.attempts))
        .bind(job.next_poll_at)
        .bind(&job.error_message)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.completed_at)
        .execute(&mut *tx)
        .await?;

        for (position, item_id) in job.item_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO batch_job_items (job_id, position, queue_item_id) VALUES (?, ?, ?)",
            )
            .bind(&id)
            .bind(position as i64)
            .bind(item_id.as_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(job_id = %job.id, items = job.item_ids.len(), "Persisted batch job");
        Ok(())
    }

    async fn update(&self, job: &BatchJob) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE batch_jobs SET
                status = ?,
                attempts = ?,
                next_poll_at = ?,
                error_message = ?,
                updated_at = ?,
                completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(i64::from(job.attempts))
        .bind(job.next_poll_at)
        .bind(&job.error_message)
        .bind(job.updated_at)
        .bind(job.completed_at)
        .bind(job.id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BulkError::JobNotFound {
                job_id: job.id.to_string(),
            });
        }

        Ok(())
    }

    async fn find_by_id(&self, id: &BatchJobId) -> Result<Option<BatchJob>> {
        let row = sqlx::query_as::<_, BatchJobRow>(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_due(&self, now: i64) -> Result<Vec<BatchJob>> {
        let rows = sqlx::query_as::<_, BatchJobRow>(&format!(
            "{} WHERE status = ? AND next_poll_at <= ? ORDER BY next_poll_at ASC, created_at ASC",
            SELECT_COLUMNS
        ))
        .bind(BatchJobStatus::PendingResult.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate_all(rows).await
    }

    async fn find_active_for_scope(&self, scope: &QueueScope) -> Result<Vec<BatchJob>> {
        let rows = sqlx::query_as::<_, BatchJobRow>(&format!(
            "{} WHERE account_id = ? AND operand = ? AND action = ? AND status = ? \
             ORDER BY created_at ASC",
            SELECT_COLUMNS
        ))
        .bind(&scope.account_id)
        .bind(scope.operand.as_str())
        .bind(scope.action.as_str())
        .bind(BatchJobStatus::PendingResult.as_str())
        .fetch_all(&self.pool)
        .await?;

        self.hydrate_all(rows).await
    }

    async fn prune_terminal(&self, before: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM batch_jobs WHERE status != ? AND completed_at IS NOT NULL \
             AND completed_at < ?",
        )
        .bind(BatchJobStatus::PendingResult.as_str())
        .bind(before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_catalog::db::create_test_pool;
    use core_catalog::{Action, OperandType};

    async fn repo() -> SqliteBatchJobRepository {
        SqliteBatchJobRepository::new(create_test_pool().await.unwrap())
    }

    fn job(next_poll_at: i64) -> BatchJob {
        let scope = QueueScope::new("acct", OperandType::Keyword, Action::Add);
        let ids = (0..3).map(|_| QueueItemId::new()).collect();
        BatchJob::new(
            &scope,
            JobRef::new("7", "customers/1/batchJobs/7"),
            ids,
            3,
            100,
            next_poll_at,
        )
    }

    #[tokio::test]
    async fn test_insert_preserves_item_order() {
        let repo = repo().await;
        let job = job(160);
        repo.insert(&job).await.unwrap();

        let loaded = repo.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.item_ids(), job.item_ids());
        assert_eq!(loaded, job);
    }

    #[tokio::test]
    async fn test_find_due_respects_schedule_and_status() {
        let repo = repo().await;
        let early = job(150);
        let late = job(500);
        let mut done = job(100);
        repo.insert(&early).await.unwrap();
        repo.insert(&late).await.unwrap();
        repo.insert(&done).await.unwrap();
        done.complete(120).unwrap();
        repo.update(&done).await.unwrap();

        let due = repo.find_due(200).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, early.id);
    }

    #[tokio::test]
    async fn test_update_missing_job_fails() {
        let repo = repo().await;
        let err = repo.update(&job(1)).await.unwrap_err();
        assert!(matches!(err, BulkError::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn test_prune_terminal_cascades_items() {
        let repo = repo().await;
        let mut old = job(100);
        let active = job(100);
        repo.insert(&old).await.unwrap();
        repo.insert(&active).await.unwrap();
        old.fail("boom", 200).unwrap();
        repo.update(&old).await.unwrap();

        assert_eq!(repo.prune_terminal(300).await.unwrap(), 1);
        assert!(repo.find_by_id(&old.id).await.unwrap().is_none());
        assert!(repo.find_by_id(&active.id).await.unwrap().is_some());
        assert!(repo.load_item_ids(&old.id.as_str()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_active_for_scope() {
        let repo = repo().await;
        let job = job(100);
        repo.insert(&job).await.unwrap();

        let scope = QueueScope::new("acct", OperandType::Keyword, Action::Add);
        assert_eq!(repo.find_active_for_scope(&scope).await.unwrap().len(), 1);
        let other = QueueScope::new("acct", OperandType::Ad, Action::Add);
        assert!(repo.find_active_for_scope(&other).await.unwrap().is_empty());
    }
}
