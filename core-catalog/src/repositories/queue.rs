//! Queue Store: pending changes per content type.
//!
//! Items are selected by scope, tagged with the job that carries them, and
//! finally either removed (promoted to the confirmed store) or left behind
//! with an error for operator visibility.

use crate::error::{CatalogError, Result};
use crate::models::{
    Action, ExemptionKey, ItemFailure, NaturalKey, OperandType, QueueItem, QueueItemId, QueueScope,
};
use crate::repositories::{push_in_list, BIND_CHUNK};
use async_trait::async_trait;
use sqlx::{query, query_as, FromRow, QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};

/// Queue repository interface
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Insert a new item.
    ///
    /// # Errors
    /// Fails when the item does not validate or the id already exists.
    async fn insert(&self, item: &QueueItem) -> Result<()>;

    async fn find_by_id(&self, id: &QueueItemId) -> Result<Option<QueueItem>>;

    /// Items with the given ids in unspecified order; unknown ids are skipped.
    async fn find_by_ids(&self, ids: &[QueueItemId]) -> Result<Vec<QueueItem>>;

    /// Oldest submittable items of a scope: no error, not in flight.
    async fn find_pending(&self, scope: &QueueScope, limit: usize) -> Result<Vec<QueueItem>>;

    /// Items of an account that carry an error.
    async fn find_errored(&self, account_id: &str) -> Result<Vec<QueueItem>>;

    async fn count_pending(&self, scope: &QueueScope) -> Result<i64>;

    /// Tags items as in flight with `job_id`.
    ///
    /// Write methods take `now` from the caller's clock for `updated_at`.
    async fn assign_job(&self, ids: &[QueueItemId], job_id: &str, now: i64) -> Result<u64>;

    /// Writes remote ids onto items.
    async fn set_external_ids(&self, ids: &[(QueueItemId, String)], now: i64) -> Result<u64>;

    /// Writes per-item failures.
    async fn set_errors(&self, failures: &[(QueueItemId, ItemFailure)], now: i64)
        -> Result<u64>;

    /// Sets the same message on a set of items.
    async fn set_error_for_ids(&self, ids: &[QueueItemId], message: &str, now: i64)
        -> Result<u64>;

    /// Sets `message` on every submittable item of the account across all
    /// content types.
    async fn mark_account_errors(&self, account_id: &str, message: &str, now: i64)
        -> Result<u64>;

    async fn remove_by_ids(&self, ids: &[QueueItemId]) -> Result<u64>;

    /// Removes every item of the given campaigns, optionally limited to one
    /// content type.
    async fn remove_by_campaigns(
        &self,
        campaign_ids: &[String],
        operand: Option<OperandType>,
    ) -> Result<u64>;

    /// Clears the error and in-flight marker so the item is selected again.
    ///
    /// Returns `false` when the item does not exist.
    async fn clear_error(&self, id: &QueueItemId, now: i64) -> Result<bool>;

    /// Acknowledges the item's reported policy findings as exemptions and
    /// clears its error.
    async fn grant_exemption(&self, id: &QueueItemId, now: i64) -> Result<bool>;
}

/// SQLite implementation of QueueRepository
pub struct SqliteQueueRepository {
    pool: SqlitePool,
}

impl SqliteQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "SELECT id, operand, action, account_id, campaign_id, ad_group_id, \
     template_id, parent_id, natural_text, attributes, external_id, error_message, \
     error_category, exemption_keys, policy_findings, batch_job_id, created_at, updated_at \
     FROM queue_items";

#[async_trait]
impl QueueRepository for SqliteQueueRepository {
    async fn insert(&self, item: &QueueItem) -> Result<()> {
        item.validate()?;

        query(
            r#"
            INSERT INTO queue_items (
                id, operand, action, account_id, campaign_id, ad_group_id, template_id,
                parent_id, natural_text, attributes, external_id, error_message,
                error_category, exemption_keys, policy_findings, batch_job_id,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.id.as_string())
        .bind(item.operand.as_str())
        .bind(item.action.as_str())
        .bind(&item.account_id)
        .bind(&item.campaign_id)
        .bind(&item.ad_group_id)
        .bind(&item.template_id)
        .bind(&item.natural_key.parent_id)
        .bind(&item.natural_key.text)
        .bind(serde_json::to_string(&item.attributes)?)
        .bind(&item.external_id)
        .bind(&item.error_message)
        .bind(&item.error_category)
        .bind(serde_json::to_string(&item.exemption_keys)?)
        .bind(serde_json::to_string(&item.policy_findings)?)
        .bind(&item.batch_job_id)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(item_id = %item.id, operand = %item.operand, action = %item.action, "Queued item");
        Ok(())
    }

    async fn find_by_id(&self, id: &QueueItemId) -> Result<Option<QueueItem>> {
        let row = query_as::<_, QueueItemRow>(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id.as_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(QueueItem::try_from).transpose()
    }

    async fn find_by_ids(&self, ids: &[QueueItemId]) -> Result<Vec<QueueItem>> {
        let ids: Vec<String> = ids.iter().map(QueueItemId::as_string).collect();
        let mut items = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(BIND_CHUNK) {
            let mut builder = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
            builder.push(" WHERE id");
            push_in_list(&mut builder, chunk);

            let rows = builder
                .build_query_as::<QueueItemRow>()
                .fetch_all(&self.pool)
                .await?;
            for row in rows {
                items.push(QueueItem::try_from(row)?);
            }
        }

        Ok(items)
    }

    async fn find_pending(&self, scope: &QueueScope, limit: usize) -> Result<Vec<QueueItem>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = query_as::<_, QueueItemRow>(&format!(
            "{} WHERE account_id = ? AND operand = ? AND action = ? \
             AND (error_message IS NULL OR error_message = '') \
             AND batch_job_id IS NULL \
             ORDER BY created_at ASC, id ASC LIMIT ?",
            SELECT_COLUMNS
        ))
        .bind(&scope.account_id)
        .bind(scope.operand.as_str())
        .bind(scope.action.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(QueueItem::try_from).collect()
    }

    async fn find_errored(&self, account_id: &str) -> Result<Vec<QueueItem>> {
        let rows = query_as::<_, QueueItemRow>(&format!(
            "{} WHERE account_id = ? AND error_message IS NOT NULL AND error_message != '' \
             ORDER BY updated_at DESC, id ASC",
            SELECT_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(QueueItem::try_from).collect()
    }

    async fn count_pending(&self, scope: &QueueScope) -> Result<i64> {
        let count: (i64,) = query_as(
            "SELECT COUNT(*) FROM queue_items WHERE account_id = ? AND operand = ? AND action = ? \
             AND (error_message IS NULL OR error_message = '') AND batch_job_id IS NULL",
        )
        .bind(&scope.account_id)
        .bind(scope.operand.as_str())
        .bind(scope.action.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0)
    }

    async fn assign_job(&self, ids: &[QueueItemId], job_id: &str, now: i64) -> Result<u64> {
        let ids: Vec<String> = ids.iter().map(QueueItemId::as_string).collect();
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;

        for chunk in ids.chunks(BIND_CHUNK) {
            let mut builder = QueryBuilder::<Sqlite>::new("UPDATE queue_items SET batch_job_id = ");
            builder.push_bind(job_id.to_string());
            builder.push(", updated_at = ");
            builder.push_bind(now);
            builder.push(" WHERE id");
            push_in_list(&mut builder, chunk);
            affected += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(affected)
    }

    async fn set_external_ids(&self, ids: &[(QueueItemId, String)], now: i64) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;

        for (id, external_id) in ids {
            affected += query("UPDATE queue_items SET external_id = ?, updated_at = ? WHERE id = ?")
                .bind(external_id)
                .bind(now)
                .bind(id.as_string())
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;
        Ok(affected)
    }

    async fn set_errors(
        &self,
        failures: &[(QueueItemId, ItemFailure)],
        now: i64,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;

        for (id, failure) in failures {
            affected += query(
                "UPDATE queue_items SET error_message = ?, error_category = ?, \
                 policy_findings = ?, updated_at = ? WHERE id = ?",
            )
            .bind(&failure.message)
            .bind(&failure.category)
            .bind(serde_json::to_string(&failure.policy_findings)?)
            .bind(now)
            .bind(id.as_string())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        Ok(affected)
    }

    async fn set_error_for_ids(
        &self,
        ids: &[QueueItemId],
        message: &str,
        now: i64,
    ) -> Result<u64> {
        let ids: Vec<String> = ids.iter().map(QueueItemId::as_string).collect();
        let mut tx = self.pool.begin().await?;
        let mut affected = 0;

        for chunk in ids.chunks(BIND_CHUNK) {
            let mut builder = QueryBuilder::<Sqlite>::new("UPDATE queue_items SET error_message = ");
            builder.push_bind(message.to_string());
            builder.push(", updated_at = ");
            builder.push_bind(now);
            builder.push(" WHERE id");
            push_in_list(&mut builder, chunk);
            affected += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(affected)
    }

    async fn mark_account_errors(
        &self,
        account_id: &str,
        message: &str,
        now: i64,
    ) -> Result<u64> {
        let result = query(
            "UPDATE queue_items SET error_message = ?, error_category = NULL, updated_at = ? \
             WHERE account_id = ? AND (error_message IS NULL OR error_message = '') \
             AND batch_job_id IS NULL",
        )
        .bind(message)
        .bind(now)
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        info!(
            account_id = %account_id,
            items = result.rows_affected(),
            "Marked account queue with submission error"
        );
        Ok(result.rows_affected())
    }

    async fn remove_by_ids(&self, ids: &[QueueItemId]) -> Result<u64> {
        let ids: Vec<String> = ids.iter().map(QueueItemId::as_string).collect();
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;

        for chunk in ids.chunks(BIND_CHUNK) {
            let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM queue_items WHERE id");
            push_in_list(&mut builder, chunk);
            removed += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    async fn remove_by_campaigns(
        &self,
        campaign_ids: &[String],
        operand: Option<OperandType>,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;

        for chunk in campaign_ids.chunks(BIND_CHUNK) {
            let mut builder =
                QueryBuilder::<Sqlite>::new("DELETE FROM queue_items WHERE campaign_id");
            push_in_list(&mut builder, chunk);
            if let Some(operand) = operand {
                builder.push(" AND operand = ");
                builder.push_bind(operand.as_str());
            }
            removed += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    async fn clear_error(&self, id: &QueueItemId, now: i64) -> Result<bool> {
        let result = query(
            "UPDATE queue_items SET error_message = NULL, error_category = NULL, \
             batch_job_id = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(id.as_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn grant_exemption(&self, id: &QueueItemId, now: i64) -> Result<bool> {
        let Some(item) = self.find_by_id(id).await? else {
            return Ok(false);
        };

        if item.policy_findings.is_empty() {
            return Err(CatalogError::invalid(
                "policy_findings",
                format!("item {} has no exemptible policy findings", id),
            ));
        }

        let mut keys = item.exemption_keys;
        for finding in item.policy_findings {
            if !keys.contains(&finding) {
                keys.push(finding);
            }
        }

        query(
            "UPDATE queue_items SET exemption_keys = ?, policy_findings = '[]', \
             error_message = NULL, error_category = NULL, batch_job_id = NULL, updated_at = ? \
             WHERE id = ?",
        )
        .bind(serde_json::to_string(&keys)?)
        .bind(now)
        .bind(id.as_string())
        .execute(&self.pool)
        .await?;

        info!(item_id = %id, exemptions = keys.len(), "Granted policy exemption");
        Ok(true)
    }
}

// =============================================================================
// Row mapping
// =============================================================================

#[derive(Debug, FromRow)]
struct QueueItemRow {
    id: String,
    operand: String,
    action: String,
    account_id: String,
    campaign_id: String,
    ad_group_id: Option<String>,
    template_id: Option<String>,
    parent_id: String,
    natural_text: String,
    attributes: String,
    external_id: Option<String>,
    error_message: Option<String>,
    error_category: Option<String>,
    exemption_keys: String,
    policy_findings: String,
    batch_job_id: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<QueueItemRow> for QueueItem {
    type Error = CatalogError;

    fn try_from(row: QueueItemRow) -> Result<Self> {
        let id = QueueItemId::from_string(&row.id)
            .map_err(|e| CatalogError::invalid("id", format!("{}: {}", row.id, e)))?;
        let operand: OperandType = row.operand.parse()?;
        let action: Action = row.action.parse()?;
        let exemption_keys: Vec<ExemptionKey> = serde_json::from_str(&row.exemption_keys)?;
        let policy_findings: Vec<ExemptionKey> = serde_json::from_str(&row.policy_findings)?;

        Ok(QueueItem {
            id,
            operand,
            action,
            account_id: row.account_id,
            campaign_id: row.campaign_id,
            ad_group_id: row.ad_group_id,
            template_id: row.template_id,
            natural_key: NaturalKey::new(row.parent_id, row.natural_text),
            attributes: serde_json::from_str(&row.attributes)?,
            external_id: row.external_id,
            error_message: row.error_message,
            error_category: row.error_category,
            exemption_keys,
            policy_findings,
            batch_job_id: row.batch_job_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
