//! Confirmed Store: entities the remote platform has acknowledged.

use crate::error::{CatalogError, Result};
use crate::models::{ConfirmedEntity, NaturalKey, OperandType};
use crate::repositories::{push_in_list, BIND_CHUNK};
use async_trait::async_trait;
use sqlx::{query, query_as, FromRow, QueryBuilder, Sqlite, SqlitePool};

#[async_trait]
pub trait ConfirmedRepository: Send + Sync {
    /// Inserts or replaces entities keyed by `(operand, local_id)`.
    ///
    /// An existing row with the same `(operand, external_id)` is replaced as
    /// well, so re-confirming a remote entity never duplicates it.
    async fn upsert_many(&self, entities: &[ConfirmedEntity]) -> Result<u64>;

    /// Removes every entity of `operand` carrying one of the remote ids.
    async fn remove_by_external_ids(
        &self,
        operand: OperandType,
        external_ids: &[String],
    ) -> Result<u64>;

    async fn find_by_local_id(
        &self,
        operand: OperandType,
        local_id: &str,
    ) -> Result<Option<ConfirmedEntity>>;

    async fn find_by_account(
        &self,
        account_id: &str,
        operand: OperandType,
    ) -> Result<Vec<ConfirmedEntity>>;
}

pub struct SqliteConfirmedRepository {
    pool: SqlitePool,
}

impl SqliteConfirmedRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfirmedRepository for SqliteConfirmedRepository {
    async fn upsert_many(&self, entities: &[ConfirmedEntity]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for entity in entities {
            written += query(
                r#"
                INSERT OR REPLACE INTO confirmed_entities (
                    operand, local_id, account_id, campaign_id, ad_group_id,
                    parent_id, natural_text, external_id, confirmed_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(entity.operand.as_str())
            .bind(&entity.local_id)
            .bind(&entity.account_id)
            .bind(&entity.campaign_id)
            .bind(&entity.ad_group_id)
            .bind(&entity.natural_key.parent_id)
            .bind(&entity.natural_key.text)
            .bind(&entity.external_id)
            .bind(entity.confirmed_at)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn remove_by_external_ids(
        &self,
        operand: OperandType,
        external_ids: &[String],
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;

        for chunk in external_ids.chunks(BIND_CHUNK) {
            let mut builder =
                QueryBuilder::<Sqlite>::new("DELETE FROM confirmed_entities WHERE operand = ");
            builder.push_bind(operand.as_str());
            builder.push(" AND external_id");
            push_in_list(&mut builder, chunk);
            removed += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    async fn find_by_local_id(
        &self,
        operand: OperandType,
        local_id: &str,
    ) -> Result<Option<ConfirmedEntity>> {
        let row = query_as::<_, ConfirmedRow>(
            "SELECT * FROM confirmed_entities WHERE operand = ? AND local_id = ?",
        )
        .bind(operand.as_str())
        .bind(local_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ConfirmedEntity::try_from).transpose()
    }

    async fn find_by_account(
        &self,
        account_id: &str,
        operand: OperandType,
    ) -> Result<Vec<ConfirmedEntity>> {
        let rows = query_as::<_, ConfirmedRow>(
            "SELECT * FROM confirmed_entities WHERE account_id = ? AND operand = ? \
             ORDER BY confirmed_at ASC, local_id ASC",
        )
        .bind(account_id)
        .bind(operand.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ConfirmedEntity::try_from).collect()
    }
}

#[derive(Debug, FromRow)]
struct ConfirmedRow {
    operand: String,
    local_id: String,
    account_id: String,
    campaign_id: String,
    ad_group_id: Option<String>,
    parent_id: String,
    natural_text: String,
    external_id: String,
    confirmed_at: i64,
}

impl TryFrom<ConfirmedRow> for ConfirmedEntity {
    type Error = CatalogError;

    fn try_from(row: ConfirmedRow) -> Result<Self> {
        Ok(ConfirmedEntity {
            operand: row.operand.parse()?,
            local_id: row.local_id,
            account_id: row.account_id,
            campaign_id: row.campaign_id,
            ad_group_id: row.ad_group_id,
            natural_key: NaturalKey::new(row.parent_id, row.natural_text),
            external_id: row.external_id,
            confirmed_at: row.confirmed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    fn group(local_id: &str, external_id: &str) -> ConfirmedEntity {
        ConfirmedEntity {
            operand: OperandType::AdGroup,
            local_id: local_id.to_string(),
            account_id: "acct".to_string(),
            campaign_id: "c-1".to_string(),
            ad_group_id: Some(local_id.to_string()),
            natural_key: NaturalKey::ad_group("c-1", local_id),
            external_id: external_id.to_string(),
            confirmed_at: 10,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_local_id() {
        let repo = SqliteConfirmedRepository::new(create_test_pool().await.unwrap());
        repo.upsert_many(&[group("ag-1", "100")]).await.unwrap();
        repo.upsert_many(&[group("ag-1", "200")]).await.unwrap();

        let found = repo
            .find_by_local_id(OperandType::AdGroup, "ag-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.external_id, "200");
        assert_eq!(
            repo.find_by_account("acct", OperandType::AdGroup)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_remove_by_external_ids_is_operand_scoped() {
        let repo = SqliteConfirmedRepository::new(create_test_pool().await.unwrap());
        let mut keyword = group("kw-1", "100");
        keyword.operand = OperandType::Keyword;
        repo.upsert_many(&[group("ag-1", "100"), keyword]).await.unwrap();

        let removed = repo
            .remove_by_external_ids(OperandType::AdGroup, &["100".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(repo
            .find_by_local_id(OperandType::Keyword, "kw-1")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_upsert_replaces_row_with_same_external_id() {
        let repo = SqliteConfirmedRepository::new(create_test_pool().await.unwrap());
        repo.upsert_many(&[group("queue-item-1", "100")]).await.unwrap();

        let mut renamed = group("queue-item-2", "100");
        renamed.natural_key = NaturalKey::ad_group("c-1", "Renamed");
        repo.upsert_many(&[renamed.clone()]).await.unwrap();

        let rows = repo
            .find_by_account("acct", OperandType::AdGroup)
            .await
            .unwrap();
        assert_eq!(rows, vec![renamed]);
    }
}
