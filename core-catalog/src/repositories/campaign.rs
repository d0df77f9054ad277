//! Campaign directory used to resolve campaign references.

use crate::error::Result;
use crate::models::Campaign;
use async_trait::async_trait;
use sqlx::{query, query_as, FromRow, SqlitePool};

#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn upsert(&self, campaign: &Campaign, now: i64) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Campaign>>;

    async fn find_by_account(&self, account_id: &str) -> Result<Vec<Campaign>>;
}

pub struct SqliteCampaignRepository {
    pool: SqlitePool,
}

impl SqliteCampaignRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignRepository for SqliteCampaignRepository {
    async fn upsert(&self, campaign: &Campaign, now: i64) -> Result<()> {
        query(
            r#"
            INSERT INTO campaigns (id, account_id, external_id, name, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                account_id = excluded.account_id,
                external_id = excluded.external_id,
                name = excluded.name,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&campaign.id)
        .bind(&campaign.account_id)
        .bind(&campaign.external_id)
        .bind(&campaign.name)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Campaign>> {
        let row = query_as::<_, CampaignRow>(
            "SELECT id, account_id, external_id, name FROM campaigns WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Campaign::from))
    }

    async fn find_by_account(&self, account_id: &str) -> Result<Vec<Campaign>> {
        let rows = query_as::<_, CampaignRow>(
            "SELECT id, account_id, external_id, name FROM campaigns WHERE account_id = ? ORDER BY id",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Campaign::from).collect())
    }
}

#[derive(Debug, FromRow)]
struct CampaignRow {
    id: String,
    account_id: String,
    external_id: Option<String>,
    name: String,
}

impl From<CampaignRow> for Campaign {
    fn from(row: CampaignRow) -> Self {
        Campaign {
            id: row.id,
            account_id: row.account_id,
            external_id: row.external_id,
            name: row.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    #[tokio::test]
    async fn test_upsert_updates_external_id() {
        let repo = SqliteCampaignRepository::new(create_test_pool().await.unwrap());
        repo.upsert(&Campaign::new("c-1", "acct", "Spring"), 1).await.unwrap();
        repo.upsert(&Campaign::new("c-1", "acct", "Spring").with_external_id("900"), 2)
            .await
            .unwrap();
        repo.upsert(&Campaign::new("c-2", "other", "Elsewhere"), 3).await.unwrap();

        let campaigns = repo.find_by_account("acct").await.unwrap();
        assert_eq!(campaigns.len(), 1);
        assert_eq!(campaigns[0].external_id.as_deref(), Some("900"));
        assert!(repo.find_by_id("missing").await.unwrap().is_none());
    }
}
