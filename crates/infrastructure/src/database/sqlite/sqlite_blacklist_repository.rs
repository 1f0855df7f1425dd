use async_trait::async_trait;
use broadcaster_core::BroadcastResult;
use broadcaster_domain::{entities::BlacklistEntry, repositories::BlacklistRepository};
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::info;

pub struct SqliteBlacklistRepository {
    pool: SqlitePool,
}

impl SqliteBlacklistRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &SqliteRow) -> BroadcastResult<BlacklistEntry> {
        Ok(BlacklistEntry {
            tenant_id: row.try_get("tenant_id")?,
            strikes: row.try_get("strikes")?,
            last_strike_at: row.try_get("last_strike_at")?,
        })
    }
}

#[async_trait]
impl BlacklistRepository for SqliteBlacklistRepository {
    async fn find(&self, tenant_id: i64) -> BroadcastResult<Option<BlacklistEntry>> {
        let row = sqlx::query(
            "SELECT tenant_id, strikes, last_strike_at FROM tenant_blacklist WHERE tenant_id = ?",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_entry).transpose()
    }

    async fn add_strike(&self, tenant_id: i64) -> BroadcastResult<BlacklistEntry> {
        let row = sqlx::query(
            r#"
            INSERT INTO tenant_blacklist (tenant_id, strikes, last_strike_at)
            VALUES (?, 1, ?)
            ON CONFLICT(tenant_id) DO UPDATE SET
                strikes = tenant_blacklist.strikes + 1,
                last_strike_at = excluded.last_strike_at
            RETURNING tenant_id, strikes, last_strike_at
            "#,
        )
        .bind(tenant_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        let entry = Self::row_to_entry(&row)?;
        info!("租户 {} 警告次数增加到 {}", entry.tenant_id, entry.strikes);
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;

    #[tokio::test]
    async fn test_strikes_accumulate() {
        let manager = DatabaseManager::in_memory().await.unwrap();
        manager.migrate().await.unwrap();
        let repo = SqliteBlacklistRepository::new(manager.pool().clone());

        assert!(repo.find(11).await.unwrap().is_none());
        assert_eq!(repo.add_strike(11).await.unwrap().strikes, 1);
        assert_eq!(repo.add_strike(11).await.unwrap().strikes, 2);
        assert_eq!(repo.find(11).await.unwrap().unwrap().strikes, 2);
    }
}
