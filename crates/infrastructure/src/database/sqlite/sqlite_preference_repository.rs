use async_trait::async_trait;
use broadcaster_core::BroadcastResult;
use broadcaster_domain::{
    categories::AlertCategory,
    entities::{LocalePreference, PremiumOverride},
    repositories::PreferenceRepository,
};
use sqlx::{Row, SqlitePool};
use tracing::debug;

pub struct SqlitePreferenceRepository {
    pool: SqlitePool,
}

impl SqlitePreferenceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PreferenceRepository for SqlitePreferenceRepository {
    async fn find_locale(&self, tenant_id: i64) -> BroadcastResult<Option<LocalePreference>> {
        let row = sqlx::query(
            "SELECT tenant_id, locale, set_by, updated_at FROM tenant_locales WHERE tenant_id = ?",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(LocalePreference {
                tenant_id: row.try_get("tenant_id")?,
                locale: row.try_get("locale")?,
                set_by: row.try_get("set_by")?,
                updated_at: row.try_get("updated_at")?,
            })),
            None => Ok(None),
        }
    }

    async fn save_locale(&self, preference: &LocalePreference) -> BroadcastResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_locales (tenant_id, locale, set_by, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(tenant_id) DO UPDATE SET
                locale = excluded.locale,
                set_by = excluded.set_by,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(preference.tenant_id)
        .bind(&preference.locale)
        .bind(preference.set_by)
        .bind(preference.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("保存语言偏好: tenant={} locale={}", preference.tenant_id, preference.locale);
        Ok(())
    }

    async fn delete_locale(&self, tenant_id: i64) -> BroadcastResult<bool> {
        let result = sqlx::query("DELETE FROM tenant_locales WHERE tenant_id = ?")
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_premium_override(
        &self,
        tenant_id: i64,
        category: AlertCategory,
    ) -> BroadcastResult<Option<PremiumOverride>> {
        let row = sqlx::query(
            "SELECT tenant_id, category, text, updated_at FROM premium_overrides WHERE tenant_id = ? AND category = ?",
        )
        .bind(tenant_id)
        .bind(category)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(PremiumOverride {
                tenant_id: row.try_get("tenant_id")?,
                category: row.try_get("category")?,
                text: row.try_get("text")?,
                updated_at: row.try_get("updated_at")?,
            })),
            None => Ok(None),
        }
    }

    async fn save_premium_override(&self, premium: &PremiumOverride) -> BroadcastResult<()> {
        sqlx::query(
            r#"
            INSERT INTO premium_overrides (tenant_id, category, text, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(tenant_id, category) DO UPDATE SET
                text = excluded.text,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(premium.tenant_id)
        .bind(premium.category)
        .bind(&premium.text)
        .bind(premium.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_premium_override(
        &self,
        tenant_id: i64,
        category: AlertCategory,
    ) -> BroadcastResult<bool> {
        let result =
            sqlx::query("DELETE FROM premium_overrides WHERE tenant_id = ? AND category = ?")
                .bind(tenant_id)
                .bind(category)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_tenant(&self, tenant_id: i64) -> BroadcastResult<u64> {
        let mut tx = self.pool.begin().await?;
        let overrides = sqlx::query("DELETE FROM premium_overrides WHERE tenant_id = ?")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;
        let locales = sqlx::query("DELETE FROM tenant_locales WHERE tenant_id = ?")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(overrides.rows_affected() + locales.rows_affected())
    }
}
