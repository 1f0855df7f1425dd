use async_trait::async_trait;
use broadcaster_core::BroadcastResult;
use broadcaster_domain::{
    categories::AlertCategory,
    entities::{
        DispatchCandidate, EligibilityPredicate, MuteWindow, RegistrationSchedule,
        ScheduleColumns, TenantAlertRegistration,
    },
    repositories::RegistrationRepository,
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::debug;

const REGISTRATION_COLUMNS: &str = "tenant_id, category, destination_id, audience_tag_id, registered_by, \
     reset_weekday, reset_hour, early_warning, auto_delete, registered_at";

const ELIGIBLE_UNMUTED_BUCKET: &str = r#"
    SELECT r.tenant_id, r.destination_id, r.audience_tag_id, r.auto_delete
    FROM tenant_registrations r
    LEFT JOIN mute_windows m ON m.tenant_id = r.tenant_id AND m.category = r.category
    WHERE r.category = ? AND r.early_warning = ?
      AND (m.muted_mask IS NULL OR (m.muted_mask & ?) = 0)
    ORDER BY r.tenant_id
"#;

const ELIGIBLE_RESET_WEEKDAY: &str = r#"
    SELECT tenant_id, destination_id, audience_tag_id, auto_delete
    FROM tenant_registrations
    WHERE category = ? AND reset_weekday = ?
    ORDER BY tenant_id
"#;

const ELIGIBLE_RESET_HOUR: &str = r#"
    SELECT tenant_id, destination_id, audience_tag_id, auto_delete
    FROM tenant_registrations
    WHERE category = ? AND reset_hour = ?
    ORDER BY tenant_id
"#;

const ELIGIBLE_ALL: &str = r#"
    SELECT tenant_id, destination_id, audience_tag_id, auto_delete
    FROM tenant_registrations
    WHERE category = ?
    ORDER BY tenant_id
"#;

pub struct SqliteRegistrationRepository {
    pool: SqlitePool,
}

impl SqliteRegistrationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_registration(row: &SqliteRow) -> BroadcastResult<TenantAlertRegistration> {
        let category: AlertCategory = row.try_get("category")?;
        let columns = ScheduleColumns {
            reset_weekday: row.try_get("reset_weekday")?,
            reset_hour: row.try_get("reset_hour")?,
            early_warning: row.try_get("early_warning")?,
        };

        Ok(TenantAlertRegistration {
            tenant_id: row.try_get("tenant_id")?,
            category,
            destination_id: row.try_get("destination_id")?,
            audience_tag_id: row.try_get("audience_tag_id")?,
            registered_by: row.try_get("registered_by")?,
            schedule: RegistrationSchedule::from_columns(category, columns)?,
            auto_delete: row.try_get("auto_delete")?,
            registered_at: row.try_get("registered_at")?,
        })
    }

    fn row_to_candidate(row: &SqliteRow) -> BroadcastResult<DispatchCandidate> {
        Ok(DispatchCandidate {
            tenant_id: row.try_get("tenant_id")?,
            destination_id: row.try_get("destination_id")?,
            audience_tag_id: row.try_get("audience_tag_id")?,
            auto_delete: row.try_get("auto_delete")?,
        })
    }
}

#[async_trait]
impl RegistrationRepository for SqliteRegistrationRepository {
    async fn upsert(&self, registration: &TenantAlertRegistration) -> BroadcastResult<()> {
        let columns = registration.schedule.to_columns();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO tenant_registrations (tenant_id, category, destination_id, audience_tag_id, registered_by,
                reset_weekday, reset_hour, early_warning, auto_delete, registered_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(tenant_id, category) DO UPDATE SET
                destination_id = excluded.destination_id,
                audience_tag_id = excluded.audience_tag_id,
                registered_by = excluded.registered_by,
                reset_weekday = excluded.reset_weekday,
                reset_hour = excluded.reset_hour,
                early_warning = excluded.early_warning,
                auto_delete = excluded.auto_delete,
                registered_at = excluded.registered_at
            "#,
        )
        .bind(registration.tenant_id)
        .bind(registration.category)
        .bind(registration.destination_id)
        .bind(registration.audience_tag_id)
        .bind(registration.registered_by)
        .bind(columns.reset_weekday)
        .bind(columns.reset_hour)
        .bind(columns.early_warning)
        .bind(registration.auto_delete)
        .bind(registration.registered_at)
        .execute(&mut *tx)
        .await?;

        if registration.category.has_mute_window() {
            sqlx::query(
                "INSERT INTO mute_windows (tenant_id, category, muted_mask) VALUES (?, ?, 0) \
                 ON CONFLICT(tenant_id, category) DO NOTHING",
            )
            .bind(registration.tenant_id)
            .bind(registration.category)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            "保存注册成功: tenant={} category={}",
            registration.tenant_id, registration.category
        );
        Ok(())
    }

    async fn find(
        &self,
        tenant_id: i64,
        category: AlertCategory,
    ) -> BroadcastResult<Option<TenantAlertRegistration>> {
        let sql = format!(
            "SELECT {REGISTRATION_COLUMNS} FROM tenant_registrations WHERE tenant_id = ? AND category = ?"
        );
        let row = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(category)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_registration).transpose()
    }

    async fn find_by_tenant(&self, tenant_id: i64) -> BroadcastResult<Vec<TenantAlertRegistration>> {
        let sql = format!(
            "SELECT {REGISTRATION_COLUMNS} FROM tenant_registrations WHERE tenant_id = ? ORDER BY category"
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_registration).collect()
    }

    async fn find_eligible(
        &self,
        category: AlertCategory,
        predicate: EligibilityPredicate,
    ) -> BroadcastResult<Vec<DispatchCandidate>> {
        let query = match predicate {
            EligibilityPredicate::UnmutedBucket {
                bucket,
                early_warning,
            } => sqlx::query(ELIGIBLE_UNMUTED_BUCKET)
                .bind(category)
                .bind(early_warning)
                .bind(1i64 << bucket),
            EligibilityPredicate::ResetWeekday(day) => sqlx::query(ELIGIBLE_RESET_WEEKDAY)
                .bind(category)
                .bind(i64::from(day)),
            EligibilityPredicate::ResetHour(hour) => sqlx::query(ELIGIBLE_RESET_HOUR)
                .bind(category)
                .bind(i64::from(hour)),
            EligibilityPredicate::All => sqlx::query(ELIGIBLE_ALL).bind(category),
        };

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_candidate).collect()
    }

    async fn delete(&self, tenant_id: i64, category: AlertCategory) -> BroadcastResult<bool> {
        let mut tx = self.pool.begin().await?;

        let result =
            sqlx::query("DELETE FROM tenant_registrations WHERE tenant_id = ? AND category = ?")
                .bind(tenant_id)
                .bind(category)
                .execute(&mut *tx)
                .await?;
        sqlx::query("DELETE FROM mute_windows WHERE tenant_id = ? AND category = ?")
            .bind(tenant_id)
            .bind(category)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_tenant(&self, tenant_id: i64) -> BroadcastResult<u64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM tenant_registrations WHERE tenant_id = ?")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM mute_windows WHERE tenant_id = ?")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn delete_by_destination(&self, destination_id: i64) -> BroadcastResult<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM mute_windows WHERE EXISTS (
                SELECT 1 FROM tenant_registrations r
                WHERE r.tenant_id = mute_windows.tenant_id
                  AND r.category = mute_windows.category
                  AND r.destination_id = ?
            )
            "#,
        )
        .bind(destination_id)
        .execute(&mut *tx)
        .await?;
        let result = sqlx::query("DELETE FROM tenant_registrations WHERE destination_id = ?")
            .bind(destination_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn save_mute_window(&self, window: &MuteWindow) -> BroadcastResult<()> {
        sqlx::query(
            "INSERT INTO mute_windows (tenant_id, category, muted_mask) VALUES (?, ?, ?) \
             ON CONFLICT(tenant_id, category) DO UPDATE SET muted_mask = excluded.muted_mask",
        )
        .bind(window.tenant_id)
        .bind(window.category)
        .bind(i64::from(window.muted_mask))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_mute_window(
        &self,
        tenant_id: i64,
        category: AlertCategory,
    ) -> BroadcastResult<Option<MuteWindow>> {
        let row = sqlx::query(
            "SELECT tenant_id, category, muted_mask FROM mute_windows WHERE tenant_id = ? AND category = ?",
        )
        .bind(tenant_id)
        .bind(category)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(MuteWindow {
                tenant_id: row.try_get("tenant_id")?,
                category: row.try_get("category")?,
                muted_mask: row.try_get::<i64, _>("muted_mask")? as u32,
            })),
            None => Ok(None),
        }
    }

    async fn count_tenants(&self) -> BroadcastResult<u64> {
        let row = sqlx::query("SELECT COUNT(DISTINCT tenant_id) AS count FROM tenant_registrations")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("count")?.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;
    use chrono::Utc;

    async fn setup_test_db() -> SqlitePool {
        let manager = DatabaseManager::in_memory().await.unwrap();
        manager.migrate().await.unwrap();
        manager.pool().clone()
    }

    fn registration(tenant_id: i64, category: AlertCategory) -> TenantAlertRegistration {
        TenantAlertRegistration {
            tenant_id,
            category,
            destination_id: tenant_id * 10,
            audience_tag_id: Some(tenant_id * 100),
            registered_by: 1,
            schedule: RegistrationSchedule::default_for(category)
                .unwrap_or(RegistrationSchedule::FixedHour { hour: 6 }),
            auto_delete: false,
            registered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_row() {
        let repo = SqliteRegistrationRepository::new(setup_test_db().await);
        let mut reg = registration(1, AlertCategory::CrateRespawn);
        repo.upsert(&reg).await.unwrap();

        reg.destination_id = 999;
        reg.auto_delete = true;
        repo.upsert(&reg).await.unwrap();

        let rows = repo.find_by_tenant(1).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].destination_id, 999);
        assert!(rows[0].auto_delete);
    }

    #[tokio::test]
    async fn test_upsert_creates_mute_row_and_keeps_existing_mask() {
        let repo = SqliteRegistrationRepository::new(setup_test_db().await);
        let reg = registration(1, AlertCategory::CargoScramble);
        repo.upsert(&reg).await.unwrap();

        let window = repo
            .find_mute_window(1, AlertCategory::CargoScramble)
            .await
            .unwrap()
            .unwrap();
        assert!(window.muted_buckets().is_empty());

        let muted = MuteWindow::from_buckets(1, AlertCategory::CargoScramble, &[2]).unwrap();
        repo.save_mute_window(&muted).await.unwrap();
        repo.upsert(&reg).await.unwrap();
        let window = repo
            .find_mute_window(1, AlertCategory::CargoScramble)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(window.muted_buckets(), vec![2]);

        repo.upsert(&registration(1, AlertCategory::Medics))
            .await
            .unwrap();
        assert!(repo
            .find_mute_window(1, AlertCategory::Medics)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_upsert_rolls_back_when_mute_row_fails() {
        let pool = setup_test_db().await;
        let repo = SqliteRegistrationRepository::new(pool.clone());
        sqlx::query("DROP TABLE mute_windows")
            .execute(&pool)
            .await
            .unwrap();

        assert!(repo
            .upsert(&registration(1, AlertCategory::CrateRespawn))
            .await
            .is_err());
        assert!(repo
            .find(1, AlertCategory::CrateRespawn)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unmuted_bucket_filter() {
        let repo = SqliteRegistrationRepository::new(setup_test_db().await);
        for tenant in [1, 2, 3] {
            repo.upsert(&registration(tenant, AlertCategory::CrateRespawn))
                .await
                .unwrap();
        }
        let muted = MuteWindow::from_buckets(2, AlertCategory::CrateRespawn, &[0]).unwrap();
        repo.save_mute_window(&muted).await.unwrap();

        let predicate = EligibilityPredicate::UnmutedBucket {
            bucket: 0,
            early_warning: false,
        };
        let candidates = repo
            .find_eligible(AlertCategory::CrateRespawn, predicate)
            .await
            .unwrap();
        let ids: Vec<i64> = candidates.iter().map(|c| c.tenant_id).collect();
        assert_eq!(ids, vec![1, 3]);

        let other_bucket = EligibilityPredicate::UnmutedBucket {
            bucket: 1,
            early_warning: false,
        };
        let candidates = repo
            .find_eligible(AlertCategory::CrateRespawn, other_bucket)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 3);
    }

    #[tokio::test]
    async fn test_early_warning_split() {
        let repo = SqliteRegistrationRepository::new(setup_test_db().await);
        let standard = registration(1, AlertCategory::CargoScramble);
        let mut early = registration(2, AlertCategory::CargoScramble);
        early.schedule = RegistrationSchedule::Interval {
            early_warning: true,
        };
        repo.upsert(&standard).await.unwrap();
        repo.upsert(&early).await.unwrap();

        let early_only = repo
            .find_eligible(
                AlertCategory::CargoScramble,
                EligibilityPredicate::UnmutedBucket {
                    bucket: 2,
                    early_warning: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(early_only.len(), 1);
        assert_eq!(early_only[0].tenant_id, 2);
    }

    #[tokio::test]
    async fn test_weekday_and_hour_filters() {
        let repo = SqliteRegistrationRepository::new(setup_test_db().await);
        let mut monday = registration(1, AlertCategory::Purification);
        monday.schedule = RegistrationSchedule::Weekday { reset_day: Some(1) };
        let unset = registration(2, AlertCategory::Purification);
        let mut sprout = registration(3, AlertCategory::Sproutlet);
        sprout.schedule = RegistrationSchedule::FixedHour { hour: 14 };
        for reg in [&monday, &unset, &sprout] {
            repo.upsert(reg).await.unwrap();
        }

        let found = repo
            .find_eligible(AlertCategory::Purification, EligibilityPredicate::ResetWeekday(1))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].tenant_id, 1);

        let tuesday = repo
            .find_eligible(AlertCategory::Purification, EligibilityPredicate::ResetWeekday(2))
            .await
            .unwrap();
        assert!(tuesday.is_empty());

        let at_14 = repo
            .find_eligible(AlertCategory::Sproutlet, EligibilityPredicate::ResetHour(14))
            .await
            .unwrap();
        assert_eq!(at_14.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_mute_window() {
        let repo = SqliteRegistrationRepository::new(setup_test_db().await);
        repo.upsert(&registration(5, AlertCategory::CrateRespawn))
            .await
            .unwrap();

        assert!(repo.delete(5, AlertCategory::CrateRespawn).await.unwrap());
        assert!(!repo.delete(5, AlertCategory::CrateRespawn).await.unwrap());
        assert!(repo
            .find_mute_window(5, AlertCategory::CrateRespawn)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_by_destination_and_count() {
        let repo = SqliteRegistrationRepository::new(setup_test_db().await);
        repo.upsert(&registration(1, AlertCategory::CrateRespawn))
            .await
            .unwrap();
        repo.upsert(&registration(1, AlertCategory::Medics))
            .await
            .unwrap();
        repo.upsert(&registration(2, AlertCategory::Medics))
            .await
            .unwrap();
        assert_eq!(repo.count_tenants().await.unwrap(), 2);

        // 租户1的两个类别共用同一个频道
        assert_eq!(repo.delete_by_destination(10).await.unwrap(), 2);
        assert_eq!(repo.count_tenants().await.unwrap(), 1);
    }
}
