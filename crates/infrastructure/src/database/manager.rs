use std::time::Duration;

use broadcaster_core::{config::DatabaseConfig, BroadcastResult};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::{debug, info};

/// 建表语句，均可重复执行
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tenant_registrations (
        tenant_id INTEGER NOT NULL,
        category TEXT NOT NULL,
        destination_id INTEGER NOT NULL,
        audience_tag_id INTEGER,
        registered_by INTEGER NOT NULL,
        reset_weekday INTEGER,
        reset_hour INTEGER,
        early_warning INTEGER NOT NULL DEFAULT 0,
        auto_delete INTEGER NOT NULL DEFAULT 0,
        registered_at DATETIME NOT NULL,
        PRIMARY KEY (tenant_id, category)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tenant_registrations_category ON tenant_registrations (category)",
    "CREATE INDEX IF NOT EXISTS idx_tenant_registrations_destination ON tenant_registrations (destination_id)",
    r#"
    CREATE TABLE IF NOT EXISTS mute_windows (
        tenant_id INTEGER NOT NULL,
        category TEXT NOT NULL,
        muted_mask INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (tenant_id, category)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS premium_overrides (
        tenant_id INTEGER NOT NULL,
        category TEXT NOT NULL,
        text TEXT NOT NULL,
        updated_at DATETIME NOT NULL,
        PRIMARY KEY (tenant_id, category)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tenant_locales (
        tenant_id INTEGER PRIMARY KEY,
        locale TEXT NOT NULL,
        set_by INTEGER NOT NULL,
        updated_at DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tenant_blacklist (
        tenant_id INTEGER PRIMARY KEY,
        strikes INTEGER NOT NULL DEFAULT 0,
        last_strike_at DATETIME NOT NULL
    )
    "#,
];

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> BroadcastResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(1800)) // 30分钟默认生命周期
            .connect(&config.url)
            .await?;

        info!("数据库连接池已创建，最大连接数: {}", config.max_connections);
        Ok(Self { pool })
    }

    /// 单连接的内存数据库，每个连接都是独立的库，所以连接不能被回收
    pub async fn in_memory() -> BroadcastResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> BroadcastResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("数据库表结构检查完成，共 {} 条语句", SCHEMA.len());
        Ok(())
    }

    pub async fn health_check(&self) -> BroadcastResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
