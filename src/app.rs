use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::info;

use broadcaster_core::AppConfig;
use broadcaster_dispatcher::{
    AlertScheduler, CronScheduler, DispatchEngine, JobDescription, PassReport, PassRetryConfig,
    TemplateResolver, TenantCountJob, TENANT_COUNT_JOB,
};
use broadcaster_domain::{
    categories::AlertCategory,
    ports::{ChatPlatform, OperatorLog},
    repositories::{PreferenceRepository, RegistrationRepository},
};
use broadcaster_infrastructure::{
    init_metrics, DatabaseManager, RestChatPlatform, SqlitePreferenceRepository,
    SqliteRegistrationRepository, TracingOperatorLog, WebhookOperatorLog,
};

/// 应用程序：持有数据库、推送引擎与调度器
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    engine: Arc<DispatchEngine>,
    scheduler: AlertScheduler,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化告警推送服务");

        let database = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;
        database.migrate().await.context("初始化数据库表结构失败")?;

        let registrations: Arc<dyn RegistrationRepository> =
            Arc::new(SqliteRegistrationRepository::new(database.pool().clone()));
        let preferences: Arc<dyn PreferenceRepository> =
            Arc::new(SqlitePreferenceRepository::new(database.pool().clone()));

        let platform: Arc<dyn ChatPlatform> =
            Arc::new(RestChatPlatform::new(&config.platform).context("创建聊天平台客户端失败")?);

        let operator_log: Arc<dyn OperatorLog> = match &config.operator_log.webhook_url {
            Some(url) => {
                info!("运维日志将发送到webhook");
                Arc::new(
                    WebhookOperatorLog::new(
                        url.clone(),
                        Duration::from_secs(config.operator_log.request_timeout_seconds),
                    )
                    .context("创建运维webhook客户端失败")?,
                )
            }
            None => Arc::new(TracingOperatorLog),
        };

        let templates =
            Arc::new(TemplateResolver::from_config(&config.templates).context("加载翻译目录失败")?);

        let engine = Arc::new(DispatchEngine::new(
            registrations.clone(),
            preferences,
            platform.clone(),
            operator_log,
            templates,
            PassRetryConfig::from(&config.dispatcher),
        ));

        let mut scheduler =
            AlertScheduler::new(Duration::from_secs(config.dispatcher.misfire_grace_seconds));
        scheduler.register_categories(engine.clone(), &AlertCategory::ALL)?;
        if config.platform.stats_channel_id.is_some() {
            scheduler.register(
                TENANT_COUNT_JOB,
                CronScheduler::new(&config.dispatcher.tenant_count_cron)?,
                Arc::new(TenantCountJob::new(registrations, platform)),
            );
        }

        Ok(Self {
            config,
            database,
            engine,
            scheduler,
        })
    }

    /// 运行调度器直到收到关闭信号
    pub async fn run(&self, shutdown: broadcast::Sender<()>) -> Result<()> {
        init_metrics(&self.config.metrics)?;
        self.database
            .health_check()
            .await
            .context("数据库健康检查失败")?;

        self.scheduler.run(&shutdown).await;

        self.database.close().await;
        info!("数据库连接已关闭");
        Ok(())
    }

    pub fn list_jobs(&self) -> Vec<JobDescription> {
        self.scheduler.describe_jobs(Utc::now())
    }

    /// 立即补发该类别最近一次的触发
    pub async fn dispatch_now(&self, category: AlertCategory) -> Result<PassReport> {
        let now = Utc::now();
        let scheduled_at = CronScheduler::union(category.triggers())?
            .latest_at_or_before(now)
            .unwrap_or(now);
        info!(category = %category, %scheduled_at, "手动触发推送");

        Ok(self.engine.run_pass(category, scheduled_at).await?)
    }
}
