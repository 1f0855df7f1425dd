use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn, Instrument};

use broadcaster_core::BroadcastResult;
use broadcaster_domain::{
    categories::AlertCategory,
    ports::ChatPlatform,
    repositories::RegistrationRepository,
};

use crate::cron_utils::CronScheduler;
use crate::dispatch_engine::DispatchEngine;

pub const TENANT_COUNT_JOB: &str = "tenant_count";

/// 定时任务的执行体
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, scheduled_at: DateTime<Utc>) -> BroadcastResult<()>;
}

/// 某一告警类别的推送任务
pub struct AlertPassJob {
    engine: Arc<DispatchEngine>,
    category: AlertCategory,
}

impl AlertPassJob {
    pub fn new(engine: Arc<DispatchEngine>, category: AlertCategory) -> Self {
        Self { engine, category }
    }
}

#[async_trait]
impl JobRunner for AlertPassJob {
    async fn run(&self, scheduled_at: DateTime<Utc>) -> BroadcastResult<()> {
        self.engine
            .run_pass(self.category, scheduled_at)
            .await
            .map(|_| ())
    }
}

/// 刷新统计频道中展示的租户数量
pub struct TenantCountJob {
    registrations: Arc<dyn RegistrationRepository>,
    platform: Arc<dyn ChatPlatform>,
}

impl TenantCountJob {
    pub fn new(
        registrations: Arc<dyn RegistrationRepository>,
        platform: Arc<dyn ChatPlatform>,
    ) -> Self {
        Self {
            registrations,
            platform,
        }
    }
}

#[async_trait]
impl JobRunner for TenantCountJob {
    async fn run(&self, _scheduled_at: DateTime<Utc>) -> BroadcastResult<()> {
        let count = self.registrations.count_tenants().await?;
        self.platform.update_tenant_count(count).await?;
        debug!("租户数量已更新: {}", count);
        Ok(())
    }
}

pub struct JobEntry {
    pub name: String,
    pub trigger: CronScheduler,
    pub runner: Arc<dyn JobRunner>,
}

/// 任务表的只读视图
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescription {
    pub name: String,
    pub triggers: Vec<String>,
    pub next_fire: Option<DateTime<Utc>>,
}

/// 下一步动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPlan {
    /// 执行最近一次到期的触发，`skipped` 为被合并掉的更早的触发次数
    Fire {
        scheduled_at: DateTime<Utc>,
        skipped: usize,
    },
    Wait(DateTime<Utc>),
    /// 表达式不会再触发
    Idle,
}

/// `last` 之后到 `now` 为止错过的触发只执行最近的一次
pub fn plan_next(trigger: &CronScheduler, last: DateTime<Utc>, now: DateTime<Utc>) -> TickPlan {
    let due = trigger.fires_between(last, now);
    match due.last() {
        Some(latest) => TickPlan::Fire {
            scheduled_at: *latest,
            skipped: due.len() - 1,
        },
        None => match trigger.next_execution_time(now) {
            Some(next) => TickPlan::Wait(next),
            None => TickPlan::Idle,
        },
    }
}

/// 告警调度器：每个任务在独立的tokio任务中顺序执行，不会重入
pub struct AlertScheduler {
    jobs: Vec<Arc<JobEntry>>,
    misfire_grace: Duration,
}

impl AlertScheduler {
    pub fn new(misfire_grace: Duration) -> Self {
        Self {
            jobs: Vec::new(),
            misfire_grace,
        }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        trigger: CronScheduler,
        runner: Arc<dyn JobRunner>,
    ) -> &mut Self {
        let name = name.into();
        info!("注册定时任务 {}: {:?}", name, trigger.expressions());
        self.jobs.push(Arc::new(JobEntry {
            name,
            trigger,
            runner,
        }));
        self
    }

    /// 为每个类别注册一个推送任务，触发时间为该类别所有表达式的并集
    pub fn register_categories(
        &mut self,
        engine: Arc<DispatchEngine>,
        categories: &[AlertCategory],
    ) -> BroadcastResult<&mut Self> {
        for category in categories {
            let trigger = CronScheduler::union(category.triggers())?;
            self.register(
                category.as_str(),
                trigger,
                Arc::new(AlertPassJob::new(engine.clone(), *category)),
            );
        }
        Ok(self)
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name.as_str()).collect()
    }

    pub fn describe_jobs(&self, now: DateTime<Utc>) -> Vec<JobDescription> {
        self.jobs
            .iter()
            .map(|job| JobDescription {
                name: job.name.clone(),
                triggers: job.trigger.expressions().to_vec(),
                next_fire: job.trigger.next_execution_time(now),
            })
            .collect()
    }

    /// 启动全部任务循环，直到收到关闭信号且所有循环退出
    pub async fn run(&self, shutdown: &broadcast::Sender<()>) {
        let grace =
            chrono::Duration::from_std(self.misfire_grace).unwrap_or(chrono::Duration::zero());
        let handles: Vec<_> = self
            .jobs
            .iter()
            .map(|job| {
                let span = tracing::info_span!("job", name = %job.name);
                tokio::spawn(run_job(job.clone(), grace, shutdown.subscribe()).instrument(span))
            })
            .collect();

        info!("调度器已启动，共 {} 个任务", handles.len());

        for handle in handles {
            if let Err(e) = handle.await {
                error!("任务循环异常退出: {}", e);
            }
        }

        info!("调度器已停止");
    }
}

async fn run_job(
    job: Arc<JobEntry>,
    grace: chrono::Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut last = Utc::now() - grace;

    loop {
        let now = Utc::now();
        match plan_next(&job.trigger, last, now) {
            TickPlan::Fire {
                scheduled_at,
                skipped,
            } => {
                if skipped > 0 {
                    warn!("合并了 {} 次错过的触发，仅执行 {}", skipped, scheduled_at);
                }
                last = scheduled_at;

                tokio::select! {
                    result = job.runner.run(scheduled_at) => {
                        if let Err(e) = result {
                            error!("任务执行失败，等待下一次触发: {}", e);
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("收到关闭信号，中止正在执行的任务");
                        break;
                    }
                }
            }
            TickPlan::Wait(next) => {
                let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.recv() => break,
                }
            }
            TickPlan::Idle => {
                warn!("任务不会再触发");
                let _ = shutdown.recv().await;
                break;
            }
        }
    }

    debug!("任务循环已退出");
}
