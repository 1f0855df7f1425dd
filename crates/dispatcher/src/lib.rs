//! 告警推送调度
//!
//! 候选租户筛选、文案渲染、单轮推送流程、定时调度以及租户命令入口。

pub mod commands;
pub mod cron_utils;
pub mod dispatch_engine;
pub mod eligibility;
pub mod scheduler;
pub mod templates;

pub use commands::{RegisterRequest, RemovalSummary, TenantCommandService};
pub use cron_utils::CronScheduler;
pub use dispatch_engine::{
    CandidateOutcome, DeliveryFailure, DispatchEngine, PassReport, PassRetryConfig,
};
pub use eligibility::{Eligibility, EligibilityResolver};
pub use scheduler::{
    plan_next, AlertPassJob, AlertScheduler, JobDescription, JobRunner, TenantCountJob, TickPlan,
    TENANT_COUNT_JOB,
};
pub use templates::{Notice, RenderedMessage, TemplateResolver};
