//! 单次推送流程
//!
//! 一轮推送 = 读取候选租户、打乱顺序、逐个投递。每个候选租户的失败都在
//! 自身的处理块内消化（清理注册、通知租户、写运维日志），不会影响其他租户。
//! 只有读取候选租户失败会使整轮重试。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use broadcaster_core::{BroadcastResult, DispatcherConfig};
use broadcaster_domain::{
    categories::AlertCategory,
    entities::DispatchCandidate,
    ports::{
        Capability, ChatPlatform, Destination, OperatorLog, OperatorLogEntry, OutboundMessage, SentMessage,
        Severity, REQUIRED_CAPABILITIES,
    },
    repositories::{PreferenceRepository, RegistrationRepository},
};

use crate::eligibility::EligibilityResolver;
use crate::templates::{Notice, TemplateResolver};

/// 整轮重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassRetryConfig {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for PassRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl From<&DispatcherConfig> for PassRetryConfig {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            max_attempts: config.max_pass_attempts.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
        }
    }
}

/// 单个候选租户的投递失败原因
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryFailure {
    #[error("目标频道不存在或无法访问")]
    NotFound,
    #[error("缺少频道权限: {}", join_capabilities(.missing))]
    PermissionDenied { missing: Vec<Capability> },
    #[error("消息发送失败: {cause}")]
    SendError { cause: String },
}

impl DeliveryFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryFailure::NotFound => "not_found",
            DeliveryFailure::PermissionDenied { .. } => "permission_denied",
            DeliveryFailure::SendError { .. } => "send_error",
        }
    }
}

fn join_capabilities(capabilities: &[Capability]) -> String {
    capabilities
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateOutcome {
    pub tenant_id: i64,
    pub destination_id: i64,
    pub result: Result<SentMessage, DeliveryFailure>,
}

/// 一轮推送的结果汇总
#[derive(Debug, Clone)]
pub struct PassReport {
    pub pass_id: Uuid,
    pub category: AlertCategory,
    pub scheduled_at: DateTime<Utc>,
    /// 实际使用的尝试次数
    pub attempts: u32,
    pub outcomes: Vec<CandidateOutcome>,
    pub elapsed: Duration,
}

impl PassReport {
    pub fn sent_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn error_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }
}

pub struct DispatchEngine {
    eligibility: EligibilityResolver,
    registrations: Arc<dyn RegistrationRepository>,
    preferences: Arc<dyn PreferenceRepository>,
    platform: Arc<dyn ChatPlatform>,
    operator_log: Arc<dyn OperatorLog>,
    templates: Arc<TemplateResolver>,
    retry: PassRetryConfig,
}

impl DispatchEngine {
    pub fn new(
        registrations: Arc<dyn RegistrationRepository>,
        preferences: Arc<dyn PreferenceRepository>,
        platform: Arc<dyn ChatPlatform>,
        operator_log: Arc<dyn OperatorLog>,
        templates: Arc<TemplateResolver>,
        retry: PassRetryConfig,
    ) -> Self {
        Self {
            eligibility: EligibilityResolver::new(registrations.clone()),
            registrations,
            preferences,
            platform,
            operator_log,
            templates,
            retry,
        }
    }

    pub fn retry_config(&self) -> PassRetryConfig {
        self.retry
    }

    /// 执行一轮推送；所有尝试都失败时返回最后一次的错误
    pub async fn run_pass(
        &self,
        category: AlertCategory,
        scheduled_at: DateTime<Utc>,
    ) -> BroadcastResult<PassReport> {
        let pass_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "alert_pass",
            pass_id = %pass_id,
            category = %category,
            scheduled_at = %scheduled_at
        );
        self.run_with_retry(pass_id, category, scheduled_at)
            .instrument(span)
            .await
    }

    async fn run_with_retry(
        &self,
        pass_id: Uuid,
        category: AlertCategory,
        scheduled_at: DateTime<Utc>,
    ) -> BroadcastResult<PassReport> {
        let started = Instant::now();
        let mut attempts = 0;

        // 只有读取候选租户会让一次尝试失败，此时还没有任何投递，重试不会重复发送
        let outcomes = loop {
            attempts += 1;
            match self.attempt_pass(category, scheduled_at).await {
                Ok(outcomes) => break outcomes,
                Err(e) if attempts < self.retry.max_attempts => {
                    warn!(
                        "第 {}/{} 次推送尝试失败，{}秒后重试: {}",
                        attempts,
                        self.retry.max_attempts,
                        self.retry.retry_delay.as_secs(),
                        e
                    );
                    tokio::time::sleep(self.retry.retry_delay).await;
                }
                Err(e) => {
                    error!("推送在 {} 次尝试后仍然失败: {}", attempts, e);
                    counter!("broadcaster_pass_failures_total", "category" => category.as_str())
                        .increment(1);
                    return Err(e);
                }
            }
        };

        let report = PassReport {
            pass_id,
            category,
            scheduled_at,
            attempts,
            outcomes,
            elapsed: started.elapsed(),
        };

        histogram!("broadcaster_pass_duration_seconds", "category" => category.as_str())
            .record(report.elapsed.as_secs_f64());
        self.emit_summary(&report).await;
        Ok(report)
    }

    async fn attempt_pass(
        &self,
        category: AlertCategory,
        scheduled_at: DateTime<Utc>,
    ) -> BroadcastResult<Vec<CandidateOutcome>> {
        let eligibility = self.eligibility.resolve(category, scheduled_at).await?;
        let event_at = eligibility.event_at;

        let mut candidates: Vec<DispatchCandidate> = eligibility.candidates;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        candidates.shuffle(&mut rand::rng());

        debug!("本轮共有 {} 个候选租户", candidates.len());

        let mut outcomes = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let destination = self.locate(&candidate).await;
            let platform_locale = destination
                .as_ref()
                .ok()
                .and_then(|d| d.tenant_locale.clone());

            let result = match destination {
                Ok(destination) => {
                    self.deliver(category, event_at, &candidate, &destination)
                        .await
                }
                Err(failure) => Err(failure),
            };

            match &result {
                Ok(_) => {
                    counter!("broadcaster_alerts_sent_total", "category" => category.as_str())
                        .increment(1);
                }
                Err(failure) => {
                    self.handle_failure(category, &candidate, failure, platform_locale.as_deref())
                        .await
                }
            }

            outcomes.push(CandidateOutcome {
                tenant_id: candidate.tenant_id,
                destination_id: candidate.destination_id,
                result,
            });
        }

        Ok(outcomes)
    }

    async fn locate(&self, candidate: &DispatchCandidate) -> Result<Destination, DeliveryFailure> {
        match self
            .platform
            .resolve_destination(candidate.destination_id)
            .await
        {
            Ok(Some(destination)) => Ok(destination),
            Ok(None) => Err(DeliveryFailure::NotFound),
            Err(e) => Err(DeliveryFailure::SendError {
                cause: e.to_string(),
            }),
        }
    }

    async fn deliver(
        &self,
        category: AlertCategory,
        event_at: DateTime<Utc>,
        candidate: &DispatchCandidate,
        destination: &Destination,
    ) -> Result<SentMessage, DeliveryFailure> {
        let missing = destination.permissions.missing(&REQUIRED_CAPABILITIES);
        if !missing.is_empty() {
            return Err(DeliveryFailure::PermissionDenied { missing });
        }

        let explicit_locale = self.explicit_locale(candidate.tenant_id).await;
        let locale = self
            .templates
            .resolve_locale(
                explicit_locale.as_deref(),
                destination.tenant_locale.as_deref(),
            )
            .to_string();

        let is_premium = match self
            .platform
            .has_premium_entitlement(candidate.tenant_id)
            .await
        {
            Ok(premium) => premium,
            Err(e) => {
                warn!(tenant_id = candidate.tenant_id, "查询订阅状态失败，按普通租户处理: {}", e);
                false
            }
        };
        let override_text = if is_premium {
            self.premium_override(candidate.tenant_id, category).await
        } else {
            None
        };

        let rendered = self.templates.render(
            category,
            &locale,
            is_premium,
            override_text.as_deref(),
            event_at,
        );
        let message = OutboundMessage {
            audience_tag_id: candidate.audience_tag_id,
            title: rendered.title,
            body: rendered.body,
            footer: rendered.footer,
        };

        let sent = self
            .platform
            .send_message(candidate.destination_id, &message)
            .await
            .map_err(|e| DeliveryFailure::SendError {
                cause: e.to_string(),
            })?;

        if candidate.auto_delete {
            if let Err(e) = self
                .platform
                .schedule_delete(sent, category.auto_delete_delay())
                .await
            {
                warn!(
                    tenant_id = candidate.tenant_id,
                    message_id = sent.message_id,
                    "安排自动删除失败: {}",
                    e
                );
            }
        }

        Ok(sent)
    }

    async fn handle_failure(
        &self,
        category: AlertCategory,
        candidate: &DispatchCandidate,
        failure: &DeliveryFailure,
        platform_locale: Option<&str>,
    ) {
        counter!(
            "broadcaster_delivery_failures_total",
            "category" => category.as_str(),
            "reason" => failure.kind()
        )
        .increment(1);

        if let Err(e) = self
            .registrations
            .delete(candidate.tenant_id, category)
            .await
        {
            error!(
                tenant_id = candidate.tenant_id,
                "清理失效注册失败: {}", e
            );
        }

        let notice = match failure {
            DeliveryFailure::NotFound => None,
            DeliveryFailure::PermissionDenied { missing } => Some(Notice::PermissionDenied {
                destination_id: candidate.destination_id,
                missing,
            }),
            DeliveryFailure::SendError { .. } => Some(Notice::SendFailed {
                destination_id: candidate.destination_id,
            }),
        };
        if let Some(notice) = notice {
            let explicit_locale = self.explicit_locale(candidate.tenant_id).await;
            let locale = self
                .templates
                .resolve_locale(explicit_locale.as_deref(), platform_locale);
            let text = self.templates.render_notice(locale, notice);
            if let Err(e) = self.platform.notify_tenant(candidate.tenant_id, &text).await {
                debug!(tenant_id = candidate.tenant_id, "通知租户失败: {}", e);
            }
        }

        self.operator_log
            .log(
                OperatorLogEntry::new(
                    Severity::Error,
                    Some(category),
                    format!("{failure}，已移除该租户的注册"),
                )
                .with_target(candidate.tenant_id, candidate.destination_id)
                .silent(category.is_high_frequency()),
            )
            .await;
    }

    async fn emit_summary(&self, report: &PassReport) {
        let sent = report.sent_count();
        let errors = report.error_count();
        info!(
            sent,
            errors,
            attempts = report.attempts,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "推送完成"
        );

        if report.outcomes.is_empty() || report.category.is_high_frequency() {
            return;
        }

        self.operator_log
            .log(OperatorLogEntry::new(
                Severity::Info,
                Some(report.category),
                format!(
                    "推送完成: 成功 {sent}，失败 {errors}，耗时 {:.2}秒",
                    report.elapsed.as_secs_f64()
                ),
            ))
            .await;
    }

    async fn explicit_locale(&self, tenant_id: i64) -> Option<String> {
        match self.preferences.find_locale(tenant_id).await {
            Ok(preference) => preference.map(|p| p.locale),
            Err(e) => {
                warn!(tenant_id, "读取语言偏好失败，使用默认语言: {}", e);
                None
            }
        }
    }

    async fn premium_override(&self, tenant_id: i64, category: AlertCategory) -> Option<String> {
        match self
            .preferences
            .find_premium_override(tenant_id, category)
            .await
        {
            Ok(premium) => premium.map(|p| p.text),
            Err(e) => {
                warn!(tenant_id, "读取自定义文案失败，使用默认文案: {}", e);
                None
            }
        }
    }
}
