//! 外部协作方接口：聊天平台与运维日志

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use broadcaster_core::BroadcastResult;

use crate::categories::AlertCategory;

/// 投递告警所需的频道权限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    ViewChannel,
    SendMessages,
    EmbedLinks,
}

impl Capability {
    /// 平台权限位
    pub fn bit(&self) -> u64 {
        match self {
            Capability::ViewChannel => 1 << 10,
            Capability::SendMessages => 1 << 11,
            Capability::EmbedLinks => 1 << 14,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::ViewChannel => "View Channel",
            Capability::SendMessages => "Send Messages",
            Capability::EmbedLinks => "Embed Links",
        };
        write!(f, "{name}")
    }
}

pub const REQUIRED_CAPABILITIES: [Capability; 3] = [
    Capability::ViewChannel,
    Capability::SendMessages,
    Capability::EmbedLinks,
];

/// 机器人在频道中的有效权限位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Permissions(pub u64);

impl Permissions {
    pub fn all() -> Self {
        Permissions(u64::MAX)
    }

    pub fn from_capabilities(capabilities: &[Capability]) -> Self {
        Permissions(capabilities.iter().fold(0, |acc, c| acc | c.bit()))
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.0 & capability.bit() == capability.bit()
    }

    pub fn missing(&self, required: &[Capability]) -> Vec<Capability> {
        required.iter().copied().filter(|c| !self.has(*c)).collect()
    }
}

/// 已解析的投递目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub id: i64,
    pub tenant_id: i64,
    pub permissions: Permissions,
    /// 平台上报的租户语言
    pub tenant_locale: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// 需要提及的受众标签
    pub audience_tag_id: Option<i64>,
    pub title: String,
    pub body: String,
    pub footer: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub destination_id: i64,
    pub message_id: i64,
}

/// 聊天平台接口
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// 频道被删除或无法访问时返回 None
    async fn resolve_destination(&self, destination_id: i64) -> BroadcastResult<Option<Destination>>;
    async fn send_message(
        &self,
        destination_id: i64,
        message: &OutboundMessage,
    ) -> BroadcastResult<SentMessage>;
    /// 在 `delay` 之后删除消息，调用本身立即返回
    async fn schedule_delete(&self, message: SentMessage, delay: Duration) -> BroadcastResult<()>;
    /// 向租户的系统频道发送一次性说明
    async fn notify_tenant(&self, tenant_id: i64, text: &str) -> BroadcastResult<()>;
    async fn has_premium_entitlement(&self, tenant_id: i64) -> BroadcastResult<bool>;
    async fn update_tenant_count(&self, count: u64) -> BroadcastResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorLogEntry {
    pub severity: Severity,
    pub category: Option<AlertCategory>,
    pub message: String,
    pub tenant_id: Option<i64>,
    pub destination_id: Option<i64>,
    /// 不触发运维频道的通知提示音
    pub silent: bool,
}

impl OperatorLogEntry {
    pub fn new(severity: Severity, category: Option<AlertCategory>, message: impl Into<String>) -> Self {
        Self {
            severity,
            category,
            message: message.into(),
            tenant_id: None,
            destination_id: None,
            silent: false,
        }
    }

    pub fn with_target(mut self, tenant_id: i64, destination_id: i64) -> Self {
        self.tenant_id = Some(tenant_id);
        self.destination_id = Some(destination_id);
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }
}

/// 运维日志输出；实现方自行吞掉发送失败
#[async_trait]
pub trait OperatorLog: Send + Sync {
    async fn log(&self, entry: OperatorLogEntry);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_capabilities() {
        let perms = Permissions::from_capabilities(&[Capability::ViewChannel, Capability::SendMessages]);
        assert_eq!(perms.missing(&REQUIRED_CAPABILITIES), vec![Capability::EmbedLinks]);
        assert!(Permissions::all().missing(&REQUIRED_CAPABILITIES).is_empty());
        assert_eq!(Permissions::default().missing(&REQUIRED_CAPABILITIES).len(), 3);
    }
}
