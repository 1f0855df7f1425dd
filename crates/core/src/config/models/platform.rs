use serde::{Deserialize, Serialize};

/// 聊天平台 REST 接口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub api_base_url: String,
    /// 机器人应用ID，同时作为机器人自身的成员ID
    pub application_id: i64,
    /// 通过环境变量 BROADCASTER__PLATFORM__BOT_TOKEN 注入
    #[serde(default)]
    pub bot_token: String,
    pub request_timeout_seconds: u64,
    /// 用于展示已注册租户数量的频道，未配置时跳过
    #[serde(default)]
    pub stats_channel_id: Option<i64>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://discord.com/api/v10".to_string(),
            application_id: 0,
            bot_token: String::new(),
            request_timeout_seconds: 15,
            stats_channel_id: None,
        }
    }
}

impl PlatformConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(anyhow::anyhow!(
                "平台API地址必须以http://或https://开头: {}",
                self.api_base_url
            ));
        }

        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("请求超时时间必须大于0"));
        }

        Ok(())
    }
}

/// 运维日志频道配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorLogConfig {
    /// 运维频道的 webhook 地址，未配置时只写入本地日志
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// 单次 webhook 请求的超时，推送流程会等待日志写完
    #[serde(default = "default_webhook_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_webhook_timeout_seconds() -> u64 {
    5
}

impl Default for OperatorLogConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            request_timeout_seconds: default_webhook_timeout_seconds(),
        }
    }
}

impl OperatorLogConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(url) = &self.webhook_url {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                return Err(anyhow::anyhow!("运维webhook地址格式无效: {url}"));
            }
        }

        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("运维webhook请求超时时间必须大于0"));
        }

        Ok(())
    }
}
