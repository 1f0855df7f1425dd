use serde::{Deserialize, Serialize};

/// 推送调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// 单次推送的最大尝试次数（整轮重试）
    pub max_pass_attempts: u32,
    /// 两次整轮重试之间的等待时间
    pub retry_delay_seconds: u64,
    /// 启动时允许补发的错过时间窗口
    pub misfire_grace_seconds: u64,
    /// 达到该警告次数后拒绝租户重新注册
    pub blacklist_strike_threshold: i64,
    /// 租户数量展示刷新周期（6段CRON表达式）
    pub tenant_count_cron: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_pass_attempts: 5,
            retry_delay_seconds: 5,
            misfire_grace_seconds: 60,
            blacklist_strike_threshold: 3,
            tenant_count_cron: "0 */10 * * * *".to_string(),
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_pass_attempts == 0 {
            return Err(anyhow::anyhow!("最大尝试次数必须大于0"));
        }

        if self.blacklist_strike_threshold <= 0 {
            return Err(anyhow::anyhow!("黑名单阈值必须大于0"));
        }

        if self.tenant_count_cron.split_whitespace().count() < 6 {
            return Err(anyhow::anyhow!(
                "租户数量刷新CRON表达式需要包含秒字段: {}",
                self.tenant_count_cron
            ));
        }

        Ok(())
    }
}

/// 模板与本地化配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub default_locale: String,
    /// 额外的翻译目录文件（TOML），覆盖内置文案
    #[serde(default)]
    pub catalog_path: Option<String>,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            default_locale: "en".to_string(),
            catalog_path: None,
        }
    }
}

impl TemplateConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_locale.trim().is_empty() {
            return Err(anyhow::anyhow!("默认语言不能为空"));
        }
        Ok(())
    }
}
