use thiserror::Error;

/// 告警推送系统错误类型定义
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("聊天平台错误: {0}")]
    Platform(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("租户已被列入黑名单: {tenant_id} (警告次数 {strikes})")]
    Blacklisted { tenant_id: i64, strikes: i64 },

    #[error("租户未注册该告警类别: {tenant_id} / {category}")]
    NotRegistered { tenant_id: i64, category: String },

    #[error("无效的静音时段: {category} 不存在时段 {bucket}")]
    InvalidBucket { category: String, bucket: u8 },

    #[error("无效的调度属性: {category} - {message}")]
    InvalidSchedule { category: String, message: String },

    #[error("未知的告警类别: {0}")]
    UnknownCategory(String),

    #[error("不支持的语言: {0}")]
    UnsupportedLocale(String),

    #[error("租户没有有效的高级订阅: {tenant_id}")]
    PremiumRequired { tenant_id: i64 },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl BroadcastError {
    /// 是否属于租户输入校验错误（命令层可以直接回显给用户）
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BroadcastError::Blacklisted { .. }
                | BroadcastError::NotRegistered { .. }
                | BroadcastError::InvalidBucket { .. }
                | BroadcastError::InvalidSchedule { .. }
                | BroadcastError::UnknownCategory(_)
                | BroadcastError::UnsupportedLocale(_)
                | BroadcastError::PremiumRequired { .. }
        )
    }
}

/// 统一的Result类型
pub type BroadcastResult<T> = std::result::Result<T, BroadcastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        let err = BroadcastError::InvalidBucket {
            category: "crate_respawn".to_string(),
            bucket: 9,
        };
        assert!(err.is_validation());
        assert!(err.to_string().contains("crate_respawn"));

        let err = BroadcastError::Platform("boom".to_string());
        assert!(!err.is_validation());
    }

    #[test]
    fn test_database_error_conversion() {
        let err: BroadcastError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, BroadcastError::Database(_)));
    }
}
