use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use broadcaster_core::{BroadcastError, BroadcastResult};

use crate::categories::{AlertCategory, CategoryClass};

/// 类别相关的调度属性，注册时按类别的调度类型校验一次
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistrationSchedule {
    Interval { early_warning: bool },
    /// ISO星期（1=周一），None 表示尚未选择重置日，不会被推送
    Weekday { reset_day: Option<u8> },
    FixedHour { hour: u8 },
    Unconditional,
}

/// 调度属性在注册表中的列值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScheduleColumns {
    pub reset_weekday: Option<i64>,
    pub reset_hour: Option<i64>,
    pub early_warning: bool,
}

impl RegistrationSchedule {
    pub fn class(&self) -> CategoryClass {
        match self {
            RegistrationSchedule::Interval { .. } => CategoryClass::Interval,
            RegistrationSchedule::Weekday { .. } => CategoryClass::Weekday,
            RegistrationSchedule::FixedHour { .. } => CategoryClass::FixedHour,
            RegistrationSchedule::Unconditional => CategoryClass::Unconditional,
        }
    }

    /// 类别的默认调度属性；固定整点类别必须由租户显式选择
    pub fn default_for(category: AlertCategory) -> Option<Self> {
        match category.class() {
            CategoryClass::Interval => Some(RegistrationSchedule::Interval {
                early_warning: false,
            }),
            CategoryClass::Weekday => Some(RegistrationSchedule::Weekday { reset_day: None }),
            CategoryClass::FixedHour => None,
            CategoryClass::Unconditional => Some(RegistrationSchedule::Unconditional),
        }
    }

    pub fn validate_for(&self, category: AlertCategory) -> BroadcastResult<()> {
        let invalid = |message: String| BroadcastError::InvalidSchedule {
            category: category.as_str().to_string(),
            message,
        };

        if self.class() != category.class() {
            return Err(invalid(format!(
                "调度类型 {} 与类别要求的 {} 不匹配",
                self.class(),
                category.class()
            )));
        }

        match *self {
            RegistrationSchedule::Interval { early_warning: true }
                if category.early_warning_lead().is_none() =>
            {
                Err(invalid("该类别不支持提前预警".to_string()))
            }
            RegistrationSchedule::Weekday {
                reset_day: Some(day),
            } if !(1..=7).contains(&day) => Err(invalid(format!("重置日必须在1-7之间: {day}"))),
            RegistrationSchedule::FixedHour { hour } if hour > 23 => {
                Err(invalid(format!("小时必须在0-23之间: {hour}")))
            }
            _ => Ok(()),
        }
    }

    pub fn to_columns(&self) -> ScheduleColumns {
        match *self {
            RegistrationSchedule::Interval { early_warning } => ScheduleColumns {
                early_warning,
                ..Default::default()
            },
            RegistrationSchedule::Weekday { reset_day } => ScheduleColumns {
                reset_weekday: reset_day.map(i64::from),
                ..Default::default()
            },
            RegistrationSchedule::FixedHour { hour } => ScheduleColumns {
                reset_hour: Some(i64::from(hour)),
                ..Default::default()
            },
            RegistrationSchedule::Unconditional => ScheduleColumns::default(),
        }
    }

    pub fn from_columns(category: AlertCategory, columns: ScheduleColumns) -> BroadcastResult<Self> {
        let schedule = match category.class() {
            CategoryClass::Interval => RegistrationSchedule::Interval {
                early_warning: columns.early_warning,
            },
            CategoryClass::Weekday => RegistrationSchedule::Weekday {
                reset_day: columns
                    .reset_weekday
                    .map(|d| u8::try_from(d).unwrap_or(u8::MAX)),
            },
            CategoryClass::FixedHour => RegistrationSchedule::FixedHour {
                hour: columns
                    .reset_hour
                    .and_then(|h| u8::try_from(h).ok())
                    .ok_or_else(|| BroadcastError::InvalidSchedule {
                        category: category.as_str().to_string(),
                        message: "缺少整点设置".to_string(),
                    })?,
            },
            CategoryClass::Unconditional => RegistrationSchedule::Unconditional,
        };
        schedule.validate_for(category)?;
        Ok(schedule)
    }
}

/// 租户在某一告警类别上的注册信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantAlertRegistration {
    pub tenant_id: i64,
    pub category: AlertCategory,
    pub destination_id: i64,
    pub audience_tag_id: Option<i64>,
    pub registered_by: i64,
    pub schedule: RegistrationSchedule,
    pub auto_delete: bool,
    pub registered_at: DateTime<Utc>,
}

/// 静音时段，按位保存每个时段是否静音
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteWindow {
    pub tenant_id: i64,
    pub category: AlertCategory,
    pub muted_mask: u32,
}

impl MuteWindow {
    pub fn unmuted(tenant_id: i64, category: AlertCategory) -> Self {
        Self {
            tenant_id,
            category,
            muted_mask: 0,
        }
    }

    /// 根据时段下标构造，下标必须属于类别的时段表
    pub fn from_buckets(
        tenant_id: i64,
        category: AlertCategory,
        buckets: &[u8],
    ) -> BroadcastResult<Self> {
        let bucket_count = category.buckets().len();
        let mut muted_mask = 0u32;
        for &bucket in buckets {
            if usize::from(bucket) >= bucket_count {
                return Err(BroadcastError::InvalidBucket {
                    category: category.as_str().to_string(),
                    bucket,
                });
            }
            muted_mask |= 1 << bucket;
        }
        Ok(Self {
            tenant_id,
            category,
            muted_mask,
        })
    }

    pub fn is_muted(&self, bucket: u8) -> bool {
        bucket < 32 && self.muted_mask & (1 << bucket) != 0
    }

    pub fn muted_buckets(&self) -> Vec<u8> {
        (0..self.category.buckets().len() as u8)
            .filter(|b| self.is_muted(*b))
            .collect()
    }
}

/// 高级订阅租户的自定义文案，`{timestamp}` 占位符在渲染时替换
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PremiumOverride {
    pub tenant_id: i64,
    pub category: AlertCategory,
    pub text: String,
    pub updated_at: DateTime<Utc>,
}

pub const PREMIUM_TIMESTAMP_TOKEN: &str = "{timestamp}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalePreference {
    pub tenant_id: i64,
    pub locale: String,
    pub set_by: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub tenant_id: i64,
    pub strikes: i64,
    pub last_strike_at: DateTime<Utc>,
}

/// 一次推送的候选租户
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchCandidate {
    pub tenant_id: i64,
    pub destination_id: i64,
    pub audience_tag_id: Option<i64>,
    pub auto_delete: bool,
}

/// 候选租户的筛选条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EligibilityPredicate {
    /// 时段未被静音，且提前预警设置与触发时刻一致
    UnmutedBucket { bucket: u8, early_warning: bool },
    /// 重置日等于当前ISO星期
    ResetWeekday(u8),
    /// 设置的小时等于当前小时
    ResetHour(u8),
    All,
}
