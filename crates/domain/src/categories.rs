//! 告警类别定义
//!
//! 每个类别属于一个固定的调度类型（[`CategoryClass`]），调度类型决定了
//! 注册时需要哪些租户属性以及推送时如何筛选候选租户。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use broadcaster_core::{BroadcastError, BroadcastResult};

/// 告警类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    /// 武器/装备箱刷新，每4小时一次
    CrateRespawn,
    /// 货运争夺，不规则的固定时刻
    CargoScramble,
    /// 每周净化重置
    Purification,
    /// 每周控制器重置
    Controller,
    /// 租户自选整点的萌芽事件
    Sproutlet,
    /// 医疗补给提醒，每30分钟
    Medics,
}

/// 调度类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CategoryClass {
    /// 固定的重复时刻，按时段静音
    Interval,
    /// 每周一次，租户选择重置日
    Weekday,
    /// 每天一次，租户选择小时
    FixedHour,
    /// 无条件推送，没有静音概念
    Unconditional,
}

impl fmt::Display for CategoryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CategoryClass::Interval => "interval",
            CategoryClass::Weekday => "weekday",
            CategoryClass::FixedHour => "fixed_hour",
            CategoryClass::Unconditional => "unconditional",
        };
        write!(f, "{name}")
    }
}

/// 静音时段对应的UTC时刻
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketTime {
    pub hour: u8,
    pub minute: u8,
}

impl BucketTime {
    const fn at(hour: u8, minute: u8) -> Self {
        Self { hour, minute }
    }

    fn matches(&self, instant: DateTime<Utc>) -> bool {
        instant.hour() == u32::from(self.hour) && instant.minute() == u32::from(self.minute)
    }

    fn naive_time(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)
    }
}

impl fmt::Display for BucketTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// 某一时刻命中的静音时段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketMatch {
    pub index: u8,
    /// 命中的是提前预警时刻而不是正点时刻
    pub early_warning: bool,
}

const CRATE_RESPAWN_BUCKETS: [BucketTime; 6] = [
    BucketTime::at(0, 0),
    BucketTime::at(4, 0),
    BucketTime::at(8, 0),
    BucketTime::at(12, 0),
    BucketTime::at(16, 0),
    BucketTime::at(20, 0),
];

const CARGO_SCRAMBLE_BUCKETS: [BucketTime; 4] = [
    BucketTime::at(12, 0),
    BucketTime::at(15, 0),
    BucketTime::at(18, 30),
    BucketTime::at(22, 0),
];

const CRATE_RESPAWN_TRIGGERS: [&str; 1] = ["0 0 0,4,8,12,16,20 * * *"];
// 正点时刻与提前一小时的预警时刻
const CARGO_SCRAMBLE_TRIGGERS: [&str; 4] = [
    "0 0 12,15,22 * * *",
    "0 30 18 * * *",
    "0 0 11,14,21 * * *",
    "0 30 17 * * *",
];
const WEEKLY_RESET_TRIGGERS: [&str; 1] = ["0 0 0 * * *"];
const SPROUTLET_TRIGGERS: [&str; 1] = ["0 15 * * * *"];
const MEDICS_TRIGGERS: [&str; 1] = ["0 0,30 * * * *"];

impl AlertCategory {
    pub const ALL: [AlertCategory; 6] = [
        AlertCategory::CrateRespawn,
        AlertCategory::CargoScramble,
        AlertCategory::Purification,
        AlertCategory::Controller,
        AlertCategory::Sproutlet,
        AlertCategory::Medics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::CrateRespawn => "crate_respawn",
            AlertCategory::CargoScramble => "cargo_scramble",
            AlertCategory::Purification => "purification",
            AlertCategory::Controller => "controller",
            AlertCategory::Sproutlet => "sproutlet",
            AlertCategory::Medics => "medics",
        }
    }

    pub fn class(&self) -> CategoryClass {
        match self {
            AlertCategory::CrateRespawn | AlertCategory::CargoScramble => CategoryClass::Interval,
            AlertCategory::Purification | AlertCategory::Controller => CategoryClass::Weekday,
            AlertCategory::Sproutlet => CategoryClass::FixedHour,
            AlertCategory::Medics => CategoryClass::Unconditional,
        }
    }

    /// 该类别的静音时段表，非时段类类别为空
    pub fn buckets(&self) -> &'static [BucketTime] {
        match self {
            AlertCategory::CrateRespawn => &CRATE_RESPAWN_BUCKETS,
            AlertCategory::CargoScramble => &CARGO_SCRAMBLE_BUCKETS,
            _ => &[],
        }
    }

    pub fn has_mute_window(&self) -> bool {
        !self.buckets().is_empty()
    }

    /// 触发该类别推送的CRON表达式（6段，含秒），多个表达式取并集
    pub fn triggers(&self) -> &'static [&'static str] {
        match self {
            AlertCategory::CrateRespawn => &CRATE_RESPAWN_TRIGGERS,
            AlertCategory::CargoScramble => &CARGO_SCRAMBLE_TRIGGERS,
            AlertCategory::Purification | AlertCategory::Controller => &WEEKLY_RESET_TRIGGERS,
            AlertCategory::Sproutlet => &SPROUTLET_TRIGGERS,
            AlertCategory::Medics => &MEDICS_TRIGGERS,
        }
    }

    /// 自动删除延迟，略短于下一次同类推送的间隔
    pub fn auto_delete_delay(&self) -> std::time::Duration {
        let seconds = match self {
            AlertCategory::CrateRespawn => 14_100,
            AlertCategory::CargoScramble => 10_800,
            AlertCategory::Purification | AlertCategory::Controller => 28_800,
            AlertCategory::Sproutlet => 2_690,
            AlertCategory::Medics => 1_560,
        };
        std::time::Duration::from_secs(seconds)
    }

    /// 高频类别不发送推送汇总，失败日志也静默发送
    pub fn is_high_frequency(&self) -> bool {
        matches!(self, AlertCategory::Medics | AlertCategory::Sproutlet)
    }

    /// 支持提前预警的类别返回提前量
    pub fn early_warning_lead(&self) -> Option<Duration> {
        match self {
            AlertCategory::CargoScramble => Some(Duration::hours(1)),
            _ => None,
        }
    }

    /// 查找 `instant` 命中的静音时段
    pub fn bucket_at(&self, instant: DateTime<Utc>) -> Option<BucketMatch> {
        let buckets = self.buckets();

        if let Some(index) = buckets.iter().position(|b| b.matches(instant)) {
            return Some(BucketMatch {
                index: index as u8,
                early_warning: false,
            });
        }

        let lead = self.early_warning_lead()?;
        buckets
            .iter()
            .position(|b| b.matches(instant + lead))
            .map(|index| BucketMatch {
                index: index as u8,
                early_warning: true,
            })
    }

    /// 事件之后的下一次同类事件时间
    pub fn next_occurrence(&self, event_at: DateTime<Utc>) -> DateTime<Utc> {
        match self.class() {
            CategoryClass::Interval => {
                let date = event_at.date_naive();
                (0..=1)
                    .filter_map(|offset| date.checked_add_signed(Duration::days(offset)))
                    .flat_map(|day| {
                        self.buckets()
                            .iter()
                            .filter_map(move |b| b.naive_time().map(|t| day.and_time(t).and_utc()))
                    })
                    .find(|candidate| *candidate > event_at)
                    .unwrap_or(event_at + Duration::days(1))
            }
            CategoryClass::Weekday => event_at + Duration::days(7),
            CategoryClass::FixedHour => event_at + Duration::days(1),
            CategoryClass::Unconditional => event_at + Duration::minutes(30),
        }
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlertCategory {
    type Err = BroadcastError;

    fn from_str(s: &str) -> BroadcastResult<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        AlertCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| BroadcastError::UnknownCategory(s.to_string()))
    }
}

impl sqlx::Type<sqlx::Sqlite> for AlertCategory {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for AlertCategory {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        AlertCategory::from_str(s).map_err(|e| e.to_string().into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for AlertCategory {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_category_names() {
        assert_eq!(
            "crate_respawn".parse::<AlertCategory>().unwrap(),
            AlertCategory::CrateRespawn
        );
        assert_eq!(
            "Cargo-Scramble".parse::<AlertCategory>().unwrap(),
            AlertCategory::CargoScramble
        );
        assert!("lunar_event".parse::<AlertCategory>().is_err());
    }

    #[test]
    fn test_crate_bucket_lookup() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let hit = AlertCategory::CrateRespawn.bucket_at(at).unwrap();
        assert_eq!(hit.index, 2);
        assert!(!hit.early_warning);

        let off = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        assert!(AlertCategory::CrateRespawn.bucket_at(off).is_none());
    }

    #[test]
    fn test_cargo_early_warning_bucket() {
        let early = Utc.with_ymd_and_hms(2024, 5, 1, 17, 30, 0).unwrap();
        let hit = AlertCategory::CargoScramble.bucket_at(early).unwrap();
        assert_eq!(hit.index, 2);
        assert!(hit.early_warning);

        let standard = Utc.with_ymd_and_hms(2024, 5, 1, 22, 0, 0).unwrap();
        let hit = AlertCategory::CargoScramble.bucket_at(standard).unwrap();
        assert_eq!(hit.index, 3);
        assert!(!hit.early_warning);
    }

    #[test]
    fn test_next_occurrence_wraps_to_next_day() {
        let late = Utc.with_ymd_and_hms(2024, 5, 1, 22, 0, 0).unwrap();
        let next = AlertCategory::CargoScramble.next_occurrence(late);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap());

        let crate_tick = Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap();
        let next = AlertCategory::CrateRespawn.next_occurrence(crate_tick);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_interval_delete_delays_stay_under_cadence() {
        assert_eq!(
            AlertCategory::CargoScramble.auto_delete_delay(),
            std::time::Duration::from_secs(10_800)
        );
        assert!(AlertCategory::CrateRespawn.auto_delete_delay().as_secs() < 4 * 3600);
        assert!(AlertCategory::Medics.is_high_frequency());
        assert!(!AlertCategory::CrateRespawn.is_high_frequency());
    }
}
