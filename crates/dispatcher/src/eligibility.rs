//! 候选租户筛选
//!
//! 把 (类别, 当前时刻) 翻译成仓储层的筛选条件，并计算本次推送对应的事件时刻。

use std::sync::Arc;

use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::debug;

use broadcaster_core::BroadcastResult;
use broadcaster_domain::{
    categories::{AlertCategory, CategoryClass},
    entities::{DispatchCandidate, EligibilityPredicate},
    repositories::RegistrationRepository,
};

/// 一次筛选的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eligibility {
    /// 告警描述的事件时刻，提前预警时晚于触发时刻
    pub event_at: DateTime<Utc>,
    /// 按租户ID升序
    pub candidates: Vec<DispatchCandidate>,
}

pub struct EligibilityResolver {
    registrations: Arc<dyn RegistrationRepository>,
}

impl EligibilityResolver {
    pub fn new(registrations: Arc<dyn RegistrationRepository>) -> Self {
        Self { registrations }
    }

    /// 时段类类别在 `now` 不命中任何时段时返回 None
    pub fn predicate_for(
        category: AlertCategory,
        now: DateTime<Utc>,
    ) -> Option<(EligibilityPredicate, DateTime<Utc>)> {
        match category.class() {
            CategoryClass::Interval => {
                let matched = category.bucket_at(now)?;
                let event_at = if matched.early_warning {
                    now + category.early_warning_lead()?
                } else {
                    now
                };
                Some((
                    EligibilityPredicate::UnmutedBucket {
                        bucket: matched.index,
                        early_warning: matched.early_warning,
                    },
                    event_at,
                ))
            }
            CategoryClass::Weekday => Some((
                EligibilityPredicate::ResetWeekday(now.weekday().number_from_monday() as u8),
                now,
            )),
            CategoryClass::FixedHour => {
                Some((EligibilityPredicate::ResetHour(now.hour() as u8), now))
            }
            CategoryClass::Unconditional => Some((EligibilityPredicate::All, now)),
        }
    }

    pub async fn resolve(
        &self,
        category: AlertCategory,
        now: DateTime<Utc>,
    ) -> BroadcastResult<Eligibility> {
        let Some((predicate, event_at)) = Self::predicate_for(category, now) else {
            debug!(category = %category, "时刻 {} 不属于任何时段，没有候选租户", now);
            return Ok(Eligibility {
                event_at: now,
                candidates: Vec::new(),
            });
        };

        let candidates = self
            .registrations
            .find_eligible(category, predicate)
            .await?;

        if candidates.is_empty() {
            debug!(category = %category, ?predicate, "没有符合条件的租户");
        }

        Ok(Eligibility {
            event_at,
            candidates,
        })
    }
}
