use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::str::FromStr;
use tracing::debug;

use broadcaster_core::{BroadcastError, BroadcastResult};

/// 向前回溯查找最近一次触发时间的最大天数，覆盖每周一次的表达式
const LOOKBACK_DAYS: i64 = 8;

/// CRON表达式解析和调度工具
///
/// 支持多个表达式取并集，用于不规则的触发节奏（例如货运争夺的正点与预警时刻）。
#[derive(Debug, Clone)]
pub struct CronScheduler {
    expressions: Vec<String>,
    schedules: Vec<Schedule>,
}

impl CronScheduler {
    /// 创建新的CRON调度器
    pub fn new(cron_expr: &str) -> BroadcastResult<Self> {
        Self::union(&[cron_expr])
    }

    /// 由多个表达式组成的调度器，触发时间为各表达式的并集
    pub fn union(cron_exprs: &[&str]) -> BroadcastResult<Self> {
        if cron_exprs.is_empty() {
            return Err(BroadcastError::InvalidCron {
                expr: String::new(),
                message: "至少需要一个CRON表达式".to_string(),
            });
        }

        let schedules = cron_exprs
            .iter()
            .map(|expr| parse(expr))
            .collect::<BroadcastResult<Vec<_>>>()?;

        Ok(Self {
            expressions: cron_exprs.iter().map(|e| e.to_string()).collect(),
            schedules,
        })
    }

    pub fn expressions(&self) -> &[String] {
        &self.expressions
    }

    /// 获取下一次执行时间（严格晚于 `from`）
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|s| s.after(&from).next())
            .min()
    }

    /// 获取从指定时间开始的多个执行时间，多个表达式重合的时刻只出现一次
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = from;
        while times.len() < count {
            match self.next_execution_time(cursor) {
                Some(next) => {
                    times.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        times
    }

    /// `(start, end]` 区间内的所有触发时间
    pub fn fires_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut times = Vec::new();
        let mut cursor = start;
        while let Some(next) = self.next_execution_time(cursor) {
            if next > end {
                break;
            }
            times.push(next);
            cursor = next;
        }
        times
    }

    /// 不晚于 `now` 的最近一次触发时间
    pub fn latest_at_or_before(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|s| s.after(&(now - Duration::days(LOOKBACK_DAYS))).take_while(|t| *t <= now).last())
            .max()
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> BroadcastResult<()> {
        parse(cron_expr).map(|_| ())
    }

    /// 自上次执行后是否已有触发时间到期
    pub fn should_trigger(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let from = last_run.unwrap_or(now - Duration::minutes(1));
        match self.next_execution_time(from) {
            Some(next) if next <= now => {
                debug!(
                    "到达触发时间: 上次执行={:?}, 触发时间={}, 当前时间={}",
                    last_run,
                    next.format("%Y-%m-%d %H:%M:%S UTC"),
                    now.format("%Y-%m-%d %H:%M:%S UTC")
                );
                true
            }
            _ => false,
        }
    }

    /// 计算下次执行时间距离现在的时长
    pub fn time_until_next_execution(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.next_execution_time(now).map(|next| next - now)
    }
}

fn parse(cron_expr: &str) -> BroadcastResult<Schedule> {
    Schedule::from_str(cron_expr).map_err(|e| BroadcastError::InvalidCron {
        expr: cron_expr.to_string(),
        message: e.to_string(),
    })
}
