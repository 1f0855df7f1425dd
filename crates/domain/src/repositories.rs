//! 领域仓储抽象
//!
//! 注册表是根数据，静音时段、自定义文案和语言偏好依附于租户存在，
//! 推送流程在它们缺失时使用默认值。

use async_trait::async_trait;
use broadcaster_core::BroadcastResult;

use crate::categories::AlertCategory;
use crate::entities::{
    BlacklistEntry, DispatchCandidate, EligibilityPredicate, LocalePreference, MuteWindow,
    PremiumOverride, TenantAlertRegistration,
};

/// 租户注册仓储
#[async_trait]
pub trait RegistrationRepository: Send + Sync {
    /// 按 (tenant_id, category) 插入或覆盖注册信息；有静音时段的类别在同一事务中
    /// 补建全部未静音的时段记录，已有的静音设置保持不变
    async fn upsert(&self, registration: &TenantAlertRegistration) -> BroadcastResult<()>;
    async fn find(
        &self,
        tenant_id: i64,
        category: AlertCategory,
    ) -> BroadcastResult<Option<TenantAlertRegistration>>;
    async fn find_by_tenant(&self, tenant_id: i64)
        -> BroadcastResult<Vec<TenantAlertRegistration>>;
    /// 按租户ID升序返回满足条件的候选租户
    async fn find_eligible(
        &self,
        category: AlertCategory,
        predicate: EligibilityPredicate,
    ) -> BroadcastResult<Vec<DispatchCandidate>>;
    /// 删除注册及其静音时段，返回是否存在
    async fn delete(&self, tenant_id: i64, category: AlertCategory) -> BroadcastResult<bool>;
    async fn delete_tenant(&self, tenant_id: i64) -> BroadcastResult<u64>;
    async fn delete_by_destination(&self, destination_id: i64) -> BroadcastResult<u64>;
    async fn save_mute_window(&self, window: &MuteWindow) -> BroadcastResult<()>;
    async fn find_mute_window(
        &self,
        tenant_id: i64,
        category: AlertCategory,
    ) -> BroadcastResult<Option<MuteWindow>>;
    /// 至少注册了一个类别的租户数量
    async fn count_tenants(&self) -> BroadcastResult<u64>;
}

/// 租户偏好仓储（语言与自定义文案）
#[async_trait]
pub trait PreferenceRepository: Send + Sync {
    async fn find_locale(&self, tenant_id: i64) -> BroadcastResult<Option<LocalePreference>>;
    async fn save_locale(&self, preference: &LocalePreference) -> BroadcastResult<()>;
    async fn delete_locale(&self, tenant_id: i64) -> BroadcastResult<bool>;
    async fn find_premium_override(
        &self,
        tenant_id: i64,
        category: AlertCategory,
    ) -> BroadcastResult<Option<PremiumOverride>>;
    async fn save_premium_override(&self, premium: &PremiumOverride) -> BroadcastResult<()>;
    async fn delete_premium_override(
        &self,
        tenant_id: i64,
        category: AlertCategory,
    ) -> BroadcastResult<bool>;
    /// 删除租户的全部偏好
    async fn delete_tenant(&self, tenant_id: i64) -> BroadcastResult<u64>;
}

/// 黑名单仓储
#[async_trait]
pub trait BlacklistRepository: Send + Sync {
    async fn find(&self, tenant_id: i64) -> BroadcastResult<Option<BlacklistEntry>>;
    /// 警告次数加一并返回最新记录
    async fn add_strike(&self, tenant_id: i64) -> BroadcastResult<BlacklistEntry>;
}
