//! 租户命令入口
//!
//! 注册、移除、静音、自定义文案、语言偏好以及平台事件（频道删除、
//! 集成被移除）的处理。所有校验错误都以类型化的 [`BroadcastError`] 返回。

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use broadcaster_core::{BroadcastError, BroadcastResult};
use broadcaster_domain::{
    categories::AlertCategory,
    entities::{
        LocalePreference, MuteWindow, PremiumOverride, RegistrationSchedule,
        TenantAlertRegistration,
    },
    ports::ChatPlatform,
    repositories::{BlacklistRepository, PreferenceRepository, RegistrationRepository},
};

use crate::templates::TemplateResolver;

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterRequest {
    pub tenant_id: i64,
    pub category: AlertCategory,
    pub destination_id: i64,
    pub audience_tag_id: Option<i64>,
    pub registered_by: i64,
    /// 为空时使用类别的默认值；固定整点类别必须提供
    pub schedule: Option<RegistrationSchedule>,
    pub auto_delete: bool,
}

/// 租户移除时的清理统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovalSummary {
    pub registrations: u64,
    pub preferences: u64,
}

pub struct TenantCommandService {
    registrations: Arc<dyn RegistrationRepository>,
    preferences: Arc<dyn PreferenceRepository>,
    blacklist: Arc<dyn BlacklistRepository>,
    platform: Arc<dyn ChatPlatform>,
    templates: Arc<TemplateResolver>,
    strike_threshold: i64,
}

impl TenantCommandService {
    pub fn new(
        registrations: Arc<dyn RegistrationRepository>,
        preferences: Arc<dyn PreferenceRepository>,
        blacklist: Arc<dyn BlacklistRepository>,
        platform: Arc<dyn ChatPlatform>,
        templates: Arc<TemplateResolver>,
        strike_threshold: i64,
    ) -> Self {
        Self {
            registrations,
            preferences,
            blacklist,
            platform,
            templates,
            strike_threshold,
        }
    }

    /// 重复注册同一类别时覆盖原有设置；静音时段保持不变
    pub async fn register_tenant(
        &self,
        request: RegisterRequest,
    ) -> BroadcastResult<TenantAlertRegistration> {
        if let Some(entry) = self.blacklist.find(request.tenant_id).await? {
            if entry.strikes >= self.strike_threshold {
                warn!(
                    tenant_id = request.tenant_id,
                    strikes = entry.strikes,
                    "拒绝黑名单租户的注册"
                );
                return Err(BroadcastError::Blacklisted {
                    tenant_id: request.tenant_id,
                    strikes: entry.strikes,
                });
            }
        }

        let schedule = request
            .schedule
            .or_else(|| RegistrationSchedule::default_for(request.category))
            .ok_or_else(|| BroadcastError::InvalidSchedule {
                category: request.category.as_str().to_string(),
                message: "必须选择推送的整点".to_string(),
            })?;
        schedule.validate_for(request.category)?;

        let registration = TenantAlertRegistration {
            tenant_id: request.tenant_id,
            category: request.category,
            destination_id: request.destination_id,
            audience_tag_id: request.audience_tag_id,
            registered_by: request.registered_by,
            schedule,
            auto_delete: request.auto_delete,
            registered_at: Utc::now(),
        };

        self.registrations.upsert(&registration).await?;

        info!(
            tenant_id = registration.tenant_id,
            category = %registration.category,
            destination_id = registration.destination_id,
            "租户注册成功"
        );
        Ok(registration)
    }

    /// 指定类别时只删除该类别的注册；否则删除租户的全部数据
    pub async fn remove_tenant(
        &self,
        tenant_id: i64,
        category: Option<AlertCategory>,
    ) -> BroadcastResult<RemovalSummary> {
        let summary = match category {
            Some(category) => {
                let removed = self.registrations.delete(tenant_id, category).await?;
                if !removed {
                    return Err(BroadcastError::NotRegistered {
                        tenant_id,
                        category: category.as_str().to_string(),
                    });
                }
                RemovalSummary {
                    registrations: 1,
                    preferences: 0,
                }
            }
            None => RemovalSummary {
                registrations: self.registrations.delete_tenant(tenant_id).await?,
                preferences: self.preferences.delete_tenant(tenant_id).await?,
            },
        };

        info!(tenant_id, ?category, ?summary, "租户数据已移除");
        Ok(summary)
    }

    /// 用给定的时段集合替换静音设置，未列出的时段视为未静音
    pub async fn set_mute_window(
        &self,
        tenant_id: i64,
        category: AlertCategory,
        muted_buckets: &[u8],
    ) -> BroadcastResult<MuteWindow> {
        if !category.has_mute_window() {
            return Err(BroadcastError::InvalidSchedule {
                category: category.as_str().to_string(),
                message: "该类别没有可静音的时段".to_string(),
            });
        }

        let window = MuteWindow::from_buckets(tenant_id, category, muted_buckets)?;

        if self.registrations.find(tenant_id, category).await?.is_none() {
            return Err(BroadcastError::NotRegistered {
                tenant_id,
                category: category.as_str().to_string(),
            });
        }

        self.registrations.save_mute_window(&window).await?;
        info!(
            tenant_id,
            category = %category,
            muted = ?window.muted_buckets(),
            "静音时段已更新"
        );
        Ok(window)
    }

    /// 空白文案删除已有的自定义文案，返回 None
    pub async fn set_premium_override(
        &self,
        tenant_id: i64,
        category: AlertCategory,
        text: &str,
    ) -> BroadcastResult<Option<PremiumOverride>> {
        if !self.platform.has_premium_entitlement(tenant_id).await? {
            return Err(BroadcastError::PremiumRequired { tenant_id });
        }

        if text.trim().is_empty() {
            self.preferences
                .delete_premium_override(tenant_id, category)
                .await?;
            info!(tenant_id, category = %category, "自定义文案已清除");
            return Ok(None);
        }

        let premium = PremiumOverride {
            tenant_id,
            category,
            text: text.to_string(),
            updated_at: Utc::now(),
        };
        self.preferences.save_premium_override(&premium).await?;
        info!(tenant_id, category = %category, "自定义文案已保存");
        Ok(Some(premium))
    }

    /// `locale` 为空时清除显式偏好，回落到平台语言
    pub async fn set_locale(
        &self,
        tenant_id: i64,
        locale: Option<&str>,
        set_by: i64,
    ) -> BroadcastResult<Option<LocalePreference>> {
        let Some(locale) = locale else {
            self.preferences.delete_locale(tenant_id).await?;
            info!(tenant_id, "语言偏好已清除");
            return Ok(None);
        };

        let code = self
            .templates
            .lookup_locale(locale)
            .ok_or_else(|| BroadcastError::UnsupportedLocale(locale.to_string()))?;

        let preference = LocalePreference {
            tenant_id,
            locale: code.to_string(),
            set_by,
            updated_at: Utc::now(),
        };
        self.preferences.save_locale(&preference).await?;
        info!(tenant_id, locale = %preference.locale, "语言偏好已更新");
        Ok(Some(preference))
    }

    /// 频道被删除后移除所有指向它的注册
    pub async fn handle_destination_deleted(&self, destination_id: i64) -> BroadcastResult<u64> {
        let removed = self
            .registrations
            .delete_by_destination(destination_id)
            .await?;
        if removed > 0 {
            info!(destination_id, removed, "频道已删除，清理相关注册");
        }
        Ok(removed)
    }

    /// 集成被移除：记一次警告并删除租户的全部数据
    pub async fn record_integration_removed(&self, tenant_id: i64) -> BroadcastResult<i64> {
        let entry = self.blacklist.add_strike(tenant_id).await?;
        self.remove_tenant(tenant_id, None).await?;

        if entry.strikes >= self.strike_threshold {
            warn!(tenant_id, strikes = entry.strikes, "租户已达到黑名单阈值");
        } else {
            info!(tenant_id, strikes = entry.strikes, "集成被移除，已记录警告");
        }
        Ok(entry.strikes)
    }
}
