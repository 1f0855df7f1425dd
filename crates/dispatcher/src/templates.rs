//! 告警文案与本地化
//!
//! 内置 `en` 与 `de` 两套翻译，可由外部TOML目录按类别覆盖或新增语言。
//! 渲染是纯函数，不会成为投递失败的来源。

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use broadcaster_core::{BroadcastError, BroadcastResult, TemplateConfig};
use broadcaster_domain::{
    categories::AlertCategory, entities::PREMIUM_TIMESTAMP_TOKEN, ports::Capability,
};

const BUILTIN_CATALOGS: [(&str, &str); 2] = [
    ("en", include_str!("../locales/en.toml")),
    ("de", include_str!("../locales/de.toml")),
];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageTemplate {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub footer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NoticeTemplates {
    pub permission_denied: String,
    pub send_failed: String,
}

/// 单一语言的翻译目录，键为类别名
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocaleCatalog {
    #[serde(default)]
    pub alerts: HashMap<String, MessageTemplate>,
    #[serde(default)]
    pub notices: Option<NoticeTemplates>,
}

impl LocaleCatalog {
    fn parse(locale: &str, source: &str) -> BroadcastResult<Self> {
        let catalog: LocaleCatalog = toml::from_str(source).map_err(|e| {
            BroadcastError::Serialization(format!("翻译目录 {locale} 解析失败: {e}"))
        })?;
        catalog.check_keys()?;
        Ok(catalog)
    }

    fn check_keys(&self) -> BroadcastResult<()> {
        for key in self.alerts.keys() {
            key.parse::<AlertCategory>()?;
        }
        Ok(())
    }

    fn merge(&mut self, other: LocaleCatalog) {
        self.alerts.extend(other.alerts);
        if other.notices.is_some() {
            self.notices = other.notices;
        }
    }
}

/// 渲染后的告警消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub title: String,
    pub body: String,
    pub footer: Option<String>,
}

/// 发给租户的一次性说明
#[derive(Debug, Clone, Copy)]
pub enum Notice<'a> {
    PermissionDenied {
        destination_id: i64,
        missing: &'a [Capability],
    },
    SendFailed {
        destination_id: i64,
    },
}

#[derive(Debug, Clone)]
pub struct TemplateResolver {
    default_locale: String,
    catalogs: HashMap<String, LocaleCatalog>,
}

impl TemplateResolver {
    /// 仅包含内置翻译
    pub fn builtin(default_locale: &str) -> BroadcastResult<Self> {
        let mut catalogs = HashMap::new();
        for (locale, source) in BUILTIN_CATALOGS {
            catalogs.insert(locale.to_string(), LocaleCatalog::parse(locale, source)?);
        }

        let resolver = Self {
            default_locale: normalize_code(default_locale),
            catalogs,
        };
        resolver.check_default_locale()?;
        Ok(resolver)
    }

    /// 合并外部翻译目录，文件顶层表的键为语言代码
    pub fn with_catalog_file(mut self, path: impl AsRef<Path>) -> BroadcastResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            BroadcastError::Configuration(format!("无法读取翻译目录 {}: {e}", path.display()))
        })?;
        let external: HashMap<String, LocaleCatalog> = toml::from_str(&source).map_err(|e| {
            BroadcastError::Serialization(format!("翻译目录 {} 解析失败: {e}", path.display()))
        })?;

        for (locale, catalog) in external {
            catalog.check_keys()?;
            self.catalogs
                .entry(normalize_code(&locale))
                .or_default()
                .merge(catalog);
        }

        info!("已加载外部翻译目录: {}", path.display());
        Ok(self)
    }

    pub fn from_config(config: &TemplateConfig) -> BroadcastResult<Self> {
        let resolver = Self::builtin(&config.default_locale)?;
        match &config.catalog_path {
            Some(path) => resolver.with_catalog_file(path),
            None => Ok(resolver),
        }
    }

    pub fn default_locale(&self) -> &str {
        &self.default_locale
    }

    pub fn supports_locale(&self, locale: &str) -> bool {
        self.lookup_locale(locale).is_some()
    }

    /// 精确匹配，其次去掉地区后缀的基础语言
    pub fn lookup_locale(&self, locale: &str) -> Option<&str> {
        let code = normalize_code(locale);
        if let Some((key, _)) = self.catalogs.get_key_value(&code) {
            return Some(key.as_str());
        }
        let base = code.split('-').next()?;
        self.catalogs
            .get_key_value(base)
            .map(|(key, _)| key.as_str())
    }

    /// 显式偏好 → 平台上报的租户语言 → 默认语言
    pub fn resolve_locale(&self, explicit: Option<&str>, platform: Option<&str>) -> &str {
        explicit
            .and_then(|l| self.lookup_locale(l))
            .or_else(|| platform.and_then(|l| self.lookup_locale(l)))
            .unwrap_or(&self.default_locale)
    }

    pub fn render(
        &self,
        category: AlertCategory,
        locale: &str,
        is_premium: bool,
        override_text: Option<&str>,
        event_at: DateTime<Utc>,
    ) -> RenderedMessage {
        let slots = TimeSlots::new(category, event_at);
        let template = self.template_for(category, locale);

        let (title, default_body, footer) = match template {
            Some(t) => (t.title.clone(), slots.fill(&t.body), t.footer.clone()),
            None => (category.as_str().to_string(), slots.relative.clone(), None),
        };

        let body = match override_text.filter(|text| is_premium && !text.trim().is_empty()) {
            Some(text) => text.replace(PREMIUM_TIMESTAMP_TOKEN, &slots.relative),
            None => default_body,
        };

        RenderedMessage {
            title,
            body,
            footer,
        }
    }

    pub fn render_notice(&self, locale: &str, notice: Notice<'_>) -> String {
        let notices = self
            .lookup_locale(locale)
            .and_then(|l| self.catalogs.get(l))
            .and_then(|c| c.notices.as_ref())
            .or_else(|| {
                self.catalogs
                    .get(&self.default_locale)
                    .and_then(|c| c.notices.as_ref())
            });

        let Some(notices) = notices else {
            return String::new();
        };

        match notice {
            Notice::PermissionDenied {
                destination_id,
                missing,
            } => {
                let missing = missing
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                notices
                    .permission_denied
                    .replace("{destination}", &destination_id.to_string())
                    .replace("{missing}", &missing)
            }
            Notice::SendFailed { destination_id } => notices
                .send_failed
                .replace("{destination}", &destination_id.to_string()),
        }
    }

    fn template_for(&self, category: AlertCategory, locale: &str) -> Option<&MessageTemplate> {
        let key = category.as_str();
        let from_locale = self
            .lookup_locale(locale)
            .and_then(|l| self.catalogs.get(l))
            .and_then(|c| c.alerts.get(key));

        from_locale.or_else(|| {
            debug!(category = key, locale, "使用默认语言文案");
            self.catalogs
                .get(&self.default_locale)
                .and_then(|c| c.alerts.get(key))
        })
    }

    fn check_default_locale(&self) -> BroadcastResult<()> {
        let catalog = self
            .catalogs
            .get(&self.default_locale)
            .ok_or_else(|| BroadcastError::UnsupportedLocale(self.default_locale.clone()))?;

        let missing: Vec<&str> = AlertCategory::ALL
            .iter()
            .map(|c| c.as_str())
            .filter(|key| !catalog.alerts.contains_key(*key))
            .collect();
        if !missing.is_empty() || catalog.notices.is_none() {
            return Err(BroadcastError::Configuration(format!(
                "默认语言 {} 的翻译不完整: {:?}",
                self.default_locale, missing
            )));
        }
        Ok(())
    }
}

fn normalize_code(locale: &str) -> String {
    locale.trim().to_lowercase().replace('_', "-")
}

/// 平台时间戳标记
struct TimeSlots {
    time: String,
    relative: String,
    full: String,
    next: String,
}

impl TimeSlots {
    fn new(category: AlertCategory, event_at: DateTime<Utc>) -> Self {
        let ts = event_at.timestamp();
        let next = category.next_occurrence(event_at).timestamp();
        Self {
            time: format!("<t:{ts}:t>"),
            relative: format!("<t:{ts}:R>"),
            full: format!("<t:{ts}:F>"),
            next: format!("<t:{next}:F>"),
        }
    }

    fn fill(&self, text: &str) -> String {
        text.replace("{time}", &self.time)
            .replace("{relative}", &self.relative)
            .replace("{full}", &self.full)
            .replace("{next}", &self.next)
    }
}
