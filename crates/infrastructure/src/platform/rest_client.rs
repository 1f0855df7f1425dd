use std::time::Duration;

use async_trait::async_trait;
use broadcaster_core::{config::PlatformConfig, BroadcastError, BroadcastResult};
use broadcaster_domain::ports::{ChatPlatform, Destination, OutboundMessage, SentMessage};
use reqwest::{header, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use metrics::counter;
use tracing::{debug, warn};

use super::permissions::{
    compute_channel_permissions, OverwriteKind, PermissionContext, PermissionOverwrite,
    RolePermissions,
};

/// 告警嵌入消息的颜色
const EMBED_COLOR: u32 = 0x5865F2;
/// 可以承载告警的频道类型：文字频道与公告频道
const TEXT_CHANNEL_TYPES: [u8; 2] = [0, 5];

#[derive(Debug, Deserialize)]
struct ChannelPayload {
    #[serde(rename = "type")]
    kind: u8,
    guild_id: Option<String>,
    #[serde(default)]
    permission_overwrites: Vec<OverwritePayload>,
}

#[derive(Debug, Deserialize)]
struct OverwritePayload {
    id: String,
    #[serde(rename = "type")]
    kind: u8,
    allow: String,
    deny: String,
}

#[derive(Debug, Deserialize)]
struct GuildPayload {
    owner_id: String,
    preferred_locale: Option<String>,
    system_channel_id: Option<String>,
    #[serde(default)]
    roles: Vec<RolePayload>,
}

#[derive(Debug, Deserialize)]
struct RolePayload {
    id: String,
    permissions: String,
}

#[derive(Debug, Deserialize)]
struct MemberPayload {
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MessagePayload {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RateLimitPayload {
    retry_after: f64,
}

fn parse_id(value: &str) -> BroadcastResult<i64> {
    value
        .parse::<i64>()
        .map_err(|e| BroadcastError::Serialization(format!("无效的ID {value}: {e}")))
}

fn parse_bits(value: &str) -> BroadcastResult<u64> {
    value
        .parse::<u64>()
        .map_err(|e| BroadcastError::Serialization(format!("无效的权限位 {value}: {e}")))
}

/// 基于 REST 接口的聊天平台客户端
#[derive(Clone)]
pub struct RestChatPlatform {
    client: reqwest::Client,
    api_base_url: String,
    application_id: i64,
    stats_channel_id: Option<i64>,
}

impl RestChatPlatform {
    pub fn new(config: &PlatformConfig) -> BroadcastResult<Self> {
        if config.bot_token.trim().is_empty() {
            return Err(BroadcastError::Configuration(
                "未配置机器人令牌 (BROADCASTER__PLATFORM__BOT_TOKEN)".to_string(),
            ));
        }

        let mut headers = header::HeaderMap::new();
        let auth = header::HeaderValue::from_str(&format!("Bot {}", config.bot_token.trim()))
            .map_err(|e| BroadcastError::Configuration(format!("机器人令牌格式无效: {e}")))?;
        headers.insert(header::AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("broadcaster/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| BroadcastError::Configuration(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            application_id: config.application_id,
            stats_channel_id: config.stats_channel_id,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }

    /// 发送请求，遇到限流时按服务端给出的时间等待后重试一次
    async fn execute<F>(&self, build: F) -> BroadcastResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let response = build()
            .send()
            .await
            .map_err(|e| BroadcastError::Network(e.to_string()))?;

        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            return Ok(response);
        }

        let retry_after = response
            .json::<RateLimitPayload>()
            .await
            .map(|p| p.retry_after)
            .unwrap_or(1.0)
            .clamp(0.0, 60.0);
        warn!("平台接口限流，{:.2} 秒后重试", retry_after);
        counter!("broadcaster_platform_rate_limited_total").increment(1);
        tokio::time::sleep(Duration::from_secs_f64(retry_after)).await;

        build()
            .send()
            .await
            .map_err(|e| BroadcastError::Network(e.to_string()))
    }

    async fn expect_json<T: DeserializeOwned>(response: Response, what: &str) -> BroadcastResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BroadcastError::Platform(format!("{what}: HTTP {status} - {body}")));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| BroadcastError::Serialization(format!("{what}: {e}")))
    }

    async fn expect_success(response: Response, what: &str) -> BroadcastResult<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(BroadcastError::Platform(format!("{what}: HTTP {status} - {body}")))
    }

    async fn fetch_guild(&self, tenant_id: i64) -> BroadcastResult<GuildPayload> {
        let url = self.url(&format!("/guilds/{tenant_id}"));
        let response = self.execute(|| self.client.get(&url)).await?;
        Self::expect_json(response, "获取租户信息失败").await
    }

    async fn fetch_own_member(&self, tenant_id: i64) -> BroadcastResult<MemberPayload> {
        let url = self.url(&format!(
            "/guilds/{tenant_id}/members/{}",
            self.application_id
        ));
        let response = self.execute(|| self.client.get(&url)).await?;
        Self::expect_json(response, "获取机器人成员信息失败").await
    }
}

#[async_trait]
impl ChatPlatform for RestChatPlatform {
    async fn resolve_destination(&self, destination_id: i64) -> BroadcastResult<Option<Destination>> {
        let url = self.url(&format!("/channels/{destination_id}"));
        let response = self.execute(|| self.client.get(&url)).await?;

        if matches!(
            response.status(),
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN
        ) {
            debug!("频道 {} 不存在或无权访问", destination_id);
            return Ok(None);
        }
        let channel: ChannelPayload = Self::expect_json(response, "获取频道信息失败").await?;

        let Some(guild_id) = channel.guild_id.as_deref() else {
            return Ok(None);
        };
        if !TEXT_CHANNEL_TYPES.contains(&channel.kind) {
            debug!("频道 {} 类型 {} 无法承载告警", destination_id, channel.kind);
            return Ok(None);
        }
        let tenant_id = parse_id(guild_id)?;

        let guild = self.fetch_guild(tenant_id).await?;
        let member = self.fetch_own_member(tenant_id).await?;

        let roles = guild
            .roles
            .iter()
            .map(|r| {
                Ok(RolePermissions {
                    id: parse_id(&r.id)?,
                    permissions: parse_bits(&r.permissions)?,
                })
            })
            .collect::<BroadcastResult<Vec<_>>>()?;
        let member_role_ids = member
            .roles
            .iter()
            .map(|id| parse_id(id))
            .collect::<BroadcastResult<Vec<_>>>()?;
        let overwrites = channel
            .permission_overwrites
            .iter()
            .map(|o| {
                Ok(PermissionOverwrite {
                    id: parse_id(&o.id)?,
                    kind: if o.kind == 1 {
                        OverwriteKind::Member
                    } else {
                        OverwriteKind::Role
                    },
                    allow: parse_bits(&o.allow)?,
                    deny: parse_bits(&o.deny)?,
                })
            })
            .collect::<BroadcastResult<Vec<_>>>()?;

        let permissions = compute_channel_permissions(&PermissionContext {
            tenant_id,
            owner_id: parse_id(&guild.owner_id)?,
            member_id: self.application_id,
            member_role_ids: &member_role_ids,
            roles: &roles,
            overwrites: &overwrites,
        });

        Ok(Some(Destination {
            id: destination_id,
            tenant_id,
            permissions,
            tenant_locale: guild.preferred_locale,
        }))
    }

    async fn send_message(
        &self,
        destination_id: i64,
        message: &OutboundMessage,
    ) -> BroadcastResult<SentMessage> {
        let mut embed = json!({
            "title": message.title,
            "description": message.body,
            "color": EMBED_COLOR,
        });
        if let Some(footer) = &message.footer {
            embed["footer"] = json!({ "text": footer });
        }

        let (content, mentioned_roles) = match message.audience_tag_id {
            Some(tag) => (format!("<@&{tag}>"), vec![tag.to_string()]),
            None => (String::new(), Vec::new()),
        };
        let payload = json!({
            "content": content,
            "embeds": [embed],
            "allowed_mentions": { "parse": [], "roles": mentioned_roles },
        });

        let url = self.url(&format!("/channels/{destination_id}/messages"));
        let response = self
            .execute(|| self.client.post(&url).json(&payload))
            .await?;
        let sent: MessagePayload = Self::expect_json(response, "发送告警消息失败").await?;

        Ok(SentMessage {
            destination_id,
            message_id: parse_id(&sent.id)?,
        })
    }

    async fn schedule_delete(&self, message: SentMessage, delay: Duration) -> BroadcastResult<()> {
        let client = self.client.clone();
        let url = self.url(&format!(
            "/channels/{}/messages/{}",
            message.destination_id, message.message_id
        ));

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match client.delete(&url).send().await {
                Ok(response)
                    if response.status().is_success()
                        || response.status() == StatusCode::NOT_FOUND =>
                {
                    debug!("已删除过期告警消息 {}", message.message_id);
                }
                Ok(response) => {
                    warn!(
                        "删除告警消息 {} 失败: HTTP {}",
                        message.message_id,
                        response.status()
                    );
                }
                Err(e) => warn!("删除告警消息 {} 失败: {}", message.message_id, e),
            }
        });

        Ok(())
    }

    async fn notify_tenant(&self, tenant_id: i64, text: &str) -> BroadcastResult<()> {
        let guild = self.fetch_guild(tenant_id).await?;
        let Some(system_channel) = guild.system_channel_id else {
            debug!("租户 {} 没有系统频道，跳过通知", tenant_id);
            return Ok(());
        };

        let payload = json!({
            "content": text,
            "allowed_mentions": { "parse": [] },
        });
        let url = self.url(&format!("/channels/{system_channel}/messages"));
        let response = self
            .execute(|| self.client.post(&url).json(&payload))
            .await?;
        Self::expect_success(response, "发送租户通知失败").await
    }

    async fn has_premium_entitlement(&self, tenant_id: i64) -> BroadcastResult<bool> {
        let url = self.url(&format!(
            "/applications/{}/entitlements?guild_id={tenant_id}&exclude_ended=true",
            self.application_id
        ));
        let response = self.execute(|| self.client.get(&url)).await?;
        let entitlements: Vec<serde_json::Value> =
            Self::expect_json(response, "查询订阅状态失败").await?;
        Ok(!entitlements.is_empty())
    }

    async fn update_tenant_count(&self, count: u64) -> BroadcastResult<()> {
        let Some(channel_id) = self.stats_channel_id else {
            debug!("未配置统计频道，跳过租户数量更新");
            return Ok(());
        };

        let payload = json!({ "name": format!("Servers: {count}") });
        let url = self.url(&format!("/channels/{channel_id}"));
        let response = self
            .execute(|| self.client.patch(&url).json(&payload))
            .await?;
        Self::expect_success(response, "更新租户数量失败").await
    }
}
