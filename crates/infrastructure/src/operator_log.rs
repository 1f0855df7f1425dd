//! Operator log sinks
//!
//! Entries always go to the structured log. When a webhook is configured they
//! are also posted to the operators' channel; delivery failures there are only
//! warned about and never reach the caller.

use std::time::Duration;

use async_trait::async_trait;
use broadcaster_core::{BroadcastError, BroadcastResult};
use broadcaster_domain::ports::{OperatorLog, OperatorLogEntry, Severity};
use serde_json::json;
use tracing::{error, info, warn};

/// Message flag that suppresses push and desktop notifications
const SUPPRESS_NOTIFICATIONS: u32 = 1 << 12;

/// Writes entries as tracing events only
#[derive(Debug, Clone, Default)]
pub struct TracingOperatorLog;

#[async_trait]
impl OperatorLog for TracingOperatorLog {
    async fn log(&self, entry: OperatorLogEntry) {
        let category = entry.category.map(|c| c.as_str()).unwrap_or("-");
        match entry.severity {
            Severity::Info => info!(
                target: "operator",
                category,
                tenant_id = entry.tenant_id,
                destination_id = entry.destination_id,
                "{}",
                entry.message
            ),
            Severity::Warning => warn!(
                target: "operator",
                category,
                tenant_id = entry.tenant_id,
                destination_id = entry.destination_id,
                "{}",
                entry.message
            ),
            Severity::Error => error!(
                target: "operator",
                category,
                tenant_id = entry.tenant_id,
                destination_id = entry.destination_id,
                "{}",
                entry.message
            ),
        }
    }
}

/// Posts entries to an operator channel webhook
pub struct WebhookOperatorLog {
    client: reqwest::Client,
    webhook_url: String,
    local: TracingOperatorLog,
}

impl WebhookOperatorLog {
    /// `timeout` 限制单次请求的总时长，无响应的 webhook 不会拖住推送流程
    pub fn new(webhook_url: impl Into<String>, timeout: Duration) -> BroadcastResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BroadcastError::Configuration(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
            local: TracingOperatorLog,
        })
    }

    pub fn format_entry(entry: &OperatorLogEntry) -> String {
        let mut text = format!("**[{}]**", entry.severity);
        if let Some(category) = entry.category {
            text.push_str(&format!(" `{category}`"));
        }
        text.push(' ');
        text.push_str(&entry.message);
        if let (Some(tenant), Some(destination)) = (entry.tenant_id, entry.destination_id) {
            text.push_str(&format!("\n-# tenant `{tenant}` destination `{destination}`"));
        }
        text
    }

    pub fn payload(entry: &OperatorLogEntry) -> serde_json::Value {
        let mut payload = json!({
            "content": Self::format_entry(entry),
            "allowed_mentions": { "parse": [] },
        });
        if entry.silent {
            payload["flags"] = json!(SUPPRESS_NOTIFICATIONS);
        }
        payload
    }

    async fn post(&self, entry: &OperatorLogEntry) -> BroadcastResult<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&Self::payload(entry))
            .send()
            .await
            .map_err(|e| BroadcastError::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(BroadcastError::Platform(format!(
                "运维webhook返回 HTTP {}",
                response.status()
            )))
        }
    }
}

#[async_trait]
impl OperatorLog for WebhookOperatorLog {
    async fn log(&self, entry: OperatorLogEntry) {
        if let Err(e) = self.post(&entry).await {
            warn!("发送运维日志失败: {}", e);
        }
        self.local.log(entry).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broadcaster_domain::categories::AlertCategory;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn sink(url: String) -> WebhookOperatorLog {
        WebhookOperatorLog::new(url, Duration::from_secs(1)).unwrap()
    }

    /// 读取一个完整的HTTP请求，返回请求体
    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return text[end + 4..end + 4 + length].to_string();
                }
            }
        }
        String::new()
    }

    #[test]
    fn test_format_entry_includes_ids() {
        let entry = OperatorLogEntry::new(
            Severity::Error,
            Some(AlertCategory::CrateRespawn),
            "channel not found",
        )
        .with_target(12, 34);
        let text = WebhookOperatorLog::format_entry(&entry);
        assert!(text.starts_with("**[ERROR]** `crate_respawn`"));
        assert!(text.contains("tenant `12` destination `34`"));
    }

    #[test]
    fn test_payload_flags_only_for_silent_entries() {
        let loud = OperatorLogEntry::new(Severity::Info, Some(AlertCategory::Controller), "done");
        let payload = WebhookOperatorLog::payload(&loud);
        assert!(payload.get("flags").is_none());
        assert_eq!(payload["allowed_mentions"]["parse"], json!([]));

        let quiet = loud.silent(true);
        assert_eq!(
            WebhookOperatorLog::payload(&quiet)["flags"],
            json!(SUPPRESS_NOTIFICATIONS)
        );
    }

    #[tokio::test]
    async fn test_silent_entry_is_posted_with_suppress_flag() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (body_tx, body_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let body = read_request(&mut socket).await;
            socket
                .write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
            let _ = body_tx.send(body);
        });

        let entry = OperatorLogEntry::new(
            Severity::Error,
            Some(AlertCategory::Medics),
            "send failed",
        )
        .with_target(3, 30)
        .silent(true);
        sink(format!("http://{addr}/hook")).log(entry).await;

        let body = tokio::time::timeout(Duration::from_secs(5), body_rx)
            .await
            .unwrap()
            .unwrap();
        let posted: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(posted["flags"], json!(SUPPRESS_NOTIFICATIONS));
        assert!(posted["content"]
            .as_str()
            .unwrap()
            .contains("tenant `3` destination `30`"));
    }

    #[tokio::test]
    async fn test_unresponsive_webhook_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // 接受连接后既不读也不回
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let sink = sink(format!("http://{addr}/hook"));
        let finished = tokio::time::timeout(
            Duration::from_secs(5),
            sink.log(OperatorLogEntry::new(Severity::Info, None, "hello")),
        )
        .await;
        assert!(finished.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_swallowed() {
        sink("http://127.0.0.1:9/unreachable".to_string())
            .log(OperatorLogEntry::new(Severity::Info, None, "hello"))
            .await;
    }
}
