use std::net::SocketAddr;

use anyhow::{Context, Result};
use broadcaster_core::config::MetricsConfig;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// 安装 Prometheus 指标导出器，未启用时不做任何事
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        info!("指标导出未启用");
        return Ok(());
    }

    let addr: SocketAddr = config
        .listen_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {}", config.listen_address))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("安装Prometheus导出器失败")?;

    info!("Prometheus指标导出器已启动: {}", addr);
    Ok(())
}
