//! 配置管理
//!
//! 配置按以下顺序叠加：内置默认值、TOML 配置文件、`BROADCASTER__` 前缀的环境变量。
//! 加载完成后统一校验，校验失败时进程拒绝启动。

pub mod models;

pub use models::*;
