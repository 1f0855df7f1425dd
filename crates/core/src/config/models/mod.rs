pub mod app_config;
pub mod database;
pub mod dispatcher;
pub mod observability;
pub mod platform;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use dispatcher::{DispatcherConfig, TemplateConfig};
pub use observability::{LogLevel, LoggingConfig, MetricsConfig, OutputFormat};
pub use platform::{OperatorLogConfig, PlatformConfig};
