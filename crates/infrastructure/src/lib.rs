pub mod database;
pub mod observability;
pub mod operator_log;
pub mod platform;

pub use database::*;
pub use observability::*;
pub use operator_log::{TracingOperatorLog, WebhookOperatorLog};
pub use platform::RestChatPlatform;
