pub mod permissions;
pub mod rest_client;

pub use permissions::compute_channel_permissions;
pub use rest_client::RestChatPlatform;
