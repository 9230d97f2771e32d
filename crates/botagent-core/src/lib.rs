pub mod build_info;
pub mod bus;
pub mod config;
pub mod message;
pub mod types;
pub mod url;

pub use build_info::BuildIdentity;
pub use bus::EventBus;
pub use config::{ClientConfig, Config, ServerConfig};
pub use message::MessageKind;
pub use types::{BotIcon, ConnectionStatus, StatusChanged};
pub use url::join_url;

/// Application title, used for the profile directory and the Windows resource.
pub const APP_TITLE: &str = "BotAgent";
