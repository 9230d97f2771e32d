use serde::{Deserialize, Serialize};

/// Default relative path of the server settings document.
pub const DEFAULT_SETTINGS_URL: &str = "public/config/bot.json";
/// Default steady-state connect timeout in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
/// Default connect timeout at application startup in milliseconds.
pub const DEFAULT_STARTUP_CONNECT_TIMEOUT_MS: u64 = 120_000;

fn default_settings_url() -> String {
    DEFAULT_SETTINGS_URL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_startup_connect_timeout() -> u64 {
    DEFAULT_STARTUP_CONNECT_TIMEOUT_MS
}

fn default_screen_saver_timeout() -> u64 {
    600
}

fn default_screen_saver_timer_interval() -> u64 {
    50_000
}

/// Local bot identity, persisted as `settings.json` in the profile directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientConfig {
    #[serde(default)]
    pub orchestrator_url: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    /// Encrypted, base64-encoded token. Decrypt with the bot id as entropy.
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Server settings path, relative to the orchestrator URL
    #[serde(default = "default_settings_url")]
    pub settings_url: String,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default = "default_true")]
    pub auto_startup: bool,
    #[serde(default)]
    pub prevent_lock: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            orchestrator_url: None,
            bot_id: None,
            bot_token: None,
            settings_url: default_settings_url(),
            auto_reconnect: true,
            auto_startup: true,
            prevent_lock: false,
        }
    }
}

/// Operational parameters served by the orchestrator. Never persisted locally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerConfig {
    #[serde(default)]
    pub agent_url: Option<String>,
    /// Agent jar path, relative to the profile directory
    #[serde(default)]
    pub agent_path: Option<String>,
    #[serde(default)]
    pub agent_version: Option<String>,
    /// Launch argument template with `<PropertyName>` placeholders
    #[serde(default)]
    pub agent_arguments: Option<String>,
    #[serde(default)]
    pub java_url: Option<String>,
    /// Directory holding the runtime executable, relative to the profile directory
    #[serde(default)]
    pub java_path: Option<String>,
    #[serde(default)]
    pub java_version: Option<String>,
    /// Milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Milliseconds
    #[serde(default = "default_startup_connect_timeout")]
    pub startup_connect_timeout: u64,
    #[serde(default)]
    pub task_scheduler_name: Option<String>,
    #[serde(default)]
    pub extension_auth_url: Option<String>,
    #[serde(default)]
    pub extension_auth_id: Option<String>,
    #[serde(default)]
    pub extension_auth_secret: Option<String>,
    /// Seconds
    #[serde(default = "default_screen_saver_timeout")]
    pub screen_saver_timeout: u64,
    /// Milliseconds
    #[serde(default = "default_screen_saver_timer_interval")]
    pub screen_saver_timer_interval: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            agent_url: None,
            agent_path: None,
            agent_version: None,
            agent_arguments: None,
            java_url: None,
            java_path: None,
            java_version: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_MS,
            startup_connect_timeout: DEFAULT_STARTUP_CONNECT_TIMEOUT_MS,
            task_scheduler_name: None,
            extension_auth_url: None,
            extension_auth_id: None,
            extension_auth_secret: None,
            screen_saver_timeout: default_screen_saver_timeout(),
            screen_saver_timer_interval: default_screen_saver_timer_interval(),
        }
    }
}

impl ServerConfig {
    /// Connect timeout for a connect attempt, in milliseconds.
    pub fn connect_timeout_ms(&self, at_startup: bool) -> u64 {
        if at_startup {
            self.startup_connect_timeout
        } else {
            self.connect_timeout
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    pub client: ClientConfig,
    pub server: ServerConfig,
}
