use crate::notifier::Notifier;
use crate::paths::Paths;
use botagent_core::{BuildIdentity, ClientConfig, Config, EventBus, MessageKind, ServerConfig};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Upper bound for one settings fetch, independent of the download timeout.
pub const SETTINGS_TIMEOUT: Duration = Duration::from_secs(30);

/// Why the most recent reload failed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read identity file: {0}")]
    ReadLocal(String),
    #[error("failed to parse identity file: {0}")]
    ParseLocal(String),
    #[error("orchestrator URL is not configured")]
    MissingOrchestrator,
    #[error("orchestrator rejected this build (401 Unauthorized)")]
    Unauthorized,
    #[error("failed to fetch server settings: {0}")]
    Fetch(String),
    #[error("failed to parse server settings: {0}")]
    ParseRemote(String),
}

impl ConfigError {
    /// User-facing message for this failure.
    pub fn message(&self) -> MessageKind {
        match self {
            ConfigError::Unauthorized => MessageKind::VersionIncompatible,
            _ => MessageKind::ConnectionFailed,
        }
    }
}

/// Owner of the shared client and server configuration.
///
/// The client part is loaded from the identity file in the profile
/// directory; the server part is fetched from the orchestrator on every
/// reload and never written to disk. Only the store mutates either part,
/// apart from [`ConfigStore::update_client`].
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<Inner>,
}

struct Inner {
    paths: Paths,
    http: reqwest::blocking::Client,
    settings_timeout: Mutex<Duration>,
    identity: BuildIdentity,
    notifier: Notifier,
    config: RwLock<Config>,
    valid: AtomicBool,
    last_error: Mutex<Option<ConfigError>>,
    reloaded: EventBus<()>,
}

impl ConfigStore {
    pub fn new(
        paths: Paths,
        http: reqwest::blocking::Client,
        identity: BuildIdentity,
        notifier: Notifier,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                paths,
                http,
                settings_timeout: Mutex::new(SETTINGS_TIMEOUT),
                identity,
                notifier,
                config: RwLock::new(Config::default()),
                valid: AtomicBool::new(false),
                last_error: Mutex::new(None),
                reloaded: EventBus::new(),
            }),
        }
    }

    pub fn paths(&self) -> &Paths {
        &self.inner.paths
    }

    pub fn http(&self) -> &reqwest::blocking::Client {
        &self.inner.http
    }

    pub fn set_settings_timeout(&self, timeout: Duration) {
        *self.inner.settings_timeout.lock() = timeout;
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    /// Whether the last reload succeeded.
    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::Acquire)
    }

    pub fn last_error(&self) -> Option<ConfigError> {
        self.inner.last_error.lock().clone()
    }

    pub fn client(&self) -> ClientConfig {
        self.inner.config.read().client.clone()
    }

    pub fn server(&self) -> ServerConfig {
        self.inner.config.read().server.clone()
    }

    pub fn snapshot(&self) -> Config {
        self.inner.config.read().clone()
    }

    /// Receives one `()` per completed reload or reset.
    pub fn subscribe_reloaded(&self) -> async_channel::Receiver<()> {
        self.inner.reloaded.subscribe()
    }

    /// Re-read the identity file and fetch fresh server settings.
    ///
    /// Failures are logged and reported through the notifier. When
    /// `raise_event` is set, subscribers are notified exactly once whatever
    /// the outcome.
    pub fn reload(&self, raise_event: bool) -> bool {
        let result = self.load();
        let valid = match result {
            Ok(()) => {
                *self.inner.last_error.lock() = None;
                log::info!("Configuration reloaded");
                true
            }
            Err(e) => {
                log::error!("Configuration reload failed: {}", e);
                self.inner.notifier.notify(e.message());
                *self.inner.last_error.lock() = Some(e);
                false
            }
        };
        self.inner.valid.store(valid, Ordering::Release);

        if raise_event {
            self.inner.reloaded.publish(&());
        }
        valid
    }

    fn load(&self) -> Result<(), ConfigError> {
        let path = self.inner.paths.settings_file();
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::ReadLocal(format!("{}: {}", path.display(), e)))?;
        let client: ClientConfig =
            serde_json::from_str(&text).map_err(|e| ConfigError::ParseLocal(e.to_string()))?;

        let settings_url = botagent_core::join_url(
            client.orchestrator_url.as_deref(),
            Some(client.settings_url.as_str()),
        );
        self.inner.config.write().client = client;
        let settings_url = settings_url.ok_or(ConfigError::MissingOrchestrator)?;

        let server = self.fetch_server(&settings_url)?;
        self.inner.config.write().server = server;
        Ok(())
    }

    fn fetch_server(&self, url: &str) -> Result<ServerConfig, ConfigError> {
        log::debug!("Fetching server settings from {}", url);
        let mut request = self
            .inner
            .http
            .get(url)
            .timeout(*self.inner.settings_timeout.lock());
        for (name, value) in self.inner.identity.headers() {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .map_err(|e| ConfigError::Fetch(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ConfigError::Unauthorized);
        }
        if !status.is_success() {
            return Err(ConfigError::Fetch(format!("server returned {}", status)));
        }

        let body = response
            .text()
            .map_err(|e| ConfigError::Fetch(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| ConfigError::ParseRemote(e.to_string()))
    }

    /// Persist the client part to the identity file.
    pub fn save(&self) -> bool {
        match self.write_client() {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to save configuration: {:#}", e);
                false
            }
        }
    }

    fn write_client(&self) -> anyhow::Result<()> {
        use anyhow::Context;

        let path = self.inner.paths.settings_file();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.inner.config.read().client)
            .context("failed to serialize client configuration")?;
        std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Restore defaults, mark invalid, persist and notify subscribers.
    pub fn reset(&self) {
        *self.inner.config.write() = Config::default();
        self.inner.valid.store(false, Ordering::Release);
        *self.inner.last_error.lock() = None;
        self.save();
        self.inner.reloaded.publish(&());
    }

    /// Apply a user toggle to the client part. Follow up with [`ConfigStore::save`].
    pub fn update_client(&self, f: impl FnOnce(&mut ClientConfig)) {
        f(&mut self.inner.config.write().client);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use semver::Version;

    fn identity() -> BuildIdentity {
        BuildIdentity::new("C0FFEE".into(), &Version::parse("1.2.3").unwrap())
    }

    fn store(dir: &std::path::Path) -> (ConfigStore, async_channel::Receiver<MessageKind>) {
        let (notifier, rx) = Notifier::new();
        let store = ConfigStore::new(
            Paths::new(dir),
            crate::http::client().unwrap(),
            identity(),
            notifier,
        );
        (store, rx)
    }

    fn write_identity(dir: &std::path::Path, orchestrator: &str) {
        let json = format!(
            r#"{{ "OrchestratorUrl": "{}", "BotId": "bot-7", "BotToken": "dG9rZW4=" }}"#,
            orchestrator
        );
        std::fs::write(dir.join("settings.json"), json).unwrap();
    }

    #[test]
    fn valid_reload_fires_event_exactly_once() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/public/config/bot.json")
                .header("Bot-Hash", "C0FFEE")
                .header("Bot-Version", "1.2.3")
                .header("Bot-Build", "123");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{ "AgentPath": "agent.jar", "JavaVersion": "17.0.9.0" }"#);
        });

        let dir = tempfile::tempdir().unwrap();
        write_identity(dir.path(), &server.base_url());
        let (store, _messages) = store(dir.path());
        let reloaded = store.subscribe_reloaded();

        assert!(store.reload(true));
        mock.assert();
        assert!(store.is_valid());
        assert_eq!(store.server().agent_path.as_deref(), Some("agent.jar"));
        assert_eq!(store.client().bot_id.as_deref(), Some("bot-7"));
        assert_eq!(reloaded.try_recv(), Ok(()));
        assert!(reloaded.try_recv().is_err());
    }

    #[test]
    fn stalled_settings_fetch_times_out() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/public/config/bot.json");
            then.status(200)
                .delay(std::time::Duration::from_secs(3))
                .body("{}");
        });

        let dir = tempfile::tempdir().unwrap();
        write_identity(dir.path(), &server.base_url());
        let (store, messages) = store(dir.path());
        store.set_settings_timeout(std::time::Duration::from_millis(200));

        let started = std::time::Instant::now();
        assert!(!store.reload(true));
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        assert!(matches!(store.last_error(), Some(ConfigError::Fetch(_))));
        assert_eq!(messages.try_recv(), Ok(MessageKind::ConnectionFailed));
    }

    #[test]
    fn unparsable_identity_skips_fetch() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.any_request();
            then.status(200).body("{}");
        });

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("settings.json"), "{ not json").unwrap();
        let (store, messages) = store(dir.path());
        let reloaded = store.subscribe_reloaded();

        assert!(!store.reload(true));
        assert!(!store.is_valid());
        assert_eq!(mock.hits(), 0);
        assert!(matches!(store.last_error(), Some(ConfigError::ParseLocal(_))));
        assert_eq!(messages.try_recv(), Ok(MessageKind::ConnectionFailed));
        assert_eq!(reloaded.try_recv(), Ok(()));
    }

    #[test]
    fn missing_identity_file_is_invalid_without_event() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _messages) = store(dir.path());
        let reloaded = store.subscribe_reloaded();

        assert!(!store.reload(false));
        assert!(matches!(store.last_error(), Some(ConfigError::ReadLocal(_))));
        assert!(reloaded.try_recv().is_err());
    }

    #[test]
    fn unauthorized_means_version_incompatible() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/public/config/bot.json");
            then.status(401);
        });

        let dir = tempfile::tempdir().unwrap();
        write_identity(dir.path(), &server.base_url());
        let (store, messages) = store(dir.path());

        assert!(!store.reload(false));
        assert!(!store.is_valid());
        assert_eq!(store.last_error(), Some(ConfigError::Unauthorized));
        assert_eq!(messages.try_recv(), Ok(MessageKind::VersionIncompatible));
    }

    #[test]
    fn server_error_means_connection_failed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/public/config/bot.json");
            then.status(503);
        });

        let dir = tempfile::tempdir().unwrap();
        write_identity(dir.path(), &server.base_url());
        let (store, messages) = store(dir.path());

        assert!(!store.reload(false));
        assert!(matches!(store.last_error(), Some(ConfigError::Fetch(_))));
        assert_eq!(messages.try_recv(), Ok(MessageKind::ConnectionFailed));
    }

    #[test]
    fn failed_reload_invalidates_previously_valid_store() {
        let server = MockServer::start();
        let mut ok = server.mock(|when, then| {
            when.method(GET).path("/public/config/bot.json");
            then.status(200).body("{}");
        });

        let dir = tempfile::tempdir().unwrap();
        write_identity(dir.path(), &server.base_url());
        let (store, _messages) = store(dir.path());
        assert!(store.reload(false));

        ok.delete();
        server.mock(|when, then| {
            when.method(GET).path("/public/config/bot.json");
            then.status(500);
        });
        assert!(!store.reload(false));
        assert!(!store.is_valid());
    }

    #[test]
    fn save_then_reload_round_trips_client() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/cfg/bot.json");
            then.status(200).body("{}");
        });

        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join("BotAgent");
        let (store, _messages) = store(&profile);
        let client = ClientConfig {
            orchestrator_url: Some(server.base_url()),
            bot_id: Some("bot-7".into()),
            bot_token: Some("AQAAANCMnd8=".into()),
            settings_url: "cfg/bot.json".into(),
            auto_reconnect: false,
            auto_startup: false,
            prevent_lock: true,
        };
        store.update_client(|c| *c = client.clone());
        assert!(store.save());
        assert!(profile.join("settings.json").exists());

        store.update_client(|c| *c = ClientConfig::default());
        assert!(store.reload(false));
        assert_eq!(store.client(), client);
    }

    #[test]
    fn reset_restores_defaults_and_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _messages) = store(dir.path());
        store.update_client(|c| c.bot_id = Some("bot-7".into()));
        let reloaded = store.subscribe_reloaded();

        store.reset();
        assert!(!store.is_valid());
        assert_eq!(store.snapshot(), Config::default());
        assert_eq!(reloaded.try_recv(), Ok(()));
        let saved: ClientConfig =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("settings.json")).unwrap())
                .unwrap();
        assert_eq!(saved, ClientConfig::default());
    }
}
