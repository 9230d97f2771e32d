use crate::config_store::ConfigStore;
use crate::provisioner::Provisioner;
use crate::supervisor::{ConnectOutcome, ProcessSupervisor};
use async_channel::Receiver;
use botagent_core::{ConnectionStatus, EventBus, MessageKind, StatusChanged};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

const MAX_RETRY_BACKOFF_SECS: u64 = 30;

/// Current connection status plus change notifications.
///
/// Subscribers only see actual transitions, in order.
#[derive(Clone)]
pub struct StatusTracker {
    current: Arc<Mutex<ConnectionStatus>>,
    changes: EventBus<StatusChanged>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(ConnectionStatus::default())),
            changes: EventBus::new(),
        }
    }

    pub fn get(&self) -> ConnectionStatus {
        *self.current.lock()
    }

    /// Returns whether the status changed.
    pub fn set(&self, status: ConnectionStatus) -> bool {
        let mut current = self.current.lock();
        if *current == status {
            return false;
        }
        log::info!("Connection status: {:?} -> {:?}", *current, status);
        *current = status;
        self.changes.publish(&StatusChanged::new(status));
        true
    }

    pub fn subscribe(&self) -> Receiver<StatusChanged> {
        self.changes.subscribe()
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Delay before retry number `attempt` (1-based): 1s, 2s, 4s, ... capped at 30s.
pub fn retry_backoff(attempt: u32) -> Duration {
    let secs = std::cmp::min(
        2u64.saturating_pow(attempt.saturating_sub(1)),
        MAX_RETRY_BACKOFF_SECS,
    );
    Duration::from_secs(secs)
}

/// Ties configuration reloads, provisioning and the agent process into one
/// reconnect policy.
#[derive(Clone)]
pub struct ConnectionController {
    inner: Arc<Inner>,
}

struct Inner {
    store: ConfigStore,
    provisioner: Provisioner,
    supervisor: ProcessSupervisor,
    status: StatusTracker,
    /// Serialises every disconnect/connect pair
    connect_lock: Mutex<()>,
    retry_attempts: AtomicU32,
    /// Bumped to cancel pending retries
    retry_epoch: AtomicU64,
    shut_down: AtomicBool,
    reloaded_rx: Receiver<()>,
    status_rx: Receiver<StatusChanged>,
}

impl ConnectionController {
    /// Create the controller and start listening for reloads and status changes.
    pub fn start(
        store: ConfigStore,
        provisioner: Provisioner,
        supervisor: ProcessSupervisor,
        status: StatusTracker,
    ) -> std::io::Result<Self> {
        let reloaded_rx = store.subscribe_reloaded();
        let status_rx = status.subscribe();
        let controller = Self {
            inner: Arc::new(Inner {
                store,
                provisioner,
                supervisor,
                status,
                connect_lock: Mutex::new(()),
                retry_attempts: AtomicU32::new(0),
                retry_epoch: AtomicU64::new(0),
                shut_down: AtomicBool::new(false),
                reloaded_rx,
                status_rx,
            }),
        };

        let this = controller.clone();
        std::thread::Builder::new()
            .name("botagent-config-reloaded".into())
            .spawn(move || {
                while this.inner.reloaded_rx.recv_blocking().is_ok() {
                    this.on_config_reloaded();
                }
                log::debug!("Reload listener stopped");
            })?;

        let this = controller.clone();
        std::thread::Builder::new()
            .name("botagent-status".into())
            .spawn(move || {
                while let Ok(event) = this.inner.status_rx.recv_blocking() {
                    this.on_status_changed(event.status());
                }
                log::debug!("Status listener stopped");
            })?;

        Ok(controller)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.get()
    }

    pub fn subscribe_status(&self) -> Receiver<StatusChanged> {
        self.inner.status.subscribe()
    }

    pub fn is_agent_running(&self) -> bool {
        self.inner.supervisor.is_running()
    }

    pub fn store(&self) -> &ConfigStore {
        &self.inner.store
    }

    /// Provision the artifacts and connect the agent.
    ///
    /// Returns false when the attempt failed; the user has been notified.
    pub fn reload_connection(&self, at_startup: bool) -> bool {
        let _guard = self.inner.connect_lock.lock();
        self.reload_connection_locked(at_startup)
    }

    fn reload_connection_locked(&self, at_startup: bool) -> bool {
        let inner = &self.inner;
        if inner.shut_down.load(Ordering::SeqCst) {
            return false;
        }
        let notifier = inner.store.notifier();

        if !inner.store.is_valid() {
            log::warn!("Configuration is not valid, not connecting");
            inner.status.set(ConnectionStatus::Disconnected);
            let kind = inner
                .store
                .last_error()
                .map(|e| e.message())
                .unwrap_or(MessageKind::ConnectionFailed);
            notifier.notify(kind);
            return false;
        }

        inner.status.set(ConnectionStatus::Initialize);
        if !inner.provisioner.initialize() {
            inner.status.set(ConnectionStatus::Disconnected);
            notifier.notify(MessageKind::ConnectionFailed);
            return false;
        }

        match inner.supervisor.connect(at_startup) {
            ConnectOutcome::Connected | ConnectOutcome::Retrying => true,
            ConnectOutcome::Failed => false,
        }
    }

    /// User "Connect" action.
    pub fn connect(&self, at_startup: bool) -> bool {
        self.inner.store.notifier().begin_attempt();
        self.reload_connection(at_startup)
    }

    /// User "Disconnect" action. Cancels any pending retry.
    pub fn disconnect(&self) {
        self.cancel_retry();
        // Ends a connect wait in flight so the lock frees up now
        self.inner.supervisor.disconnect(false);
        let _guard = self.inner.connect_lock.lock();
        self.inner.supervisor.disconnect(true);
    }

    /// User "Reload" action: refresh the configuration and let the reload
    /// listener decide whether to reconnect.
    pub fn reload(&self) -> bool {
        self.inner.store.notifier().begin_attempt();
        self.inner.store.reload(true)
    }

    /// User "Reset" action: drop the identity and disconnect.
    pub fn reset(&self) {
        self.cancel_retry();
        self.inner.store.reset();
    }

    /// Flip auto-reconnect and persist it. Returns the new value.
    pub fn toggle_auto_reconnect(&self) -> bool {
        let mut enabled = false;
        self.inner.store.update_client(|client| {
            client.auto_reconnect = !client.auto_reconnect;
            enabled = client.auto_reconnect;
        });
        self.inner.store.save();
        if !enabled {
            self.cancel_retry();
        }
        enabled
    }

    pub fn set_prevent_lock(&self, enabled: bool) {
        self.inner
            .store
            .update_client(|client| client.prevent_lock = enabled);
        self.inner.store.save();
    }

    pub async fn connect_async(&self, at_startup: bool) -> bool {
        let this = self.clone();
        smol::unblock(move || this.connect(at_startup)).await
    }

    pub async fn reload_async(&self) -> bool {
        let this = self.clone();
        smol::unblock(move || this.reload()).await
    }

    pub async fn reset_async(&self) {
        let this = self.clone();
        smol::unblock(move || this.reset()).await
    }

    /// Disconnect the agent and stop listening. Used on application exit.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_retry();
        inner.reloaded_rx.close();
        inner.status_rx.close();
        // Kill first so a connect wait in flight ends now
        inner.supervisor.disconnect(false);
        let _guard = inner.connect_lock.lock();
        inner.supervisor.disconnect(true);
        log::info!("Connection controller shut down");
    }

    fn on_config_reloaded(&self) {
        let inner = &self.inner;
        if inner.shut_down.load(Ordering::SeqCst) {
            return;
        }

        let status = inner.status.get();
        if status == ConnectionStatus::Interrupted {
            log::debug!("Configuration reloaded while interrupted, agent recovers on its own");
            return;
        }
        let auto_reconnect = inner.store.client().auto_reconnect;
        let active = matches!(status, ConnectionStatus::Connected | ConnectionStatus::Retry);
        if !active && !auto_reconnect {
            return;
        }

        let _guard = inner.connect_lock.lock();
        if inner.store.is_valid() {
            inner.supervisor.disconnect(false);
            self.reload_connection_locked(false);
        } else if status == ConnectionStatus::Retry && auto_reconnect {
            // Orchestrator still unreachable, keep retrying
            inner.supervisor.disconnect(false);
            self.schedule_retry();
        } else {
            inner.supervisor.disconnect(true);
        }
    }

    fn on_status_changed(&self, status: ConnectionStatus) {
        match status {
            ConnectionStatus::Connected => {
                self.inner.retry_attempts.store(0, Ordering::SeqCst);
                self.inner.store.notifier().begin_attempt();
            }
            ConnectionStatus::Retry => self.schedule_retry(),
            _ => {}
        }
    }

    fn cancel_retry(&self) {
        self.inner.retry_epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.retry_attempts.store(0, Ordering::SeqCst);
    }

    /// Reload the configuration after a backoff; the reload notification
    /// drives the reconnect.
    fn schedule_retry(&self) {
        let attempt = self.inner.retry_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = retry_backoff(attempt);
        let epoch = self.inner.retry_epoch.load(Ordering::SeqCst);
        log::warn!("Reconnecting in {}s (attempt {})", delay.as_secs(), attempt);

        let this = self.clone();
        let spawned = std::thread::Builder::new()
            .name("botagent-retry".into())
            .spawn(move || {
                std::thread::sleep(delay);
                let inner = &this.inner;
                if inner.retry_epoch.load(Ordering::SeqCst) != epoch
                    || inner.shut_down.load(Ordering::SeqCst)
                    || inner.status.get() != ConnectionStatus::Retry
                {
                    log::debug!("Retry {} cancelled", attempt);
                    return;
                }
                inner.store.reload(true);
            });
        if let Err(e) = spawned {
            log::error!("Failed to schedule reconnect: {}", e);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::supervisor::arguments::{LaunchError, LaunchSpec, Launcher};
    use crate::test_support::reloaded_store;
    use botagent_core::Config;
    use httpmock::prelude::*;
    use std::path::PathBuf;

    /// Stands in for the agent; the runtime and jar versions are served by
    /// fake files the provisioner accepts.
    struct ScriptLauncher(&'static str);

    impl Launcher for ScriptLauncher {
        fn launch_spec(&self, _config: &Config) -> Result<LaunchSpec, LaunchError> {
            Ok(LaunchSpec {
                program: PathBuf::from("sh"),
                args: vec!["-c".into(), self.0.into()],
                working_dir: std::env::temp_dir(),
            })
        }
    }

    const SERVER_JSON: &str = r#"{
        "JavaPath": "jre/bin",
        "JavaVersion": "17.0.9.0",
        "AgentPath": "agent.jar",
        "AgentVersion": "3206.vb_15dcf73f6a_9",
        "ConnectTimeout": 2000
    }"#;

    struct Harness {
        controller: ConnectionController,
        store: ConfigStore,
        events: Receiver<StatusChanged>,
        messages: Receiver<MessageKind>,
        _server: MockServer,
        _dir: tempfile::TempDir,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.controller.shutdown();
        }
    }

    /// Lay down a runtime and agent the provisioner accepts without downloading.
    fn install_artifacts(profile: &std::path::Path) {
        use std::os::unix::fs::PermissionsExt;

        let bin = profile.join("jre/bin");
        std::fs::create_dir_all(&bin).unwrap();
        let mut java = b"#!/bin/sh\necho 3206.vb_15dcf73f6a_9\nexit 0\n".to_vec();
        java.extend("FileVersion\0".encode_utf16().flat_map(|u| u.to_le_bytes()));
        java.extend("17.0.9.0\0".encode_utf16().flat_map(|u| u.to_le_bytes()));
        java.push(b'\n');
        let path = bin.join("java");
        std::fs::write(&path, java).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::write(profile.join("agent.jar"), "jar").unwrap();
    }

    fn harness(script: &'static str) -> Harness {
        let server = MockServer::start();
        let dir = tempfile::tempdir().unwrap();
        let (store, messages) = reloaded_store(dir.path(), &server, SERVER_JSON);
        install_artifacts(dir.path());

        let status = StatusTracker::new();
        let events = status.subscribe();
        let supervisor = ProcessSupervisor::new(
            store.clone(),
            Box::new(ScriptLauncher(script)),
            status.clone(),
        );
        let provisioner = Provisioner::new(store.clone());
        let controller =
            ConnectionController::start(store.clone(), provisioner, supervisor, status).unwrap();
        Harness {
            controller,
            store,
            events,
            messages,
            _server: server,
            _dir: dir,
        }
    }

    fn statuses(rx: &Receiver<StatusChanged>) -> Vec<ConnectionStatus> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.status())
            .collect()
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while !done() {
            assert!(std::time::Instant::now() < deadline, "condition not reached");
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let secs: Vec<u64> = (1..=7).map(|n| retry_backoff(n).as_secs()).collect();
        assert_eq!(secs, [1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(retry_backoff(0).as_secs(), 1);
        assert_eq!(retry_backoff(200).as_secs(), 30);
    }

    #[test]
    fn tracker_publishes_only_changes() {
        let tracker = StatusTracker::new();
        let rx = tracker.subscribe();
        assert!(!tracker.set(ConnectionStatus::Disconnected));
        assert!(tracker.set(ConnectionStatus::Initialize));
        assert!(!tracker.set(ConnectionStatus::Initialize));
        assert!(tracker.set(ConnectionStatus::Connected));
        assert_eq!(
            statuses(&rx),
            [ConnectionStatus::Initialize, ConnectionStatus::Connected]
        );
    }

    #[test]
    fn connect_goes_through_initialize() {
        let h = harness("echo 'INFO: Connected'; sleep 30");
        assert!(h.controller.connect(false));
        assert_eq!(h.controller.status(), ConnectionStatus::Connected);
        assert_eq!(
            statuses(&h.events),
            [ConnectionStatus::Initialize, ConnectionStatus::Connected]
        );

        h.controller.disconnect();
        assert_eq!(h.controller.status(), ConnectionStatus::Disconnected);
        assert!(h.messages.try_recv().is_err());
    }

    #[test]
    fn invalid_config_makes_no_attempt() {
        let h = harness("echo 'INFO: Connected'; sleep 30");
        std::fs::write(h.store.paths().settings_file(), "garbage").unwrap();
        assert!(!h.store.reload(false));
        let _ = h.messages.try_recv();

        h.controller.store().notifier().begin_attempt();
        assert!(!h.controller.reload_connection(false));
        assert_eq!(h.controller.status(), ConnectionStatus::Disconnected);
        assert_eq!(h.messages.try_recv(), Ok(MessageKind::ConnectionFailed));
        assert!(statuses(&h.events).is_empty());
    }

    #[test]
    fn reload_reconnects_connected_agent_without_disconnected_blip() {
        let h = harness("echo 'INFO: Connected'; sleep 30");
        assert!(h.controller.connect(false));
        let _ = statuses(&h.events);

        assert!(h.controller.reload());
        let mut seen = Vec::new();
        wait_until(|| {
            seen.extend(statuses(&h.events));
            seen.contains(&ConnectionStatus::Initialize)
                && h.controller.status() == ConnectionStatus::Connected
        });
        assert!(!seen.contains(&ConnectionStatus::Disconnected));
    }

    #[test]
    fn reload_while_disconnected_without_auto_reconnect_is_ignored() {
        let h = harness("echo 'INFO: Connected'; sleep 30");
        h.store.update_client(|c| c.auto_reconnect = false);
        assert!(h.controller.reload());
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(h.controller.status(), ConnectionStatus::Disconnected);
        assert!(statuses(&h.events).is_empty());
    }

    #[test]
    fn not_ready_schedules_reconnect_without_error() {
        let h = harness("echo 'Node bot-7 is not ready'; sleep 30");
        assert!(h.controller.connect(false));
        assert_eq!(h.controller.status(), ConnectionStatus::Retry);
        assert_eq!(
            statuses(&h.events),
            [ConnectionStatus::Initialize, ConnectionStatus::Retry]
        );

        // First retry after 1s reloads the config and reconnects
        let mut seen = Vec::new();
        wait_until(|| {
            seen.extend(statuses(&h.events));
            seen.contains(&ConnectionStatus::Initialize)
        });
        assert!(!seen.contains(&ConnectionStatus::Disconnected));
        assert!(h.messages.try_recv().is_err());
        h.controller.disconnect();
    }

    #[test]
    fn not_ready_without_auto_reconnect_reports_once() {
        let h = harness("echo 'is not ready'; echo 'is not ready'; sleep 30");
        h.store.update_client(|c| c.auto_reconnect = false);
        assert!(!h.controller.connect(false));
        assert_eq!(h.controller.status(), ConnectionStatus::Disconnected);
        std::thread::sleep(Duration::from_millis(200));
        let messages: Vec<_> = std::iter::from_fn(|| h.messages.try_recv().ok()).collect();
        assert_eq!(messages, [MessageKind::ConnectionFailed]);
    }

    #[test]
    fn disconnect_cancels_pending_retry() {
        let h = harness("echo 'is not ready'; sleep 30");
        let reloaded = h.store.subscribe_reloaded();
        assert!(h.controller.connect(false));
        h.controller.disconnect();
        std::thread::sleep(Duration::from_millis(1500));
        assert!(reloaded.try_recv().is_err());
        assert_eq!(h.controller.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn disconnect_ends_connect_wait_in_flight() {
        let h = harness("echo 'INFO: Handshaking'; sleep 30");
        let controller = h.controller.clone();
        let connecting = std::thread::spawn(move || controller.connect(false));
        wait_until(|| h.controller.is_agent_running());

        let started = std::time::Instant::now();
        h.controller.disconnect();
        assert!(started.elapsed() < Duration::from_secs(1));

        assert!(!connecting.join().unwrap());
        assert_eq!(h.controller.status(), ConnectionStatus::Disconnected);
        assert!(!h.controller.is_agent_running());
        assert!(h.messages.try_recv().is_err());
    }

    #[test]
    fn toggles_persist() {
        let h = harness("true");
        assert!(!h.controller.toggle_auto_reconnect());
        h.controller.set_prevent_lock(true);
        let saved: botagent_core::ClientConfig = serde_json::from_str(
            &std::fs::read_to_string(h.store.paths().settings_file()).unwrap(),
        )
        .unwrap();
        assert!(!saved.auto_reconnect);
        assert!(saved.prevent_lock);
    }

    #[test]
    fn reset_disconnects() {
        let h = harness("echo 'INFO: Connected'; sleep 30");
        assert!(h.controller.connect(false));
        h.controller.reset();
        wait_until(|| h.controller.status() == ConnectionStatus::Disconnected);
        assert!(!h.store.is_valid());
    }

    #[test]
    fn async_connect_runs_off_thread() {
        let h = harness("echo 'INFO: Connected'; sleep 30");
        assert!(smol::block_on(h.controller.connect_async(false)));
        h.controller.disconnect();
        assert_eq!(h.controller.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn async_reload_and_reset_run_off_thread() {
        let h = harness("echo 'INFO: Connected'; sleep 30");
        assert!(h.controller.connect(false));
        let _ = statuses(&h.events);

        assert!(smol::block_on(h.controller.reload_async()));
        let mut seen = Vec::new();
        wait_until(|| {
            seen.extend(statuses(&h.events));
            seen.contains(&ConnectionStatus::Initialize)
                && h.controller.status() == ConnectionStatus::Connected
        });

        smol::block_on(h.controller.reset_async());
        wait_until(|| h.controller.status() == ConnectionStatus::Disconnected);
        assert!(!h.store.is_valid());
    }
}
