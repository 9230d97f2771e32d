//! Launches the agent, classifies its output and drives the per-attempt
//! connect state machine.

mod agent_process;
pub mod arguments;
pub mod classifier;

use crate::config_store::ConfigStore;
use crate::connection::StatusTracker;
use agent_process::AgentProcess;
use arguments::Launcher;
use async_channel::{Receiver, Sender};
use botagent_core::{ConnectionStatus, MessageKind};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Result of one connect attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The agent reported a successful handshake
    Connected,
    /// The server was not ready; a reconnect is pending
    Retrying,
    /// The attempt failed and the agent is not running
    Failed,
}

/// Owner of the single agent process.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    store: ConfigStore,
    launcher: Box<dyn Launcher>,
    status: StatusTracker,
    process: Mutex<Option<AgentProcess>>,
    /// Bumped on every connect and disconnect. Output and exit events from an
    /// older generation are ignored.
    generation: AtomicU64,
}

impl ProcessSupervisor {
    pub fn new(store: ConfigStore, launcher: Box<dyn Launcher>, status: StatusTracker) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                launcher,
                status,
                process: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Whether an agent process is currently held.
    pub fn is_running(&self) -> bool {
        self.inner.process.lock().is_some()
    }

    /// Start the agent and block until it reports an outcome or the connect
    /// timeout elapses. Any previous process is torn down first.
    pub fn connect(&self, at_startup: bool) -> ConnectOutcome {
        self.disconnect(false);

        let config = self.inner.store.snapshot();
        let timeout = Duration::from_millis(config.server.connect_timeout_ms(at_startup));
        let notifier = self.inner.store.notifier();

        let spec = match self.inner.launcher.launch_spec(&config) {
            Ok(spec) => spec,
            Err(e) => {
                log::error!("Failed to prepare agent launch: {}", e);
                self.inner.status.set(ConnectionStatus::Disconnected);
                notifier.notify(MessageKind::UnexpectedError);
                return ConnectOutcome::Failed;
            }
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (line_tx, line_rx) = async_channel::unbounded();
        let (release_tx, release_rx) = async_channel::bounded(1);

        let process = match AgentProcess::spawn(&spec, generation, line_tx) {
            Ok(process) => process,
            Err(e) => {
                log::error!("{} ({:?})", e, spec.program);
                self.inner.status.set(ConnectionStatus::Disconnected);
                notifier.notify(MessageKind::UnexpectedError);
                return ConnectOutcome::Failed;
            }
        };
        log::info!("Agent PID {} started", process.id());
        *self.inner.process.lock() = Some(process);

        if let Err(e) = self.spawn_watchers(generation, line_rx, release_tx) {
            log::error!("Failed to start agent watchers: {}", e);
            self.disconnect(true);
            notifier.notify(MessageKind::UnexpectedError);
            return ConnectOutcome::Failed;
        }

        let released = smol::block_on(smol::future::or(
            async { release_rx.recv().await.ok() },
            async {
                smol::Timer::after(timeout).await;
                None
            },
        ));

        match released {
            Some(ConnectionStatus::Connected) => ConnectOutcome::Connected,
            Some(ConnectionStatus::Retry) if self.is_current(generation) => {
                ConnectOutcome::Retrying
            }
            Some(_) => ConnectOutcome::Failed,
            None if !self.is_current(generation) => {
                log::debug!("Connect attempt {} superseded", generation);
                ConnectOutcome::Failed
            }
            None => {
                if release_rx.is_closed() {
                    log::warn!("Agent exited before connecting");
                } else {
                    log::warn!("Agent did not connect within {}ms", timeout.as_millis());
                }
                self.disconnect(true);
                notifier.notify(MessageKind::ConnectionFailed);
                ConnectOutcome::Failed
            }
        }
    }

    /// Kill the agent process tree, if any.
    ///
    /// Safe to call at any time, including when no process was ever started.
    /// With `set_status` false no `Disconnected` transition is published, for
    /// callers about to reconnect.
    pub fn disconnect(&self, set_status: bool) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let process = self.inner.process.lock().take();
        match process {
            Some(mut process) => {
                let pid = process.id();
                match process.kill() {
                    Ok(()) => log::info!("Agent PID {} disconnected", pid),
                    Err(e) => log::error!("Failed to stop agent PID {}: {:#}", pid, e),
                }
            }
            None => log::debug!("Disconnect requested with no agent running"),
        }
        if set_status {
            self.inner.status.set(ConnectionStatus::Disconnected);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.generation.load(Ordering::SeqCst) == generation
    }

    fn spawn_watchers(
        &self,
        generation: u64,
        lines: Receiver<String>,
        release: Sender<ConnectionStatus>,
    ) -> std::io::Result<()> {
        let this = self.clone();
        std::thread::Builder::new()
            .name("botagent-agent-output".into())
            .spawn(move || {
                while let Ok(line) = lines.recv_blocking() {
                    log::info!(target: "botagent::agent", "{}", line);
                    if !this.is_current(generation) {
                        continue;
                    }
                    this.handle_line(&line, &release);
                }
            })?;

        let this = self.clone();
        std::thread::Builder::new()
            .name("botagent-agent-exit".into())
            .spawn(move || this.watch_exit(generation))?;
        Ok(())
    }

    fn handle_line(&self, line: &str, release: &Sender<ConnectionStatus>) {
        let outcome = classifier::classify(line);
        let notifier = self.inner.store.notifier();
        match outcome {
            ConnectionStatus::Connected => {
                self.inner.status.set(ConnectionStatus::Connected);
                let _ = release.try_send(outcome);
            }
            ConnectionStatus::Interrupted => {
                log::warn!("Agent connection interrupted, checking orchestrator");
                self.inner.status.set(ConnectionStatus::Interrupted);
                if !self.inner.store.reload(true) {
                    self.disconnect(true);
                }
            }
            ConnectionStatus::Retry => {
                if self.inner.store.client().auto_reconnect {
                    log::warn!("Orchestrator not ready, will retry");
                    self.inner.status.set(ConnectionStatus::Retry);
                } else {
                    log::warn!("Orchestrator not ready and auto-reconnect is off");
                    self.disconnect(true);
                    notifier.notify(MessageKind::ConnectionFailed);
                }
                let _ = release.try_send(outcome);
            }
            ConnectionStatus::Disconnected => {
                log::error!("Agent reported a fatal error");
                self.disconnect(true);
                notifier.notify(MessageKind::ConnectionFailed);
                let _ = release.try_send(outcome);
            }
            ConnectionStatus::Initialize | ConnectionStatus::Unknown => {}
        }
    }

    /// Converge on `Disconnected` when the agent exits on its own.
    fn watch_exit(&self, generation: u64) {
        loop {
            std::thread::sleep(EXIT_POLL_INTERVAL);

            let mut guard = self.inner.process.lock();
            let Some(process) = guard.as_mut() else {
                return;
            };
            if process.generation() != generation {
                return;
            }
            match process.try_wait() {
                Ok(Some(status)) => {
                    let pid = process.id();
                    let process = guard.take();
                    drop(guard);
                    drop(process);
                    log::info!("Agent PID {} exited with {}", pid, status);
                    self.inner.status.set(ConnectionStatus::Disconnected);
                    return;
                }
                Ok(None) => {}
                Err(e) => log::warn!("Failed to poll agent PID {}: {}", process.id(), e),
            }
        }
    }
}
