mod config_store;
mod connection;
mod credentials;
mod http;
mod notifier;
mod paths;
mod process;
mod provisioner;
mod supervisor;
#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use botagent_core::{APP_TITLE, BuildIdentity, MessageKind, StatusChanged};
use std::io::BufRead;

use crate::config_store::ConfigStore;
use crate::connection::{ConnectionController, StatusTracker};
use crate::notifier::Notifier;
use crate::paths::Paths;
use crate::provisioner::Provisioner;
use crate::supervisor::ProcessSupervisor;
use crate::supervisor::arguments::JavaLauncher;

/// Menu actions, read one per line from standard input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HostCommand {
    Connect,
    Disconnect,
    Reload,
    Reset,
    ToggleAutoReconnect,
    PreventLock(bool),
    Status,
    Quit,
}

impl HostCommand {
    fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let command = match words.next()?.to_ascii_lowercase().as_str() {
            "connect" => HostCommand::Connect,
            "disconnect" => HostCommand::Disconnect,
            "reload" => HostCommand::Reload,
            "reset" => HostCommand::Reset,
            "auto-reconnect" => HostCommand::ToggleAutoReconnect,
            "prevent-lock" => match words.next()? {
                "on" => HostCommand::PreventLock(true),
                "off" => HostCommand::PreventLock(false),
                _ => return None,
            },
            "status" => HostCommand::Status,
            "quit" | "exit" => HostCommand::Quit,
            _ => return None,
        };
        Some(command)
    }
}

enum HostEvent {
    Status(StatusChanged),
    Message(MessageKind),
    Quit,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let at_startup = std::env::args()
        .skip(1)
        .any(|arg| arg.eq_ignore_ascii_case("startup"));

    let paths = Paths::from_env();
    log::info!(
        "{} {} starting, profile {:?}",
        APP_TITLE,
        env!("CARGO_PKG_VERSION"),
        paths.profile_dir()
    );

    let identity = BuildIdentity::current(env!("CARGO_PKG_VERSION"))?;
    let (notifier, messages) = Notifier::new();
    let store = ConfigStore::new(paths.clone(), http::client()?, identity, notifier);

    let status = StatusTracker::new();
    let status_events = status.subscribe();
    let launcher = JavaLauncher::new(paths, credentials::platform_cipher());
    let supervisor = ProcessSupervisor::new(store.clone(), Box::new(launcher), status.clone());
    let provisioner = Provisioner::new(store.clone());
    let controller = ConnectionController::start(store.clone(), provisioner, supervisor, status)
        .context("failed to start connection controller")?;

    let startup = controller.clone();
    std::thread::Builder::new()
        .name("botagent-startup".into())
        .spawn(move || {
            startup.store().notifier().begin_attempt();
            startup.store().reload(false);
            if !startup.reload_connection(at_startup) {
                log::warn!("Startup connection failed");
            }
        })
        .context("failed to spawn startup thread")?;

    let (quit_tx, quit_rx) = async_channel::bounded::<()>(1);
    let menu = controller.clone();
    std::thread::Builder::new()
        .name("botagent-menu".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match HostCommand::parse(&line) {
                    Some(HostCommand::Quit) => break,
                    Some(command) => run_command(&menu, command),
                    None => log::warn!("Unknown command {:?}", line.trim()),
                }
            }
            let _ = quit_tx.send_blocking(());
        })
        .context("failed to spawn menu thread")?;

    smol::block_on(async {
        loop {
            let event = smol::future::or(
                async {
                    match status_events.recv().await {
                        Ok(event) => HostEvent::Status(event),
                        Err(_) => HostEvent::Quit,
                    }
                },
                smol::future::or(
                    async {
                        match messages.recv().await {
                            Ok(kind) => HostEvent::Message(kind),
                            Err(_) => HostEvent::Quit,
                        }
                    },
                    async {
                        let _ = quit_rx.recv().await;
                        HostEvent::Quit
                    },
                ),
            )
            .await;

            match event {
                HostEvent::Status(event) => log::info!(
                    "Status: {} (icon {:?})",
                    event.status().display_name(),
                    event.icon()
                ),
                HostEvent::Message(kind) => log::error!("{}", kind.text().replace('\n', " ")),
                HostEvent::Quit => break,
            }
        }
    });

    controller.shutdown();
    Ok(())
}

fn run_command(controller: &ConnectionController, command: HostCommand) {
    match command {
        HostCommand::Connect => {
            let controller = controller.clone();
            smol::spawn(async move { controller.connect_async(false).await }).detach();
        }
        HostCommand::Disconnect => controller.disconnect(),
        HostCommand::Reload => {
            let controller = controller.clone();
            smol::spawn(async move { controller.reload_async().await }).detach();
        }
        HostCommand::Reset => {
            let controller = controller.clone();
            smol::spawn(async move { controller.reset_async().await }).detach();
        }
        HostCommand::ToggleAutoReconnect => {
            let enabled = controller.toggle_auto_reconnect();
            log::info!("Auto-reconnect {}", if enabled { "on" } else { "off" });
        }
        HostCommand::PreventLock(enabled) => controller.set_prevent_lock(enabled),
        HostCommand::Status => log::info!(
            "Status: {} (config valid: {}, agent running: {})",
            controller.status().display_name(),
            controller.store().is_valid(),
            controller.is_agent_running()
        ),
        HostCommand::Quit => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_menu_commands() {
        assert_eq!(HostCommand::parse("connect"), Some(HostCommand::Connect));
        assert_eq!(HostCommand::parse("  Reload "), Some(HostCommand::Reload));
        assert_eq!(
            HostCommand::parse("prevent-lock on"),
            Some(HostCommand::PreventLock(true))
        );
        assert_eq!(HostCommand::parse("prevent-lock maybe"), None);
        assert_eq!(HostCommand::parse("exit"), Some(HostCommand::Quit));
        assert_eq!(HostCommand::parse("dance"), None);
        assert_eq!(HostCommand::parse(""), None);
    }
}
