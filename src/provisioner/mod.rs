//! Keeps the runtime and the agent jar in the profile directory at the
//! versions the orchestrator declares.

mod agent;
mod runtime;

use crate::config_store::ConfigStore;
use anyhow::{Context, Result};
use std::io::{Read, Write};
use std::path::Path;

/// Downloads and validates the runtime and agent artifacts.
///
/// Every operation logs its failures and reports them as `false`.
#[derive(Clone)]
pub struct Provisioner {
    store: ConfigStore,
}

impl Provisioner {
    pub fn new(store: ConfigStore) -> Self {
        Self { store }
    }

    /// Make both artifacts ready.
    ///
    /// The agent is provisioned even when the runtime could not be, so both
    /// failures show up in the log.
    pub fn initialize(&self) -> bool {
        let runtime_ready = self.is_runtime_compatible() || self.download_runtime();
        let agent_ready = self.is_agent_compatible() || self.download_agent();
        if !runtime_ready || !agent_ready {
            log::warn!(
                "Provisioning incomplete (runtime ready: {}, agent ready: {})",
                runtime_ready,
                agent_ready
            );
        }
        runtime_ready && agent_ready
    }

    pub fn is_runtime_compatible(&self) -> bool {
        match runtime::check_version(&self.store) {
            Ok(compatible) => compatible,
            Err(e) => {
                log::warn!("Runtime version check failed: {:#}", e);
                false
            }
        }
    }

    pub fn download_runtime(&self) -> bool {
        log::info!("Downloading runtime");
        match runtime::download(&self.store) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Runtime download failed: {:#}", e);
                false
            }
        }
    }

    pub fn is_agent_compatible(&self) -> bool {
        match agent::check_version(&self.store) {
            Ok(compatible) => compatible,
            Err(e) => {
                log::warn!("Agent version check failed: {:#}", e);
                false
            }
        }
    }

    pub fn download_agent(&self) -> bool {
        log::info!("Downloading agent");
        match agent::download(&self.store) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Agent download failed: {:#}", e);
                false
            }
        }
    }
}

/// Resolve a server-declared artifact URL against the orchestrator URL.
fn artifact_url(store: &ConfigStore, relative: Option<&str>, what: &str) -> Result<String> {
    let client = store.client();
    let relative = relative.with_context(|| format!("{} URL is not configured", what))?;
    botagent_core::join_url(client.orchestrator_url.as_deref(), Some(relative))
        .context("orchestrator URL is not configured")
}

/// Stream `url` into `dest`, removing the partial file on failure.
fn download_to(http: &reqwest::blocking::Client, url: &str, dest: &Path) -> Result<u64> {
    let result = stream_to(http, url, dest);
    if result.is_err() {
        let _ = std::fs::remove_file(dest);
    }
    result
}

fn stream_to(http: &reqwest::blocking::Client, url: &str, dest: &Path) -> Result<u64> {
    log::debug!("Fetching {} into {:?}", url, dest);
    let mut resp = http
        .get(url)
        .send()
        .context("failed to start download")?
        .error_for_status()
        .context("server returned an error status")?;

    let total = resp.content_length().unwrap_or(0);
    let mut file = std::fs::File::create(dest)
        .with_context(|| format!("failed to create {:?}", dest))?;

    let mut downloaded: u64 = 0;
    let mut buf = [0u8; 65536];
    loop {
        let n = resp.read(&mut buf).context("download read error")?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).context("failed to write download")?;
        downloaded += n as u64;
    }
    file.flush().context("failed to flush download")?;

    if total > 0 && downloaded != total {
        anyhow::bail!(
            "incomplete download: got {} bytes, expected {} bytes",
            downloaded,
            total
        );
    }
    if downloaded == 0 {
        anyhow::bail!("downloaded file is empty");
    }

    log::info!("Downloaded {} ({} bytes)", url, downloaded);
    Ok(downloaded)
}
