use super::{artifact_url, download_to};
use crate::config_store::ConfigStore;
use crate::process::{command, probe_output};
use anyhow::{Context, Result};
use std::time::Duration;

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Run `java -jar <agent> -version` and look for the declared version.
pub(super) fn check_version(store: &ConfigStore) -> Result<bool> {
    let server = store.server();
    let java_path = server.java_path.context("runtime path is not configured")?;
    let agent_path = server.agent_path.context("agent path is not configured")?;
    let expected = server.agent_version.context("agent version is not configured")?;

    let paths = store.paths();
    let mut cmd = command(paths.java_executable(&java_path));
    cmd.args(["-jar", agent_path.as_str(), "-version"])
        .current_dir(paths.profile_dir());
    let output = probe_output(&mut cmd, VERSION_PROBE_TIMEOUT)?;

    let compatible = output.contains(expected.as_str());
    log::info!(
        "Local agent version {:?}, required {} (compatible: {})",
        output.trim(),
        expected,
        compatible
    );
    Ok(compatible)
}

/// Fetch the agent jar, replacing the local copy only once the transfer completed.
pub(super) fn download(store: &ConfigStore) -> Result<()> {
    let server = store.server();
    let url = artifact_url(store, server.agent_url.as_deref(), "agent")?;
    let agent_path = server.agent_path.context("agent path is not configured")?;

    let dest = store.paths().resolve(&agent_path);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {:?}", parent))?;
    }
    let mut partial = dest.clone().into_os_string();
    partial.push(".part");
    let partial = std::path::PathBuf::from(partial);

    download_to(store.http(), &url, &partial)?;
    if let Err(e) = std::fs::rename(&partial, &dest) {
        let _ = std::fs::remove_file(&partial);
        return Err(e).with_context(|| format!("failed to move agent into {:?}", dest));
    }
    log::info!("Agent installed at {:?}", dest);
    Ok(())
}
