use anyhow::{Context, Result};
use std::time::Duration;

/// Blocking HTTP client shared by the settings fetch and artifact downloads.
pub fn client() -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(3600))
        .user_agent(format!("botagent/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")
}
