use anyhow::{Context, Result};
use semver::Version;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Identity of the running build, sent with every settings request so the
/// orchestrator can refuse outdated clients.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildIdentity {
    /// Uppercase hex SHA-256 of the executable
    pub hash: String,
    /// `major.minor.patch`
    pub version: String,
    /// `{major}{minor}{patch}`
    pub build: String,
}

impl BuildIdentity {
    pub fn new(hash: String, version: &Version) -> Self {
        Self {
            hash,
            version: format!("{}.{}.{}", version.major, version.minor, version.patch),
            build: format!("{}{}{}", version.major, version.minor, version.patch),
        }
    }

    /// Identity of the current executable and the given package version.
    ///
    /// A hash failure is logged and leaves the hash empty; the orchestrator
    /// decides whether that is acceptable.
    pub fn current(package_version: &str) -> Result<Self> {
        let version = Version::parse(package_version).context("invalid package version")?;
        let hash = match std::env::current_exe() {
            Ok(exe) => hash_file(&exe).unwrap_or_else(|e| {
                log::warn!("Failed to hash executable {:?}: {:#}", exe, e);
                String::new()
            }),
            Err(e) => {
                log::warn!("Failed to locate current executable: {}", e);
                String::new()
            }
        };
        Ok(Self::new(hash, &version))
    }

    /// Header name/value pairs for the settings request.
    pub fn headers(&self) -> [(&'static str, &str); 3] {
        [
            ("Bot-Hash", self.hash.as_str()),
            ("Bot-Version", self.version.as_str()),
            ("Bot-Build", self.build.as_str()),
        ]
    }
}

/// Uppercase hex SHA-256 of a file.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {:?} for hashing", path))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 65536];
    loop {
        let n = file.read(&mut buf).context("read error during hashing")?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:X}", hasher.finalize()))
}
