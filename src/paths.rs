use botagent_core::APP_TITLE;
use std::path::{Path, PathBuf};

/// Environment variable overriding the profile directory.
pub const PROFILE_DIR_ENV: &str = "BOTAGENT_PROFILE_DIR";

/// Locations inside the per-user profile directory, where the identity file
/// and the downloaded runtime/agent artifacts live.
#[derive(Clone, Debug)]
pub struct Paths {
    profile_dir: PathBuf,
}

impl Paths {
    pub fn new(profile_dir: impl Into<PathBuf>) -> Self {
        Self {
            profile_dir: profile_dir.into(),
        }
    }

    /// `$BOTAGENT_PROFILE_DIR`, else `<home>/BotAgent`.
    pub fn from_env() -> Self {
        if let Some(dir) = std::env::var_os(PROFILE_DIR_ENV).filter(|d| !d.is_empty()) {
            return Self::new(dir);
        }
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(home.join(APP_TITLE))
    }

    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }

    pub fn settings_file(&self) -> PathBuf {
        self.profile_dir.join("settings.json")
    }

    /// Resolve a server-declared relative path against the profile directory.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.profile_dir.join(relative.trim_start_matches(['/', '\\']))
    }

    /// Runtime executable inside the server-declared runtime bin directory.
    pub fn java_executable(&self, java_path: &str) -> PathBuf {
        let name = if cfg!(windows) { "java.exe" } else { "java" };
        self.resolve(java_path).join(name)
    }

    /// Top-level runtime directory that the downloaded archive is renamed into.
    ///
    /// For a `java_path` of `jre/bin` this is `<profile>/jre`.
    pub fn runtime_dir(&self, java_path: &str) -> PathBuf {
        let bin = self.resolve(java_path);
        match Path::new(java_path.trim_start_matches(['/', '\\'])).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => self.profile_dir.join(parent),
            _ => bin,
        }
    }
}
