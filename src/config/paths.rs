//! Configuration directory discovery.
//!
//! Resolution order for the directory holding the `ngi_*.yml` documents:
//! 1. `NEON_CONFIG_PATH`, if set and writable
//! 2. Legacy directories (`~/.neon`, `<exe>/../share/neon`), if present and writable
//! 3. `~/.local/share/neon`, created if absent

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the configuration directory.
pub const CONFIG_PATH_ENV: &str = "NEON_CONFIG_PATH";

/// Default location of the system-wide legacy configuration.
pub const SYSTEM_CONFIG_FILE: &str = "/etc/mycroft/mycroft.conf";

/// Directory search paths for configuration documents.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    /// Explicit directory (`NEON_CONFIG_PATH` or `--config-dir`)
    pub override_dir: Option<PathBuf>,
    /// Legacy installation directories, checked in order
    pub legacy_dirs: Vec<PathBuf>,
    /// Last-resort directory, created on demand
    pub fallback_dir: PathBuf,
    /// Legacy system configuration files, lowest priority first
    pub system_config_files: Vec<PathBuf>,
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::discover()
    }
}

impl ConfigPaths {
    /// Discover configuration paths from environment and defaults.
    pub fn discover() -> Self {
        let home = dirs::home_dir();

        let override_dir = std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let mut legacy_dirs = Vec::new();
        if let Some(ref home) = home {
            legacy_dirs.push(home.join(".neon"));
        }
        if let Some(install) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent()?.parent().map(Path::to_path_buf))
        {
            legacy_dirs.push(install.join("share").join("neon"));
        }

        let fallback_dir = home
            .as_deref()
            .map(|h| h.join(".local").join("share").join("neon"))
            .unwrap_or_else(|| std::env::temp_dir().join("neon"));

        let system_file = std::env::var("MYCROFT_SYSTEM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(SYSTEM_CONFIG_FILE));
        let user_file = std::env::var("MYCROFT_USER_CONFIG")
            .ok()
            .map(PathBuf::from)
            .or_else(|| home.map(|h| h.join(".mycroft").join("mycroft.conf")));

        let mut system_config_files = vec![system_file];
        system_config_files.extend(user_file);

        Self {
            override_dir,
            legacy_dirs,
            fallback_dir,
            system_config_files,
        }
    }

    /// Create paths with explicit directories and no legacy lookups.
    pub fn with_dirs(config_dir: Option<PathBuf>, fallback_dir: PathBuf) -> Self {
        Self {
            override_dir: config_dir,
            legacy_dirs: Vec::new(),
            fallback_dir,
            system_config_files: Vec::new(),
        }
    }

    /// Set the legacy system configuration files.
    pub fn with_system_files(mut self, files: Vec<PathBuf>) -> Self {
        self.system_config_files = files;
        self
    }

    /// The directory configuration documents live in.
    pub fn config_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.override_dir {
            if is_writable_dir(dir) {
                return dir.clone();
            }
            warn!(
                dir = %dir.display(),
                "Configured directory is not writable, falling back"
            );
        }

        for dir in &self.legacy_dirs {
            if dir.is_dir() && is_writable_dir(dir) {
                debug!(dir = %dir.display(), "Using legacy configuration directory");
                return dir.clone();
            }
        }

        if let Err(e) = fs::create_dir_all(&self.fallback_dir) {
            warn!(
                dir = %self.fallback_dir.display(),
                "Failed to create configuration directory: {}", e
            );
        }
        self.fallback_dir.clone()
    }

    /// Directories to try in order after `preferred` could not be used.
    pub fn fallback_chain(&self, preferred: &Path) -> Vec<PathBuf> {
        let mut chain = vec![preferred.to_path_buf()];
        for dir in [
            self.config_dir(),
            self.fallback_dir.clone(),
            std::env::temp_dir().join("neon"),
        ] {
            if !chain.contains(&dir) {
                chain.push(dir);
            }
        }
        chain
    }
}

/// Whether files can be created in `dir`. Missing directories are created.
pub fn is_writable_dir(dir: &Path) -> bool {
    if fs::create_dir_all(dir).is_err() {
        return false;
    }
    let probe = dir.join(format!(".neon_write_probe_{}", std::process::id()));
    match OpenOptions::new().write(true).create(true).truncate(true).open(&probe) {
        Ok(_) => {
            let _ = fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}
