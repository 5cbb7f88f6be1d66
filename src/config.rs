use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BootError, Result};

/// Default pip bootstrap script location (project download site).
pub const DEFAULT_BOOTSTRAP_URL: &str = "http://221.236.27.82:10197/d/AUTO_MAA/get-pip.py";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application root. Empty means the directory of the running executable.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub app_root: String,
    pub toolchain_mirror: String,
    pub vcs_mirror: String,
    pub package_mirror: String,
    pub repository: String,
    pub branch: String,
    pub manifest: String,
    pub entry_point: String,
    pub ready_markers: Vec<String>,
    pub ready_timeout: String,
    pub bootstrap_url: String,
    pub min_toolchain_bytes: u64,
    pub min_vcs_bytes: u64,
    pub min_bootstrap_bytes: u64,
    pub connect_timeout: String,
    pub lock_stale_after: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_root: String::new(),
            toolchain_mirror: "ustc".to_string(),
            vcs_mirror: "project".to_string(),
            package_mirror: "tsinghua".to_string(),
            repository: "github".to_string(),
            branch: "feature/refactor-backend".to_string(),
            manifest: "requirements.txt".to_string(),
            entry_point: "main.py".to_string(),
            ready_markers: vec!["Uvicorn running".to_string()],
            ready_timeout: "30s".to_string(),
            bootstrap_url: DEFAULT_BOOTSTRAP_URL.to_string(),
            min_toolchain_bytes: 5 * 1024 * 1024,
            min_vcs_bytes: 1024 * 1024,
            min_bootstrap_bytes: 10_000,
            connect_timeout: "30s".to_string(),
            lock_stale_after: "1h".to_string(),
        }
    }
}

impl AppConfig {
    pub fn config_dir() -> Result<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| BootError::Config("Could not determine config directory".to_string()))?;
        Ok(base.join("bootkit"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.yaml"))
    }

    /// Load the user config, falling back to defaults when no file exists.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_yaml::from_str(&content)
                .map_err(|e| BootError::Config(format!("Invalid config {}: {}", path.display(), e)))?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            AppConfig::default()
        };

        if let Ok(root) = std::env::var("BOOTKIT_ROOT") {
            config.app_root = root;
        }
        if let Ok(repo) = std::env::var("BOOTKIT_REPO") {
            config.repository = repo;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .map_err(|e| BootError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Resolve the application root: explicit setting, else the executable's directory.
    pub fn resolve_root(&self) -> Result<PathBuf> {
        if !self.app_root.is_empty() {
            return Ok(PathBuf::from(shellexpand::tilde(&self.app_root).as_ref()));
        }

        let exe = std::env::current_exe()?;
        exe.parent()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| BootError::Config(format!("Executable has no parent: {}", exe.display())))
    }

    pub fn ready_timeout(&self) -> Duration {
        parse_duration(&self.ready_timeout).unwrap_or(Duration::from_secs(30))
    }

    pub fn connect_timeout(&self) -> Duration {
        parse_duration(&self.connect_timeout).unwrap_or(Duration::from_secs(30))
    }

    pub fn lock_stale_after(&self) -> Duration {
        parse_duration(&self.lock_stale_after).unwrap_or(Duration::from_secs(3600))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("ready_timeout", &self.ready_timeout),
            ("connect_timeout", &self.connect_timeout),
            ("lock_stale_after", &self.lock_stale_after),
        ] {
            match parse_duration(value) {
                Some(d) if !d.is_zero() => {}
                _ => {
                    return Err(BootError::Config(format!(
                        "Invalid {} '{}'. Use format like '30s', '5m', or '1h'",
                        field, value
                    )))
                }
            }
        }

        if self.ready_markers.iter().all(|m| m.trim().is_empty()) {
            return Err(BootError::Config(
                "ready_markers must contain at least one non-empty marker".to_string(),
            ));
        }

        if self.manifest.is_empty() || self.entry_point.is_empty() {
            return Err(BootError::Config(
                "manifest and entry_point must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Set a single field by name (used by `bootkit config set`).
    pub fn set(&mut self, key: &str, value: String) -> Result<()> {
        match key {
            "app_root" | "app-root" | "root" => self.app_root = value,
            "toolchain_mirror" | "toolchain-mirror" => self.toolchain_mirror = value,
            "vcs_mirror" | "vcs-mirror" => self.vcs_mirror = value,
            "package_mirror" | "package-mirror" => self.package_mirror = value,
            "repository" | "repo" => self.repository = value,
            "branch" => self.branch = value,
            "manifest" => self.manifest = value,
            "entry_point" | "entry-point" => self.entry_point = value,
            "ready_markers" | "ready-markers" => {
                self.ready_markers = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            }
            "ready_timeout" | "ready-timeout" => self.ready_timeout = value,
            "bootstrap_url" | "bootstrap-url" => self.bootstrap_url = value,
            "connect_timeout" | "connect-timeout" => self.connect_timeout = value,
            "lock_stale_after" | "lock-stale-after" => self.lock_stale_after = value,
            _ => return Err(BootError::Config(format!("Unknown config key: {}", key))),
        }
        self.validate()
    }
}

pub(crate) fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim().to_lowercase();

    if let Some(hours) = s.strip_suffix('h') {
        hours
            .parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .map(Duration::from_secs)
    } else if let Some(millis) = s.strip_suffix("ms") {
        millis.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(minutes) = s.strip_suffix('m') {
        minutes
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(seconds) = s.strip_suffix('s') {
        seconds.parse::<u64>().ok().map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
