use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::guard::GuardConfig;

/// Tool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GuardToolConfig {
    /// Directory holding the persisted session store. Defaults to the
    /// platform data directory.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    /// Seconds between ticks of the watch loop
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Oldest a stored session may be before it is rejected
    #[serde(default = "default_max_session_age")]
    pub max_session_age_hours: u64,

    /// Forward clock skew tolerated when validating stored start times
    #[serde(default = "default_clock_skew_leeway")]
    pub clock_skew_leeway_secs: i64,
}

fn default_tick_interval() -> u64 {
    1
}

fn default_max_session_age() -> u64 {
    24
}

fn default_clock_skew_leeway() -> i64 {
    5
}

impl Default for GuardToolConfig {
    fn default() -> Self {
        Self {
            storage_dir: None,
            tick_interval_secs: default_tick_interval(),
            max_session_age_hours: default_max_session_age(),
            clock_skew_leeway_secs: default_clock_skew_leeway(),
        }
    }
}

impl GuardToolConfig {
    /// Validation bounds for the guard itself.
    pub fn guard_config(&self) -> GuardConfig {
        GuardConfig {
            max_session_age_hours: self.max_session_age_hours,
            clock_skew_leeway_secs: self.clock_skew_leeway_secs,
        }
    }

    /// Resolve the session store directory.
    pub fn storage_dir(&self) -> Result<PathBuf> {
        match &self.storage_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_storage_dir(),
        }
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "round-guard")
        .context("could not determine a platform directory for round-guard")
}

/// Default directory for the persisted session store.
pub fn default_storage_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// Default path of the configuration file.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("round-guard.yaml"))
}

/// Load configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<GuardToolConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))
}

/// Save configuration to a YAML file.
pub fn save_config(config: &GuardToolConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory: {}", parent.display()))?;
    }

    let content = serde_yaml::to_string(config).context("failed to serialize config")?;

    std::fs::write(path, content)
        .with_context(|| format!("failed to write config file: {}", path.display()))?;

    Ok(())
}

/// Example configuration written by `round-guard init`.
pub const EXAMPLE_CONFIG: &str = r#"# round-guard configuration
#
# Directory holding the persisted session store. Leave unset to use the
# platform data directory.
#storage_dir: /var/lib/round-guard

# Seconds between ticks of the watch loop.
tick_interval_secs: 1

# Stored sessions older than this are rejected as bogus.
max_session_age_hours: 24

# Forward clock skew tolerated when validating stored start times.
clock_skew_leeway_secs: 5
"#;
