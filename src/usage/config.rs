//! Configuration and data directory discovery

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Name of the directory under the data root that holds per-project logs
pub const PROJECTS_DIR_NAME: &str = "projects";

/// Extension of usage log files
pub const LOG_FILE_EXTENSION: &str = "jsonl";

/// Longest session window accepted from configuration, one year
pub const MAX_SESSION_HOURS: f64 = 24.0 * 365.0;

/// Convert a configured number of seconds to a `Duration`
///
/// Negative and NaN values become zero; values too large for a `Duration`
/// saturate at `Duration::MAX`.
pub fn duration_from_secs(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

/// Get the Claude data directory path
/// Priority: 1. Custom path from config, 2. CLAUDE_CONFIG_DIR env var, 3. Default ~/.claude
pub fn get_claude_data_dir(custom_path: Option<&str>) -> PathBuf {
    if let Some(path) = custom_path {
        return PathBuf::from(path);
    }

    if let Ok(env_path) = env::var("CLAUDE_CONFIG_DIR") {
        return PathBuf::from(env_path);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".claude");
    }

    PathBuf::from(".claude")
}

/// Get the projects directory within the Claude data directory
pub fn get_projects_dir(root: &Path) -> PathBuf {
    root.join(PROJECTS_DIR_NAME)
}

/// Derive a display name from an encoded project directory
///
/// Claude Code encodes a project's absolute path by replacing separators with
/// `-`, so the last hyphen-delimited piece of the last segment is taken as the
/// name. A real name containing hyphens is therefore truncated.
pub fn project_display_name(project_dir: &Path) -> String {
    let segment = match project_dir.file_name().and_then(|n| n.to_str()) {
        Some(s) if !s.is_empty() => s,
        _ => return project_dir.to_string_lossy().to_string(),
    };

    match segment.rsplit_once('-') {
        Some((_, tail)) if !tail.is_empty() => tail.to_string(),
        _ => segment.to_string(),
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default)]
    pub data_path: Option<String>,
    #[serde(default = "default_session_duration_hours")]
    pub session_duration_hours: f64,
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: f64,
    #[serde(default = "default_debounce_seconds")]
    pub debounce_seconds: f64,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u64,
}

fn default_session_duration_hours() -> f64 {
    5.0
}

fn default_cache_ttl_seconds() -> f64 {
    2.0
}

fn default_debounce_seconds() -> f64 {
    1.0
}

fn default_refresh_interval() -> u64 {
    300 // 5 minutes
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_path: None,
            session_duration_hours: default_session_duration_hours(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            debounce_seconds: default_debounce_seconds(),
            refresh_interval_seconds: default_refresh_interval(),
        }
    }
}

impl EngineConfig {
    pub fn with_data_path(mut self, path: impl Into<String>) -> Self {
        self.data_path = Some(path.into());
        self
    }

    /// Resolved data root
    pub fn data_dir(&self) -> PathBuf {
        get_claude_data_dir(self.data_path.as_deref())
    }

    /// Session window length in hours
    ///
    /// Non-positive or non-finite values fall back to the default, and the
    /// window is capped at [`MAX_SESSION_HOURS`].
    pub fn session_hours(&self) -> f64 {
        let hours = self.session_duration_hours;
        if !hours.is_finite() || hours <= 0.0 {
            return default_session_duration_hours();
        }
        hours.min(MAX_SESSION_HOURS)
    }

    pub fn session_duration(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.session_hours() * 3_600_000.0).round() as i64)
    }

    pub fn cache_ttl(&self) -> Duration {
        duration_from_secs(self.cache_ttl_seconds)
    }

    pub fn debounce(&self) -> Duration {
        duration_from_secs(self.debounce_seconds)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds.max(1))
    }
}
