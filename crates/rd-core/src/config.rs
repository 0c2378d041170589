//! Application configuration types.
//!
//! The top-level [`Config`] is deserialized from TOML by the binary and
//! carries the orchestrator, tool, store and profile sections. Every section
//! defaults sensibly so an empty file is valid.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::profile::ProfileSet;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,
    pub tools: ToolsConfig,
    pub store: StoreConfig,
    pub profiles: ProfileSet,
}

impl Config {
    /// Check the configuration for errors that would make the orchestrator
    /// unusable.
    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.max_concurrent_encodes == 0 {
            return Err(Error::Config(
                "orchestrator.max_concurrent_encodes must be at least 1".into(),
            ));
        }
        if self.orchestrator.task_timeout_secs == Some(0) {
            return Err(Error::Config(
                "orchestrator.task_timeout_secs must be positive when set".into(),
            ));
        }
        if self.profiles.iter().any(|p| p.timeout_secs == Some(0)) {
            return Err(Error::Config("profile timeout_secs must be positive".into()));
        }
        // Re-run profile validation for configs built in code.
        ProfileSet::new(self.profiles.as_slice().to_vec())
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(())
    }

    /// Return a list of non-fatal warnings.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(ref p) = self.tools.ffmpeg_path {
            if !p.exists() {
                warnings.push(format!("tools.ffmpeg_path {} does not exist", p.display()));
            }
        }
        if let Some(ref p) = self.tools.ffprobe_path {
            if !p.exists() {
                warnings.push(format!("tools.ffprobe_path {} does not exist", p.display()));
            }
        }
        if self.store.database_path.is_none() {
            warnings.push("store.database_path not set; jobs are kept in memory only".into());
        }
        warnings
    }
}

// ---------------------------------------------------------------------------
// OrchestratorConfig
// ---------------------------------------------------------------------------

/// Worker pool and deadline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum encode processes running at once across all jobs.
    pub max_concurrent_encodes: usize,
    /// Default per-task deadline; `None` disables it.
    pub task_timeout_secs: Option<u64>,
    /// How long a cancelled runner may take to wind down before the task is
    /// recorded as failed regardless.
    pub cancel_grace_secs: u64,
    /// Root directory for rendition outputs.
    pub output_dir: PathBuf,
    /// Broadcast channel capacity for the event bus.
    pub event_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_encodes: num_cpus::get().max(1),
            task_timeout_secs: Some(6 * 60 * 60),
            cancel_grace_secs: 10,
            output_dir: PathBuf::from("transcoded"),
            event_capacity: 256,
        }
    }
}

impl OrchestratorConfig {
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }
}

// ---------------------------------------------------------------------------
// ToolsConfig
// ---------------------------------------------------------------------------

/// Optional overrides for external tool locations. When unset the tools are
/// looked up in `PATH`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

/// Job persistence settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file. When unset, jobs live only in memory.
    pub database_path: Option<PathBuf>,
}
