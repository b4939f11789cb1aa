//! drift-snap configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use drift_core::SessionConfig;
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapConfig {
    /// Proxy address, remote protocol, handshake parameters.
    pub session: SessionConfig,
    /// Where and how often snapshots are written.
    pub output: OutputConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Snapshot output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// PNG file overwritten with the latest canvas.
    pub path: PathBuf,
    /// How often the canvas is checked for changes, in milliseconds.
    pub poll_interval_ms: u64,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("drift-snap.png"),
            poll_interval_ms: 250,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl SnapConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Default configuration as TOML.
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Self::default())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.output.poll_interval_ms.max(1))
    }
}

// ── Tests ────────────────────────────────────────────────────────
