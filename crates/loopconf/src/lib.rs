//! Minimal configuration loading for Loopgarden.
//!
//! # Configuration Philosophy
//!
//! - **Engine** (`AudioConfig`, `QueueConfig`, `TelemetryConfig`): fixed
//!   for a performance session - sample rate, track count, queue sizes.
//!
//! - **Session** (`SessionConfig`): how the transport behaves - boundary
//!   quantization, voice start offset, display loop period.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, key by key):
//! 1. `/etc/loopgarden/config.toml` (system)
//! 2. `~/.config/loopgarden/config.toml` (user)
//! 3. `./loopgarden.toml` (local override, or an explicit path)
//! 4. Environment variables (`LOOPGARDEN_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [audio]
//! sample_rate = 48000
//! block_size = 128
//! tracks = 6
//!
//! [queues]
//! commands = 64
//! events = 64
//! voices = 64
//!
//! [telemetry]
//! log_level = "info"
//!
//! [session]
//! quantize = "sample"
//! start_offset_ms = 10.0
//! display_loop_seconds = 4.0
//! ```

pub mod engine;
pub mod loader;
pub mod session;

pub use engine::{AudioConfig, QueueConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};
pub use session::{QuantizeMode, SessionConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete Loopgarden configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LooperConfig {
    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub queues: QueueConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

impl LooperConfig {
    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let files = loader::discover_config_files_with_override(config_path);
        let (mut config, mut sources) = Self::from_files(&files)?;
        loader::apply_env_overrides(&mut config, &mut sources);
        Ok((config, sources))
    }

    /// Merge exactly these files in order, without environment overrides.
    pub fn from_files(files: &[PathBuf]) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in files {
            let table = loader::load_table_from_file(path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path.clone());
        }

        let origin = files
            .last()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("<defaults>"));
        let config = loader::config_from_table(merged, &origin)?;
        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let body = toml::to_string_pretty(self).unwrap_or_default();
        format!("# Loopgarden Configuration\n\n{}", body)
    }
}
