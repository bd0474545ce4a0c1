//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, LooperConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local). Only returns files
/// that exist. If `cli_path` is provided and exists, it replaces the local
/// override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/loopgarden/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("loopgarden/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("loopgarden.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a config file as a raw TOML table.
pub fn load_table_from_file(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base` key by key; nested tables merge recursively.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Deserialize a merged table into a typed config.
///
/// `origin` is only used for error reporting.
pub fn config_from_table(table: toml::Table, origin: &Path) -> Result<LooperConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut LooperConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Apply overrides using an arbitrary variable lookup.
///
/// Unparseable values are skipped and not recorded as overrides.
pub fn apply_overrides_from<F>(config: &mut LooperConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("LOOPGARDEN_SAMPLE_RATE") {
        if let Ok(rate) = v.trim().parse() {
            config.audio.sample_rate = rate;
            sources.env_overrides.push("LOOPGARDEN_SAMPLE_RATE".to_string());
        }
    }
    if let Some(v) = lookup("LOOPGARDEN_BLOCK_SIZE") {
        if let Ok(size) = v.trim().parse() {
            config.audio.block_size = size;
            sources.env_overrides.push("LOOPGARDEN_BLOCK_SIZE".to_string());
        }
    }
    if let Some(v) = lookup("LOOPGARDEN_TRACKS") {
        if let Ok(tracks) = v.trim().parse() {
            config.audio.tracks = tracks;
            sources.env_overrides.push("LOOPGARDEN_TRACKS".to_string());
        }
    }
    if let Some(v) = lookup("LOOPGARDEN_QUANTIZE") {
        if let Ok(mode) = v.parse() {
            config.session.quantize = mode;
            sources.env_overrides.push("LOOPGARDEN_QUANTIZE".to_string());
        }
    }
    if let Some(v) = lookup("LOOPGARDEN_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("LOOPGARDEN_LOG_LEVEL".to_string());
    }
    // RUST_LOG wins over everything else for the filter
    if let Some(v) = lookup("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}
