//! Engine configuration - fixed for the lifetime of a performance session.

use serde::{Deserialize, Serialize};

/// Audio stream shape shared by the capture and render callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate of the input and output streams.
    /// Default: 48000
    #[serde(default = "AudioConfig::default_sample_rate")]
    pub sample_rate: u32,

    /// Frames per callback block.
    /// Default: 128
    #[serde(default = "AudioConfig::default_block_size")]
    pub block_size: usize,

    /// Number of track slots. Track 0 is the master loop.
    /// Default: 6
    #[serde(default = "AudioConfig::default_tracks")]
    pub tracks: usize,
}

impl AudioConfig {
    fn default_sample_rate() -> u32 {
        48000
    }

    fn default_block_size() -> usize {
        128
    }

    fn default_tracks() -> usize {
        6
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: Self::default_sample_rate(),
            block_size: Self::default_block_size(),
            tracks: Self::default_tracks(),
        }
    }
}

/// Capacities of the lock-free queues crossing the realtime boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Control -> capture command slots.
    /// Default: 64
    #[serde(default = "QueueConfig::default_capacity")]
    pub commands: usize,

    /// Capture -> control event slots.
    /// Default: 64
    #[serde(default = "QueueConfig::default_capacity")]
    pub events: usize,

    /// Control -> render voice command slots.
    /// Default: 64
    #[serde(default = "QueueConfig::default_capacity")]
    pub voices: usize,
}

impl QueueConfig {
    fn default_capacity() -> usize {
        64
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            commands: Self::default_capacity(),
            events: Self::default_capacity(),
            voices: Self::default_capacity(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    /// Default: "info"
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
