//! Session configuration - how the transport behaves during a performance.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How loop-boundary crossings are detected for quantized mute/solo changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantizeMode {
    /// Boundary events come from the capture engine's sample counter.
    #[default]
    Sample,
    /// Boundaries are inferred by polling the display phase.
    Poll,
}

impl FromStr for QuantizeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sample" => Ok(Self::Sample),
            "poll" => Ok(Self::Poll),
            other => Err(format!("unknown quantize mode: {}", other)),
        }
    }
}

impl fmt::Display for QuantizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sample => write!(f, "sample"),
            Self::Poll => write!(f, "poll"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Boundary detection strategy.
    #[serde(default)]
    pub quantize: QuantizeMode,

    /// Delay before a newly started voice becomes audible.
    /// Default: 10.0
    #[serde(default = "SessionConfig::default_start_offset_ms")]
    pub start_offset_ms: f32,

    /// Display loop period used before a master loop exists.
    /// Default: 4.0, never below 0.5
    #[serde(default = "SessionConfig::default_display_loop_seconds")]
    pub display_loop_seconds: f64,

    /// Phase above which a poll sample counts as "end of loop".
    /// Default: 0.95
    #[serde(default = "SessionConfig::default_poll_high")]
    pub poll_high: f64,

    /// Phase below which a poll sample counts as "start of loop".
    /// Default: 0.05
    #[serde(default = "SessionConfig::default_poll_low")]
    pub poll_low: f64,

    /// Gain applied to the summed output.
    /// Default: 1.0
    #[serde(default = "SessionConfig::default_master_gain")]
    pub master_gain: f32,
}

impl SessionConfig {
    pub const MIN_DISPLAY_LOOP_SECONDS: f64 = 0.5;

    fn default_start_offset_ms() -> f32 {
        10.0
    }

    fn default_display_loop_seconds() -> f64 {
        4.0
    }

    fn default_poll_high() -> f64 {
        0.95
    }

    fn default_poll_low() -> f64 {
        0.05
    }

    fn default_master_gain() -> f32 {
        1.0
    }

    /// Display period clamped to the supported minimum.
    pub fn display_loop_seconds(&self) -> f64 {
        if self.display_loop_seconds.is_nan() {
            return Self::default_display_loop_seconds();
        }
        self.display_loop_seconds.max(Self::MIN_DISPLAY_LOOP_SECONDS)
    }

    /// Voice start offset converted to whole frames at `sample_rate`.
    pub fn start_offset_frames(&self, sample_rate: u32) -> usize {
        let ms = self.start_offset_ms.max(0.0) as f64;
        (ms * sample_rate as f64 / 1000.0).round() as usize
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            quantize: QuantizeMode::default(),
            start_offset_ms: Self::default_start_offset_ms(),
            display_loop_seconds: Self::default_display_loop_seconds(),
            poll_high: Self::default_poll_high(),
            poll_low: Self::default_poll_low(),
            master_gain: Self::default_master_gain(),
        }
    }
}
