//! Per-track and session-wide state types

use std::fmt;
use std::sync::Arc;

/// Lifecycle of one track slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackState {
    #[default]
    Empty,
    /// Waiting for the next grid origin to start capturing
    Armed,
    Recording,
    Playing,
}

/// Global session phase, used for gating and display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Idle,
    RecordingLoop1,
    PlayingLoop1,
    RecordingLoop2Pending,
    RecordingLoop2,
    PlayingAll,
}

/// What a track slot should show, resolved in display precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    Empty,
    Armed,
    Recording,
    Soloed,
    Muted,
    Playing,
}

impl fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TrackStatus::Empty => "Empty",
            TrackStatus::Armed => "Armed",
            TrackStatus::Recording => "Recording...",
            TrackStatus::Soloed => "Soloed",
            TrackStatus::Muted => "Muted",
            TrackStatus::Playing => "Playing",
        };
        f.write_str(label)
    }
}

/// One looper track
#[derive(Debug, Clone)]
pub struct Track {
    pub state: TrackState,
    /// One loop of mono audio, shared with the playing voice
    pub buffer: Option<Arc<[f32]>>,
    pub muted: bool,
    pub mute_armed: bool,
    pub unmute_armed: bool,
    pub solo_armed: bool,
    pub unsolo_armed: bool,
    /// User gain, never negative
    pub volume: f32,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            state: TrackState::Empty,
            buffer: None,
            muted: false,
            mute_armed: false,
            unmute_armed: false,
            solo_armed: false,
            unsolo_armed: false,
            volume: 1.0,
        }
    }
}

impl Track {
    pub fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    /// Drop audio, mute state and pending flags. Volume is kept.
    pub fn clear(&mut self) {
        self.state = TrackState::Empty;
        self.buffer = None;
        self.muted = false;
        self.clear_pending();
    }

    pub fn clear_pending(&mut self) {
        self.mute_armed = false;
        self.unmute_armed = false;
        self.solo_armed = false;
        self.unsolo_armed = false;
    }

    /// State a track settles into once nothing is armed or recording
    pub fn settled_state(&self) -> TrackState {
        if self.has_buffer() {
            TrackState::Playing
        } else {
            TrackState::Empty
        }
    }

    /// Resolve display status. `soloed` is whether this track holds the solo role.
    pub fn status(&self, soloed: bool) -> TrackStatus {
        match self.state {
            TrackState::Empty if !self.has_buffer() => TrackStatus::Empty,
            TrackState::Armed => TrackStatus::Armed,
            TrackState::Recording => TrackStatus::Recording,
            _ if soloed => TrackStatus::Soloed,
            _ if self.muted => TrackStatus::Muted,
            _ if self.has_buffer() => TrackStatus::Playing,
            _ => TrackStatus::Empty,
        }
    }
}
