//! Loopgarden: Multi-track Audio Looper Core
//!
//! A performer records a master loop on track 0, then records further tracks
//! that line up with the master's sample grid, and mutes, solos or clears
//! tracks while everything keeps looping.
//!
//! Three owners, one per thread, connected only by lock-free SPSC queues:
//!
//! - **CaptureEngine** (input callback): discovers the loop length, keeps the
//!   grid position, starts and stops secondary takes on exact grid origins
//! - **TransportController** (control thread): track state machine, quantized
//!   mute/solo, gains, voice lifecycle
//! - **MixerRenderer** (output callback): sums looping voices
//!
//! `LooperSession` builds all three from a `loopconf::LooperConfig`.

pub mod capture;
pub mod loop_clock;
pub mod messages;
pub mod mixer;
pub mod session;
pub mod track;
pub mod transport;

pub use capture::{CaptureEngine, CaptureStats};
pub use loop_clock::{BoundaryDetector, LoopClock};
pub use messages::{
    capture_link, CaptureCommand, CaptureEvent, CaptureLink, CapturePort, QueueFull, TakeId,
};
pub use mixer::{Mixer, MixerConfig, MixerError, MixerRenderer, MixerStats, Voice, VoiceCommand};
pub use session::{LooperError, LooperSession};
pub use track::{Track, TrackState, TrackStatus, TransportState};
pub use transport::TransportController;

pub use loopconf::{LooperConfig, QuantizeMode, SessionConfig};
