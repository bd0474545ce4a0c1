//! Session wiring
//!
//! Builds the three thread-owned parts of a looper from one configuration:
//! the transport controller for the control thread, the capture engine for
//! the input callback, and the mixer renderer for the output callback.

use loopconf::LooperConfig;
use tracing::info;

use crate::capture::CaptureEngine;
use crate::messages::capture_link;
use crate::mixer::{MixerConfig, MixerRenderer};
use crate::transport::TransportController;

#[derive(Debug, thiserror::Error)]
pub enum LooperError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// A looper ready to be split across threads
pub struct LooperSession {
    transport: TransportController,
    capture: CaptureEngine,
    renderer: MixerRenderer,
}

impl LooperSession {
    pub fn new(config: &LooperConfig) -> Result<Self, LooperError> {
        validate(config)?;

        let audio = &config.audio;
        let (link, port) = capture_link(config.queues.commands, config.queues.events);

        // Reserve room for a generous master take so early growth is rare
        let master_reserve = audio.sample_rate as usize * 8;
        let capture = CaptureEngine::new(port, master_reserve);

        let (mixer, renderer) = MixerConfig {
            tracks: audio.tracks,
            voice_capacity: config.queues.voices,
            start_offset: config.session.start_offset_frames(audio.sample_rate),
            master_gain: config.session.master_gain.max(0.0),
        }
        .build();

        let transport = TransportController::new(
            link,
            mixer,
            audio.tracks,
            audio.sample_rate,
            &config.session,
        );

        info!(
            sample_rate = audio.sample_rate,
            block_size = audio.block_size,
            tracks = audio.tracks,
            quantize = %config.session.quantize,
            "looper session ready"
        );

        Ok(Self {
            transport,
            capture,
            renderer,
        })
    }

    /// Hand each part to its thread
    pub fn into_parts(self) -> (TransportController, CaptureEngine, MixerRenderer) {
        (self.transport, self.capture, self.renderer)
    }

    pub fn transport(&mut self) -> &mut TransportController {
        &mut self.transport
    }

    pub fn capture(&mut self) -> &mut CaptureEngine {
        &mut self.capture
    }

    pub fn renderer(&mut self) -> &mut MixerRenderer {
        &mut self.renderer
    }
}

fn validate(config: &LooperConfig) -> Result<(), LooperError> {
    let audio = &config.audio;
    if audio.tracks == 0 {
        return Err(LooperError::InvalidConfig("tracks must be at least 1".into()));
    }
    if audio.sample_rate == 0 {
        return Err(LooperError::InvalidConfig("sample_rate must be positive".into()));
    }
    if audio.block_size == 0 {
        return Err(LooperError::InvalidConfig("block_size must be positive".into()));
    }

    let queues = &config.queues;
    for (name, capacity) in [
        ("commands", queues.commands),
        ("events", queues.events),
        ("voices", queues.voices),
    ] {
        if capacity == 0 {
            return Err(LooperError::InvalidConfig(format!(
                "queue capacity for {} must be positive",
                name
            )));
        }
    }
    // One event slot stays free for recorded takes
    if queues.events < 2 {
        return Err(LooperError::InvalidConfig(
            "queue capacity for events must be at least 2".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_builds() {
        let mut session = LooperSession::new(&LooperConfig::default()).unwrap();
        assert_eq!(session.transport().num_tracks(), 6);
        assert_eq!(session.transport().quantize(), loopconf::QuantizeMode::Sample);
        assert_eq!(session.capture().loop_length(), None);
        assert_eq!(session.renderer().voice_count(), 0);
    }

    #[test]
    fn test_zero_tracks_rejected() {
        let mut config = LooperConfig::default();
        config.audio.tracks = 0;

        let err = LooperSession::new(&config).err().unwrap();
        assert!(err.to_string().contains("tracks"));
    }

    #[test]
    fn test_zero_queue_rejected() {
        let mut config = LooperConfig::default();
        config.queues.events = 0;

        assert!(matches!(
            LooperSession::new(&config),
            Err(LooperError::InvalidConfig(msg)) if msg.contains("events")
        ));
    }

    #[test]
    fn test_single_slot_event_queue_rejected() {
        let mut config = LooperConfig::default();
        config.queues.events = 1;

        let err = LooperSession::new(&config).err().unwrap();
        assert!(err.to_string().contains("at least 2"));
    }
}
