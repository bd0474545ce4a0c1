//! Playback mixer for looping track voices
//!
//! Split across the realtime boundary the same way capture is:
//! - **Mixer**: control handle. Starts, stops and retargets voices.
//! - **MixerRenderer**: lives in the output callback, sums voices.
//! - **Voice**: one looping buffer player plus its gain cell.
//!
//! Voice lifecycle crosses two rtrb queues. Stopped or replaced voices travel
//! back to the control thread on the retire queue so their buffers are freed
//! there, never in the render callback.
//!
//! Every voice reads from one shared loop cursor. A voice that joins a running
//! mix picks up at the cursor and stays phase-aligned with the voices already
//! playing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use portable_atomic::AtomicF32;
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, warn};

/// A looping buffer player bound to one track
#[derive(Debug)]
pub struct Voice {
    pub track: usize,
    /// Shared immutable audio, one loop long
    pub buffer: Arc<[f32]>,
    /// Effective gain, written by the control thread
    pub gain: Arc<AtomicF32>,
    /// Frames left before this voice becomes audible
    pub delay: usize,
}

/// Commands from the control handle to the renderer
#[derive(Debug)]
pub enum VoiceCommand {
    /// Start a voice, replacing any voice already on its track
    Start(Voice),
    Stop { track: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum MixerError {
    #[error("voice queue full, could not start track {track}")]
    QueueFull { track: usize },

    #[error("no such track: {0}")]
    UnknownTrack(usize),
}

/// Counters from the render callback
#[derive(Debug, Default)]
pub struct MixerStats {
    pub renders: AtomicU64,
    pub frames: AtomicU64,
    /// Voices dropped in the callback because the retire queue was full
    pub retire_overflow: AtomicU64,
}

/// Configuration for building a mixer pair
#[derive(Debug, Clone)]
pub struct MixerConfig {
    pub tracks: usize,
    /// Capacity of the voice command queue and of the retire queue
    pub voice_capacity: usize,
    /// Frames between `start_voice` and the voice becoming audible
    pub start_offset: usize,
    pub master_gain: f32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            tracks: 6,
            voice_capacity: 64,
            start_offset: 480,
            master_gain: 1.0,
        }
    }
}

impl MixerConfig {
    /// Build the control handle and the renderer
    pub fn build(self) -> (Mixer, MixerRenderer) {
        let (command_tx, command_rx) = RingBuffer::new(self.voice_capacity);
        let (retire_tx, retire_rx) = RingBuffer::new(self.voice_capacity);
        let master_gain = Arc::new(AtomicF32::new(self.master_gain));
        let stats = Arc::new(MixerStats::default());

        let mixer = Mixer {
            commands: command_tx,
            retired: retire_rx,
            gains: vec![None; self.tracks],
            start_offset: self.start_offset,
            master_gain: Arc::clone(&master_gain),
            stats: Arc::clone(&stats),
        };

        let renderer = MixerRenderer {
            commands: command_rx,
            retired: retire_tx,
            voices: std::iter::repeat_with(|| None).take(self.tracks).collect(),
            cursor: 0,
            master_gain,
            stats,
        };

        (mixer, renderer)
    }
}

/// Control-side handle
pub struct Mixer {
    commands: Producer<VoiceCommand>,
    retired: Consumer<Voice>,
    /// Gain cell of the live voice per track
    gains: Vec<Option<Arc<AtomicF32>>>,
    start_offset: usize,
    master_gain: Arc<AtomicF32>,
    stats: Arc<MixerStats>,
}

impl Mixer {
    /// Start looping `buffer` on `track` at `gain`, `start_offset` frames from now.
    pub fn start_voice(
        &mut self,
        track: usize,
        buffer: Arc<[f32]>,
        gain: f32,
    ) -> Result<(), MixerError> {
        let Some(slot) = self.gains.get_mut(track) else {
            return Err(MixerError::UnknownTrack(track));
        };

        let cell = Arc::new(AtomicF32::new(gain));
        let voice = Voice {
            track,
            buffer,
            gain: Arc::clone(&cell),
            delay: self.start_offset,
        };

        if self.commands.push(VoiceCommand::Start(voice)).is_err() {
            return Err(MixerError::QueueFull { track });
        }

        // The replaced voice is retired by the renderer; silence it now
        if let Some(old) = slot.replace(cell) {
            old.store(0.0, Ordering::Relaxed);
        }
        debug!(track, gain, "voice started");
        Ok(())
    }

    /// Stop the voice on `track`. Stopping a silent track does nothing.
    pub fn stop_voice(&mut self, track: usize) {
        let Some(cell) = self.gains.get_mut(track).and_then(Option::take) else {
            return;
        };

        cell.store(0.0, Ordering::Relaxed);
        if self.commands.push(VoiceCommand::Stop { track }).is_err() {
            // Gain is already zero; the voice keeps running silent until replaced
            warn!(track, "voice queue full, stop not delivered");
        } else {
            debug!(track, "voice stopped");
        }
    }

    pub fn stop_all(&mut self) {
        for track in 0..self.gains.len() {
            self.stop_voice(track);
        }
    }

    /// Update the gain of a live voice. No-op if the track is silent.
    pub fn retarget(&self, track: usize, gain: f32) {
        if let Some(Some(cell)) = self.gains.get(track) {
            cell.store(gain, Ordering::Relaxed);
        }
    }

    pub fn has_voice(&self, track: usize) -> bool {
        matches!(self.gains.get(track), Some(Some(_)))
    }

    /// Current gain of the live voice on `track`
    pub fn voice_gain(&self, track: usize) -> Option<f32> {
        self.gains
            .get(track)
            .and_then(Option::as_ref)
            .map(|cell| cell.load(Ordering::Relaxed))
    }

    pub fn active_voices(&self) -> usize {
        self.gains.iter().filter(|g| g.is_some()).count()
    }

    pub fn set_master_gain(&self, value: f32) {
        self.master_gain.store(value.max(0.0), Ordering::Relaxed);
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain.load(Ordering::Relaxed)
    }

    /// Free voices handed back by the renderer. Returns how many were dropped.
    pub fn collect_retired(&mut self) -> usize {
        let mut count = 0;
        while let Ok(voice) = self.retired.pop() {
            drop(voice);
            count += 1;
        }
        count
    }

    /// Get runtime statistics
    pub fn stats(&self) -> &Arc<MixerStats> {
        &self.stats
    }
}

/// Render-side half, owned by the output callback
pub struct MixerRenderer {
    commands: Consumer<VoiceCommand>,
    retired: Producer<Voice>,
    voices: Vec<Option<Voice>>,
    /// Frames played since the mix last started from silence
    cursor: usize,
    master_gain: Arc<AtomicF32>,
    stats: Arc<MixerStats>,
}

impl MixerRenderer {
    /// Fill `output` with one block of mono mix.
    pub fn render(&mut self, output: &mut [f32]) {
        self.apply_commands();

        let master_gain = self.master_gain.load(Ordering::Relaxed);

        for frame in output.iter_mut() {
            let mut sum = 0.0;
            let mut audible = false;

            for voice in self.voices.iter_mut().flatten() {
                if voice.delay > 0 {
                    voice.delay -= 1;
                    continue;
                }
                audible = true;
                if voice.buffer.is_empty() {
                    continue;
                }
                let sample = voice.buffer[self.cursor % voice.buffer.len()];
                sum += sample * voice.gain.load(Ordering::Relaxed);
            }

            if audible {
                self.cursor = self.cursor.wrapping_add(1);
            }
            *frame = sum * master_gain;
        }

        self.stats.renders.fetch_add(1, Ordering::Relaxed);
        self.stats
            .frames
            .fetch_add(output.len() as u64, Ordering::Relaxed);
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                VoiceCommand::Start(voice) => {
                    // Starting from silence begins a fresh pass over the loop
                    if !self.any_audible() {
                        self.cursor = 0;
                    }
                    let track = voice.track;
                    match self.voices.get_mut(track) {
                        Some(slot) => {
                            if let Some(old) = slot.replace(voice) {
                                self.retire(old);
                            }
                        }
                        None => self.retire(voice),
                    }
                }
                VoiceCommand::Stop { track } => {
                    if let Some(old) = self.voices.get_mut(track).and_then(Option::take) {
                        self.retire(old);
                    }
                }
            }
        }

        if self.voices.iter().all(Option::is_none) {
            self.cursor = 0;
        }
    }

    fn any_audible(&self) -> bool {
        self.voices.iter().flatten().any(|v| v.delay == 0)
    }

    fn retire(&mut self, voice: Voice) {
        if self.retired.push(voice).is_err() {
            self.stats.retire_overflow.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Position within the loop, in frames
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn voice_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(start_offset: usize) -> (Mixer, MixerRenderer) {
        MixerConfig {
            tracks: 4,
            voice_capacity: 8,
            start_offset,
            master_gain: 1.0,
        }
        .build()
    }

    fn ramp(len: usize) -> Arc<[f32]> {
        (0..len).map(|i| i as f32).collect::<Vec<_>>().into()
    }

    #[test]
    fn test_voice_waits_for_start_offset() {
        let (mut mixer, mut renderer) = pair(3);
        mixer.start_voice(0, ramp(4), 1.0).unwrap();

        let mut output = [0.0f32; 8];
        renderer.render(&mut output);

        // Silent for the offset, then from sample 0
        assert_eq!(output, [0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 0.0]);
    }

    #[test]
    fn test_voice_loops_buffer() {
        let (mut mixer, mut renderer) = pair(0);
        mixer.start_voice(1, ramp(3), 0.5).unwrap();

        let mut output = [0.0f32; 7];
        renderer.render(&mut output);

        assert_eq!(output, [0.0, 0.5, 1.0, 0.0, 0.5, 1.0, 0.0]);
    }

    #[test]
    fn test_retarget_changes_gain_only() {
        let (mut mixer, mut renderer) = pair(0);
        mixer.start_voice(0, Arc::from(vec![1.0f32; 4]), 1.0).unwrap();

        let mut output = [0.0f32; 2];
        renderer.render(&mut output);
        assert_eq!(output, [1.0, 1.0]);

        mixer.retarget(0, 0.25);
        renderer.render(&mut output);
        assert_eq!(output, [0.25, 0.25]);
        assert_eq!(renderer.cursor(), 4);
        assert_eq!(mixer.voice_gain(0), Some(0.25));
    }

    #[test]
    fn test_joining_voice_is_phase_aligned() {
        let (mut mixer, mut renderer) = pair(0);
        mixer.start_voice(0, ramp(8), 1.0).unwrap();

        let mut output = [0.0f32; 5];
        renderer.render(&mut output);

        mixer.start_voice(1, ramp(8), 1.0).unwrap();
        mixer.retarget(0, 0.0);
        let mut output = [0.0f32; 2];
        renderer.render(&mut output);

        // Track 1 picks up at the shared cursor, not at its own sample 0
        assert_eq!(output, [5.0, 6.0]);
    }

    #[test]
    fn test_stop_voice_is_idempotent() {
        let (mut mixer, mut renderer) = pair(0);
        mixer.start_voice(2, ramp(4), 1.0).unwrap();
        assert!(mixer.has_voice(2));

        mixer.stop_voice(2);
        mixer.stop_voice(2);
        mixer.stop_voice(3);
        mixer.stop_voice(99);
        assert!(!mixer.has_voice(2));

        let mut output = [1.0f32; 4];
        renderer.render(&mut output);
        assert_eq!(output, [0.0; 4]);
        assert_eq!(renderer.voice_count(), 0);
        assert_eq!(mixer.collect_retired(), 1);
    }

    #[test]
    fn test_cursor_resets_when_mix_goes_silent() {
        let (mut mixer, mut renderer) = pair(0);
        mixer.start_voice(0, ramp(8), 1.0).unwrap();
        let mut output = [0.0f32; 3];
        renderer.render(&mut output);
        assert_eq!(renderer.cursor(), 3);

        mixer.stop_all();
        renderer.render(&mut output);
        assert_eq!(renderer.cursor(), 0);

        mixer.start_voice(0, ramp(8), 1.0).unwrap();
        renderer.render(&mut output);
        assert_eq!(output, [0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_restart_between_callbacks_begins_at_sample_zero() {
        let (mut mixer, mut renderer) = pair(0);
        mixer.start_voice(0, ramp(8), 1.0).unwrap();
        let mut output = [0.0f32; 3];
        renderer.render(&mut output);

        // Stop and start land in the same render call
        mixer.stop_all();
        mixer.start_voice(0, ramp(8), 1.0).unwrap();
        renderer.render(&mut output);

        assert_eq!(output, [0.0, 1.0, 2.0]);
        assert_eq!(renderer.cursor(), 3);
    }

    #[test]
    fn test_restart_with_offset_begins_at_sample_zero() {
        let (mut mixer, mut renderer) = pair(2);
        mixer.start_voice(0, ramp(8), 1.0).unwrap();
        let mut output = [0.0f32; 5];
        renderer.render(&mut output);
        assert_eq!(output, [0.0, 0.0, 0.0, 1.0, 2.0]);

        mixer.stop_all();
        mixer.start_voice(0, ramp(8), 1.0).unwrap();
        mixer.start_voice(1, ramp(8), 1.0).unwrap();
        renderer.render(&mut output);

        assert_eq!(output, [0.0, 0.0, 0.0, 2.0, 4.0]);
    }

    #[test]
    fn test_stats_count_renders_and_retire_overflow() {
        let (mut mixer, mut renderer) = MixerConfig {
            tracks: 2,
            voice_capacity: 4,
            start_offset: 0,
            master_gain: 1.0,
        }
        .build();

        // Five replacements on one track while nothing is collected: the
        // retire queue holds four, the fifth is dropped in the callback.
        let mut output = [0.0f32; 4];
        for _ in 0..6 {
            mixer.start_voice(0, ramp(4), 1.0).unwrap();
            renderer.render(&mut output);
        }

        let stats = mixer.stats();
        assert_eq!(stats.renders.load(Ordering::Relaxed), 6);
        assert_eq!(stats.frames.load(Ordering::Relaxed), 24);
        assert_eq!(stats.retire_overflow.load(Ordering::Relaxed), 1);
        assert_eq!(mixer.collect_retired(), 4);
    }

    #[test]
    fn test_replacing_voice_retires_old_one() {
        let (mut mixer, mut renderer) = pair(0);
        mixer.start_voice(0, ramp(4), 1.0).unwrap();
        let mut output = [0.0f32; 1];
        renderer.render(&mut output);

        mixer.start_voice(0, Arc::from(vec![9.0f32; 4]), 1.0).unwrap();
        renderer.render(&mut output);

        assert_eq!(output, [9.0]);
        assert_eq!(renderer.voice_count(), 1);
        assert_eq!(mixer.collect_retired(), 1);
    }

    #[test]
    fn test_master_gain_scales_mix() {
        let (mut mixer, mut renderer) = pair(0);
        mixer.set_master_gain(0.5);
        assert_eq!(mixer.master_gain(), 0.5);
        mixer.set_master_gain(-1.0);
        assert_eq!(mixer.master_gain(), 0.0);
        mixer.set_master_gain(0.5);
        mixer.start_voice(0, Arc::from(vec![1.0f32; 2]), 1.0).unwrap();
        mixer.start_voice(1, Arc::from(vec![0.5f32; 2]), 1.0).unwrap();

        let mut output = [0.0f32; 2];
        renderer.render(&mut output);
        for &s in &output {
            assert!((s - 0.75).abs() < 0.001);
        }
    }

    #[test]
    fn test_unknown_track_rejected() {
        let (mut mixer, _renderer) = pair(0);
        let err = mixer.start_voice(4, ramp(2), 1.0).unwrap_err();
        assert!(matches!(err, MixerError::UnknownTrack(4)));
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn test_full_voice_queue_reports_error() {
        let (mut mixer, _renderer) = MixerConfig {
            tracks: 4,
            voice_capacity: 1,
            start_offset: 0,
            master_gain: 1.0,
        }
        .build();

        mixer.start_voice(0, ramp(2), 1.0).unwrap();
        let err = mixer.start_voice(1, ramp(2), 1.0).unwrap_err();
        assert!(matches!(err, MixerError::QueueFull { track: 1 }));
        assert!(!mixer.has_voice(1));
    }
}
