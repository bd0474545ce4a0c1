//! Transport controller - the control-thread half of the looper
//!
//! Owns per-track state, the solo role and the global transport phase.
//! Consumes capture events, posts capture commands, and drives the mixer.
//!
//! ```text
//! UI ──▶ TransportController ──CaptureCommand──▶ CaptureEngine (input callback)
//!              ▲      │                                   │
//!              │      └──start/stop/retarget──▶ Mixer ──▶ MixerRenderer (output callback)
//!              └──────────────CaptureEvent────────────────┘
//! ```
//!
//! Mute and solo requests are quantized: they only set pending flags, which
//! are applied at the next loop boundary. Clear and volume apply immediately.

use std::sync::Arc;
use std::time::Instant;

use loopconf::{QuantizeMode, SessionConfig};
use tracing::{debug, info, warn};

use crate::loop_clock::{BoundaryDetector, LoopClock};
use crate::messages::{CaptureCommand, CaptureEvent, CaptureLink, TakeId};
use crate::mixer::Mixer;
use crate::track::{Track, TrackState, TrackStatus, TransportState};

pub struct TransportController {
    link: CaptureLink,
    mixer: Mixer,
    tracks: Vec<Track>,
    solo: Option<usize>,
    transport: TransportState,
    loop_length: Option<usize>,
    sample_rate: u32,
    /// Global playback running
    playing: bool,
    quantize: QuantizeMode,
    clock: LoopClock,
    detector: BoundaryDetector,
    display_loop_seconds: f64,
    /// Boundary crossings applied so far
    boundaries: u64,
    /// The one take the capture engine may answer, as (track, id)
    pending: Option<(usize, TakeId)>,
    next_take: TakeId,
}

impl TransportController {
    pub fn new(
        link: CaptureLink,
        mixer: Mixer,
        tracks: usize,
        sample_rate: u32,
        session: &SessionConfig,
    ) -> Self {
        let display_loop_seconds = session.display_loop_seconds();
        Self {
            link,
            mixer,
            tracks: vec![Track::default(); tracks.max(1)],
            solo: None,
            transport: TransportState::Idle,
            loop_length: None,
            sample_rate,
            playing: false,
            quantize: session.quantize,
            clock: LoopClock::new(display_loop_seconds, Instant::now()),
            detector: BoundaryDetector::new(session.poll_high, session.poll_low),
            display_loop_seconds,
            boundaries: 0,
            pending: None,
            next_take: 1,
        }
    }

    // -- event pump --

    /// Apply every pending capture event. Returns how many were handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.link.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        self.mixer.collect_retired();
        handled
    }

    pub fn handle_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Loop1Recorded {
                take,
                length,
                buffer,
            } => self.on_loop1_recorded(take, length, buffer),
            CaptureEvent::Loop2Started { track, take } => self.on_loop2_started(track, take),
            CaptureEvent::LoopRecorded {
                track,
                take,
                buffer,
            } => self.on_loop_recorded(track, take, buffer),
            CaptureEvent::Boundary { cycle } => self.on_boundary(cycle),
        }
    }

    fn on_loop1_recorded(&mut self, take: TakeId, length: usize, buffer: Vec<f32>) {
        if !self.expects(0, take) || buffer.is_empty() {
            debug!(take, length, "stale master recording dropped");
            return;
        }
        self.pending = None;

        let master = &mut self.tracks[0];
        master.buffer = Some(Arc::from(buffer));
        master.state = TrackState::Playing;

        self.loop_length = Some(length);
        self.clock.set_period(length as f64 / self.sample_rate as f64);
        self.clock.reset_at(Instant::now());
        self.detector.reset();

        info!(
            samples = length,
            seconds = self.clock.period(),
            "master loop recorded"
        );

        if self.playing {
            self.start_track_voice(0);
        } else {
            self.start_global_playback();
        }
        self.settle_transport();
    }

    fn on_loop2_started(&mut self, index: usize, take: TakeId) {
        if !self.expects(index, take) || self.tracks[index].state != TrackState::Armed {
            debug!(track = index, take, "stale take start dropped");
            return;
        }

        self.tracks[index].state = TrackState::Recording;
        info!(track = index, "recording started on loop boundary");
        self.settle_transport();
    }

    fn on_loop_recorded(&mut self, index: usize, take: TakeId, buffer: Vec<f32>) {
        if !self.expects(index, take) {
            debug!(track = index, take, "stale take dropped");
            return;
        }
        self.pending = None;

        let track = &mut self.tracks[index];
        let samples = buffer.len();
        track.buffer = Some(Arc::from(buffer));
        track.state = TrackState::Playing;
        info!(track = index, samples, "track recorded");

        if self.playing {
            self.start_track_voice(index);
        } else {
            self.start_global_playback();
        }
        self.settle_transport();
    }

    fn on_boundary(&mut self, cycle: u64) {
        self.clock.reset_at(Instant::now());
        if self.quantize == QuantizeMode::Sample {
            debug!(cycle, "loop boundary");
            self.apply_boundary();
        }
    }

    /// Sample the display phase; in poll mode a detected wrap applies
    /// pending changes. Returns true if a boundary was applied.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.quantize != QuantizeMode::Poll {
            return false;
        }
        let phase = self.clock.phase_at(now);
        if self.detector.crossed(phase) {
            debug!(phase, "polled loop boundary");
            self.apply_boundary();
            return true;
        }
        false
    }

    /// Apply pending mute and solo flags, in track order.
    fn apply_boundary(&mut self) {
        for (index, track) in self.tracks.iter_mut().enumerate() {
            if track.mute_armed {
                track.muted = true;
                track.mute_armed = false;
            }
            if track.unmute_armed {
                track.muted = false;
                track.unmute_armed = false;
            }
            if track.solo_armed {
                self.solo = Some(index);
                track.solo_armed = false;
            }
            if track.unsolo_armed {
                if self.solo == Some(index) {
                    self.solo = None;
                }
                track.unsolo_armed = false;
            }
        }
        self.boundaries += 1;
        self.apply_all_gains();
    }

    // -- UI commands --

    /// Record button. Track 0 starts or stops the master loop; other tracks
    /// arm for the next boundary.
    pub fn record_toggle(&mut self, index: usize) {
        if index >= self.tracks.len() {
            return;
        }
        if index == 0 {
            self.toggle_master();
        } else {
            self.arm_track(index);
        }
    }

    fn toggle_master(&mut self) {
        if self.transport == TransportState::RecordingLoop1 {
            self.post(CaptureCommand::StopLoop1);
            return;
        }

        if self.tracks[0].has_buffer() {
            debug!("master loop already recorded, clear track 0 first");
            return;
        }

        let take = self.next_take;
        if !self.post(CaptureCommand::StartLoop1 { take }) {
            return;
        }
        self.next_take += 1;
        self.pending = Some((0, take));

        // The old grid is void; secondary takes no longer fit it
        self.mixer.stop_all();
        for track in &mut self.tracks {
            track.clear();
        }
        self.solo = None;
        self.loop_length = None;
        self.playing = false;
        self.clock.set_period(self.display_loop_seconds);

        self.tracks[0].state = TrackState::Recording;
        info!(take, "master loop recording");
        self.settle_transport();
    }

    fn arm_track(&mut self, index: usize) {
        if self.tracks[index].has_buffer() {
            debug!(track = index, "overdub not supported");
            return;
        }
        if self.loop_length.is_none() {
            debug!(track = index, "no master loop yet");
            return;
        }
        if self.tracks[index].state != TrackState::Empty || self.capture_pending() {
            debug!(track = index, "another take is armed or recording");
            return;
        }

        let take = self.next_take;
        if self.post(CaptureCommand::ArmLoop2 { track: index, take }) {
            self.next_take += 1;
            self.pending = Some((index, take));
            self.tracks[index].state = TrackState::Armed;
            info!(track = index, take, "armed");
            self.settle_transport();
        }
    }

    /// Queue a mute or unmute for the next boundary
    pub fn toggle_mute(&mut self, index: usize) {
        let Some(track) = self.tracks.get_mut(index) else {
            return;
        };
        if track.muted {
            track.unmute_armed = true;
            track.mute_armed = false;
        } else {
            track.mute_armed = true;
            track.unmute_armed = false;
        }
    }

    /// Queue a solo or unsolo for the next boundary
    pub fn toggle_solo(&mut self, index: usize) {
        let soloed = self.solo == Some(index);
        let Some(track) = self.tracks.get_mut(index) else {
            return;
        };
        if soloed {
            track.unsolo_armed = true;
            track.solo_armed = false;
        } else {
            track.solo_armed = true;
            track.unsolo_armed = false;
        }
    }

    pub fn set_volume(&mut self, index: usize, value: f32) {
        if !value.is_finite() {
            return;
        }
        let Some(track) = self.tracks.get_mut(index) else {
            return;
        };
        track.volume = value.max(0.0);
        self.apply_gain(index);
    }

    /// Discard a track immediately.
    pub fn clear_track(&mut self, index: usize) {
        if index >= self.tracks.len() {
            return;
        }

        if self.pending.is_some_and(|(track, _)| track == index) {
            self.post(CaptureCommand::Cancel);
            self.pending = None;
        }

        self.mixer.stop_voice(index);
        self.tracks[index].clear();
        if self.solo == Some(index) {
            self.solo = None;
        }

        if !self.tracks.iter().any(Track::has_buffer) {
            self.playing = false;
        }

        info!(track = index, "track cleared");
        self.apply_all_gains();
        self.settle_transport();
    }

    pub fn play_all(&mut self) {
        if !self.playing {
            self.start_global_playback();
        }
        self.settle_transport();
    }

    /// Stop every voice and abandon any pending take. Idempotent.
    pub fn stop_all(&mut self) {
        if self.capture_pending() {
            self.post(CaptureCommand::Cancel);
            self.pending = None;
        }

        self.mixer.stop_all();
        for track in &mut self.tracks {
            if matches!(track.state, TrackState::Armed | TrackState::Recording) {
                track.state = track.settled_state();
            }
        }
        if self.playing {
            info!("playback stopped");
        }
        self.playing = false;
        self.settle_transport();
    }

    // -- playback --

    fn start_global_playback(&mut self) {
        if self.loop_length.is_none() {
            return;
        }

        self.playing = true;
        for index in 0..self.tracks.len() {
            self.start_track_voice(index);
        }
        info!(voices = self.mixer.active_voices(), "playback started");
    }

    fn start_track_voice(&mut self, index: usize) {
        let Some(buffer) = self.tracks[index].buffer.clone() else {
            return;
        };
        let gain = self.effective_gain(index);
        if let Err(e) = self.mixer.start_voice(index, buffer, gain) {
            warn!(track = index, error = %e, "voice not started");
        }
    }

    fn apply_gain(&self, index: usize) {
        self.mixer.retarget(index, self.effective_gain(index));
    }

    fn apply_all_gains(&self) {
        for index in 0..self.tracks.len() {
            self.apply_gain(index);
        }
    }

    // -- helpers --

    fn post(&mut self, command: CaptureCommand) -> bool {
        match self.link.post(command) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "capture command dropped");
                false
            }
        }
    }

    fn capture_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Whether `take` on `index` is the take still awaited
    fn expects(&self, index: usize, take: TakeId) -> bool {
        self.pending == Some((index, take))
    }

    /// Derive the global phase from track state.
    fn settle_transport(&mut self) {
        let next = if self.tracks[0].state == TrackState::Recording {
            TransportState::RecordingLoop1
        } else if self.tracks.iter().any(|t| t.state == TrackState::Recording) {
            TransportState::RecordingLoop2
        } else if self.tracks.iter().any(|t| t.state == TrackState::Armed) {
            TransportState::RecordingLoop2Pending
        } else if !self.playing {
            TransportState::Idle
        } else if self.tracks[1..].iter().any(Track::has_buffer) {
            TransportState::PlayingAll
        } else {
            TransportState::PlayingLoop1
        };

        if next != self.transport {
            debug!(from = ?self.transport, to = ?next, "transport");
            self.transport = next;
        }
    }

    // -- accessors --

    /// Gain after mute and solo are resolved
    pub fn effective_gain(&self, index: usize) -> f32 {
        let Some(track) = self.tracks.get(index) else {
            return 0.0;
        };
        match self.solo {
            Some(solo) if solo == index => track.volume,
            Some(_) => 0.0,
            None if track.muted => 0.0,
            None => track.volume,
        }
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track_state(&self, index: usize) -> TrackState {
        self.tracks
            .get(index)
            .map(|t| t.state)
            .unwrap_or_default()
    }

    pub fn track_status(&self, index: usize) -> TrackStatus {
        self.tracks
            .get(index)
            .map(|t| t.status(self.solo == Some(index)))
            .unwrap_or(TrackStatus::Empty)
    }

    pub fn has_buffer(&self, index: usize) -> bool {
        self.tracks.get(index).is_some_and(Track::has_buffer)
    }

    pub fn is_muted(&self, index: usize) -> bool {
        self.tracks.get(index).is_some_and(|t| t.muted)
    }

    pub fn is_soloed(&self, index: usize) -> bool {
        self.solo == Some(index)
    }

    pub fn solo_index(&self) -> Option<usize> {
        self.solo
    }

    pub fn mute_armed(&self, index: usize) -> bool {
        self.tracks.get(index).is_some_and(|t| t.mute_armed)
    }

    pub fn unmute_armed(&self, index: usize) -> bool {
        self.tracks.get(index).is_some_and(|t| t.unmute_armed)
    }

    pub fn solo_armed(&self, index: usize) -> bool {
        self.tracks.get(index).is_some_and(|t| t.solo_armed)
    }

    pub fn unsolo_armed(&self, index: usize) -> bool {
        self.tracks.get(index).is_some_and(|t| t.unsolo_armed)
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport
    }

    pub fn loop_length(&self) -> Option<usize> {
        self.loop_length
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Display phase in [0, 1)
    pub fn loop_phase(&self) -> f64 {
        self.clock.phase()
    }

    pub fn loop_phase_at(&self, now: Instant) -> f64 {
        self.clock.phase_at(now)
    }

    /// Loop period in seconds (display period before a master exists)
    pub fn loop_seconds(&self) -> f64 {
        self.clock.period()
    }

    pub fn boundaries(&self) -> u64 {
        self.boundaries
    }

    pub fn quantize(&self) -> QuantizeMode {
        self.quantize
    }

    /// Track and id of the take awaited from the capture engine
    pub fn pending_take(&self) -> Option<(usize, TakeId)> {
        self.pending
    }

    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }
}
