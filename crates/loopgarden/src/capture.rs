//! Sample-accurate capture engine
//!
//! Runs inside the input callback, one sample at a time. Owns loop-length
//! discovery, the grid position, and arming/starting/stopping of secondary
//! track captures.
//!
//! ```text
//! master take          │■■■■■■■■■■■■│                     (free-running, defines L)
//! grid position        0 1 2 ... L-1 0 1 2 ... L-1 0 1 ...
//! ArmLoop2 arrives                       ▲ (anywhere)
//! secondary take                             │■■■■■■■■■■■■│ (starts at 0, ends at L-1)
//! ```
//!
//! **Key invariant:** a secondary take starts on the sample where the grid
//! wraps to 0 and always holds exactly `L` samples.
//!
//! Nothing here logs or blocks. The only allocations are the amortized growth
//! of the master take and the one-time sizing of a secondary take, both of
//! which reuse a recycled buffer when one is large enough.

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rtrb::PushError;

use crate::messages::{CaptureCommand, CaptureEvent, CapturePort, TakeId};

/// Runtime statistics from the capture callback
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub blocks: AtomicU64,
    pub samples: AtomicU64,
    pub events_emitted: AtomicU64,
    /// Events lost because the control thread fell behind
    pub dropped_events: AtomicU64,
}

/// An in-progress secondary capture
struct SecondaryTake {
    track: usize,
    id: TakeId,
    buffer: Vec<f32>,
}

pub struct CaptureEngine {
    port: CapturePort,
    stats: Arc<CaptureStats>,
    loop_length: Option<usize>,
    position: usize,
    cycle: u64,
    /// Present while the master loop is recording
    master: Option<Vec<f32>>,
    master_take: TakeId,
    /// Track and take id waiting for the next grid origin
    armed: Option<(usize, TakeId)>,
    take: Option<SecondaryTake>,
    /// Largest discarded buffer, reused for the next take
    spare: Vec<f32>,
    master_reserve: usize,
}

impl CaptureEngine {
    /// `master_reserve` frames are reserved up front for a master take.
    pub fn new(port: CapturePort, master_reserve: usize) -> Self {
        Self {
            port,
            stats: Arc::new(CaptureStats::default()),
            loop_length: None,
            position: 0,
            cycle: 0,
            master: None,
            master_take: 0,
            armed: None,
            take: None,
            spare: Vec::new(),
            master_reserve,
        }
    }

    /// Process one block of mono input.
    ///
    /// Pending commands are applied before the first sample of the block.
    pub fn process(&mut self, input: &[f32]) {
        self.drain_commands();

        for &sample in input {
            self.process_sample(sample);
        }

        self.stats.blocks.fetch_add(1, Ordering::Relaxed);
        self.stats
            .samples
            .fetch_add(input.len() as u64, Ordering::Relaxed);
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.port.commands.pop() {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: CaptureCommand) {
        match command {
            CaptureCommand::StartLoop1 { take } => {
                self.armed = None;
                self.master_take = take;
                if let Some(take) = self.take.take() {
                    self.recycle(take.buffer);
                }
                let mut buffer = match self.master.take() {
                    Some(buffer) => buffer,
                    None => self.fresh_buffer(self.master_reserve),
                };
                buffer.clear();
                self.master = Some(buffer);
                self.loop_length = None;
                self.position = 0;
                self.cycle = 0;
            }
            CaptureCommand::StopLoop1 => {
                let Some(buffer) = self.master.take() else {
                    return;
                };
                if buffer.is_empty() {
                    self.recycle(buffer);
                    return;
                }
                let length = buffer.len();
                self.loop_length = Some(length);
                self.position = 0;
                self.cycle = 0;
                self.emit(CaptureEvent::Loop1Recorded {
                    take: self.master_take,
                    length,
                    buffer,
                });
            }
            CaptureCommand::ArmLoop2 { track, take } => {
                if self.loop_length.is_some() && self.armed.is_none() && self.take.is_none() {
                    self.armed = Some((track, take));
                }
            }
            CaptureCommand::Cancel => {
                self.armed = None;
                if let Some(take) = self.take.take() {
                    self.recycle(take.buffer);
                }
                if let Some(buffer) = self.master.take() {
                    self.recycle(buffer);
                }
            }
        }
    }

    fn process_sample(&mut self, sample: f32) {
        if let Some(master) = self.master.as_mut() {
            master.push(sample);
        }

        let Some(length) = self.loop_length else {
            return;
        };

        self.position = (self.position + 1) % length;

        if self.position == 0 {
            self.cycle += 1;
            self.emit(CaptureEvent::Boundary { cycle: self.cycle });

            if let Some((track, id)) = self.armed.take() {
                let buffer = self.fresh_buffer(length);
                self.take = Some(SecondaryTake { track, id, buffer });
                self.emit(CaptureEvent::Loop2Started { track, take: id });
            }
        }

        let finished = match self.take.as_mut() {
            Some(take) => {
                take.buffer.push(sample);
                self.position == length - 1
            }
            None => false,
        };

        if finished {
            if let Some(take) = self.take.take() {
                self.emit(CaptureEvent::LoopRecorded {
                    track: take.track,
                    take: take.id,
                    buffer: take.buffer,
                });
            }
        }
    }

    /// Push an event to the control thread. The last free slot is kept for
    /// events that carry a buffer; a rejected buffer goes back to the spare.
    fn emit(&mut self, event: CaptureEvent) {
        if !event.carries_buffer() && self.port.events.slots() < 2 {
            self.stats.dropped_events.fetch_add(1, Ordering::Relaxed);
            return;
        }

        match self.port.events.push(event) {
            Ok(()) => {
                self.stats.events_emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(PushError::Full(rejected)) => {
                self.stats.dropped_events.fetch_add(1, Ordering::Relaxed);
                match rejected {
                    CaptureEvent::Loop1Recorded { buffer, .. }
                    | CaptureEvent::LoopRecorded { buffer, .. } => self.recycle(buffer),
                    CaptureEvent::Loop2Started { .. } | CaptureEvent::Boundary { .. } => {}
                }
            }
        }
    }

    /// Empty buffer with at least `capacity`, reusing the spare when possible.
    fn fresh_buffer(&mut self, capacity: usize) -> Vec<f32> {
        let mut buffer = mem::take(&mut self.spare);
        buffer.clear();
        buffer.reserve(capacity);
        buffer
    }

    fn recycle(&mut self, buffer: Vec<f32>) {
        if buffer.capacity() > self.spare.capacity() {
            self.spare = buffer;
        }
    }

    /// Get runtime statistics
    pub fn stats(&self) -> &Arc<CaptureStats> {
        &self.stats
    }

    pub fn loop_length(&self) -> Option<usize> {
        self.loop_length
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn armed_track(&self) -> Option<usize> {
        self.armed.map(|(track, _)| track)
    }

    pub fn recording_track(&self) -> Option<usize> {
        self.take.as_ref().map(|t| t.track)
    }

    pub fn is_recording_master(&self) -> bool {
        self.master.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{capture_link, CaptureLink};

    fn engine() -> (CaptureLink, CaptureEngine) {
        let (link, port) = capture_link(16, 64);
        (link, CaptureEngine::new(port, 64))
    }

    /// Feed `count` samples whose values are their global index, starting at `from`
    fn feed_counter(engine: &mut CaptureEngine, from: usize, count: usize, block: usize) -> usize {
        let mut next = from;
        let end = from + count;
        while next < end {
            let n = block.min(end - next);
            let input: Vec<f32> = (next..next + n).map(|i| i as f32).collect();
            engine.process(&input);
            next += n;
        }
        next
    }

    fn drain(link: &mut CaptureLink) -> Vec<CaptureEvent> {
        std::iter::from_fn(|| link.try_recv()).collect()
    }

    fn record_master(link: &mut CaptureLink, engine: &mut CaptureEngine, length: usize) -> usize {
        link.post(CaptureCommand::StartLoop1 { take: 1 }).unwrap();
        let next = feed_counter(engine, 0, length, 4);
        link.post(CaptureCommand::StopLoop1).unwrap();
        engine.process(&[]);
        next
    }

    #[test]
    fn test_master_length_equals_captured_samples() {
        let (mut link, mut engine) = engine();
        record_master(&mut link, &mut engine, 10);

        assert_eq!(engine.loop_length(), Some(10));
        assert_eq!(engine.position(), 0);
        match drain(&mut link).as_slice() {
            [CaptureEvent::Loop1Recorded {
                take,
                length,
                buffer,
            }] => {
                assert_eq!(*take, 1);
                assert_eq!(*length, 10);
                let expected: Vec<f32> = (0..10).map(|i| i as f32).collect();
                assert_eq!(buffer, &expected);
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_stop_with_no_samples_emits_nothing() {
        let (mut link, mut engine) = engine();
        link.post(CaptureCommand::StartLoop1 { take: 1 }).unwrap();
        link.post(CaptureCommand::StopLoop1).unwrap();
        engine.process(&[]);

        assert_eq!(engine.loop_length(), None);
        assert!(!engine.is_recording_master());
        assert!(drain(&mut link).is_empty());
    }

    #[test]
    fn test_empty_stop_keeps_existing_length() {
        let (mut link, mut engine) = engine();
        record_master(&mut link, &mut engine, 6);
        drain(&mut link);

        // Stop without an active take is a no-op
        link.post(CaptureCommand::StopLoop1).unwrap();
        engine.process(&[]);
        assert_eq!(engine.loop_length(), Some(6));
        assert!(drain(&mut link).is_empty());
    }

    #[test]
    fn test_arm_ignored_without_loop_length() {
        let (mut link, mut engine) = engine();
        link.post(CaptureCommand::ArmLoop2 { track: 1, take: 2 }).unwrap();
        engine.process(&[0.0; 8]);

        assert_eq!(engine.armed_track(), None);
        assert!(drain(&mut link).is_empty());
    }

    #[test]
    fn test_second_arm_ignored_while_armed() {
        let (mut link, mut engine) = engine();
        record_master(&mut link, &mut engine, 8);

        link.post(CaptureCommand::ArmLoop2 { track: 1, take: 2 }).unwrap();
        link.post(CaptureCommand::ArmLoop2 { track: 2, take: 3 }).unwrap();
        engine.process(&[]);

        assert_eq!(engine.armed_track(), Some(1));
    }

    #[test]
    fn test_secondary_take_aligned_to_grid() {
        let length = 8;
        let (mut link, mut engine) = engine();
        let mut next = record_master(&mut link, &mut engine, length);
        drain(&mut link);

        // Arm mid-loop
        next = feed_counter(&mut engine, next, 3, 4);
        link.post(CaptureCommand::ArmLoop2 { track: 2, take: 9 }).unwrap();
        feed_counter(&mut engine, next, length * 3, 4);

        let events = drain(&mut link);
        let started = events
            .iter()
            .position(|e| matches!(e, CaptureEvent::Loop2Started { track: 2, take: 9 }))
            .expect("take never started");
        assert!(matches!(events[started - 1], CaptureEvent::Boundary { .. }));

        let buffer = events
            .iter()
            .find_map(|e| match e {
                CaptureEvent::LoopRecorded {
                    track: 2,
                    take: 9,
                    buffer,
                } => Some(buffer.clone()),
                _ => None,
            })
            .expect("take never finished");

        assert_eq!(buffer.len(), length);
        // Grid origin falls on global samples n where n % L == L - 1
        assert_eq!(buffer[0] as usize % length, length - 1);
        for (i, s) in buffer.iter().enumerate() {
            assert_eq!(*s, buffer[0] + i as f32);
        }
        assert_eq!(engine.recording_track(), None);
    }

    #[test]
    fn test_boundary_cycles_count_wraps() {
        let (mut link, mut engine) = engine();
        let next = record_master(&mut link, &mut engine, 4);
        drain(&mut link);

        feed_counter(&mut engine, next, 13, 5);
        let cycles: Vec<u64> = drain(&mut link)
            .into_iter()
            .filter_map(|e| match e {
                CaptureEvent::Boundary { cycle } => Some(cycle),
                _ => None,
            })
            .collect();
        assert_eq!(cycles, vec![1, 2, 3]);
    }

    #[test]
    fn test_single_sample_loop() {
        let (mut link, mut engine) = engine();
        let next = record_master(&mut link, &mut engine, 1);
        link.post(CaptureCommand::ArmLoop2 { track: 1, take: 2 }).unwrap();
        feed_counter(&mut engine, next, 2, 2);

        let recorded = drain(&mut link).into_iter().find_map(|e| match e {
            CaptureEvent::LoopRecorded {
                track,
                take,
                buffer,
            } => Some((track, take, buffer)),
            _ => None,
        });
        assert_eq!(recorded, Some((1, 2, vec![1.0])));
    }

    #[test]
    fn test_restart_master_voids_grid_and_arm() {
        let (mut link, mut engine) = engine();
        record_master(&mut link, &mut engine, 8);
        link.post(CaptureCommand::ArmLoop2 { track: 1, take: 2 }).unwrap();
        engine.process(&[0.0; 2]);
        assert_eq!(engine.armed_track(), Some(1));

        link.post(CaptureCommand::StartLoop1 { take: 3 }).unwrap();
        engine.process(&[0.0; 3]);

        assert_eq!(engine.loop_length(), None);
        assert_eq!(engine.armed_track(), None);
        assert!(engine.is_recording_master());
    }

    #[test]
    fn test_cancel_drops_take_without_emitting() {
        let length = 4;
        let (mut link, mut engine) = engine();
        let next = record_master(&mut link, &mut engine, length);
        link.post(CaptureCommand::ArmLoop2 { track: 3, take: 2 }).unwrap();
        let next = feed_counter(&mut engine, next, length, 1);
        assert_eq!(engine.recording_track(), Some(3));
        drain(&mut link);

        link.post(CaptureCommand::Cancel).unwrap();
        feed_counter(&mut engine, next, length * 2, 1);

        assert_eq!(engine.recording_track(), None);
        assert_eq!(engine.loop_length(), Some(length));
        assert!(drain(&mut link)
            .iter()
            .all(|e| matches!(e, CaptureEvent::Boundary { .. })));
    }

    #[test]
    fn test_full_event_queue_counts_drops() {
        let (mut link, port) = capture_link(4, 1);
        let mut engine = CaptureEngine::new(port, 16);
        link.post(CaptureCommand::StartLoop1 { take: 1 }).unwrap();
        engine.process(&[0.0; 2]);
        link.post(CaptureCommand::StopLoop1).unwrap();
        engine.process(&[0.0; 4]);

        // Loop1Recorded fills the only slot; boundaries are dropped
        assert_eq!(engine.stats().events_emitted.load(Ordering::Relaxed), 1);
        assert_eq!(engine.stats().dropped_events.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_short_loop_keeps_slot_for_take() {
        // Two slots: the unread master fills one, so boundaries are shed
        // and the finished take still gets through.
        let length = 4;
        let (mut link, port) = capture_link(4, 2);
        let mut engine = CaptureEngine::new(port, 16);
        let next = record_master(&mut link, &mut engine, length);
        link.post(CaptureCommand::ArmLoop2 { track: 1, take: 5 }).unwrap();
        feed_counter(&mut engine, next, length * 3, 1);

        let events = drain(&mut link);
        assert!(matches!(events[0], CaptureEvent::Loop1Recorded { .. }));
        match &events[1..] {
            [CaptureEvent::LoopRecorded {
                track: 1,
                take: 5,
                buffer,
            }] => assert_eq!(buffer.len(), length),
            other => panic!("unexpected events: {:?}", other),
        }
        assert!(engine.stats().dropped_events.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn test_rejected_take_returns_to_spare() {
        let length = 6;
        let (mut link, port) = capture_link(4, 1);
        let mut engine = CaptureEngine::new(port, 16);
        let next = record_master(&mut link, &mut engine, length);
        link.post(CaptureCommand::ArmLoop2 { track: 2, take: 2 }).unwrap();
        feed_counter(&mut engine, next, length * 3, 2);

        assert_eq!(engine.recording_track(), None);
        assert!(engine.spare.capacity() >= length);
        assert_eq!(engine.stats().events_emitted.load(Ordering::Relaxed), 1);

        // Only the master made it out
        let events = drain(&mut link);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], CaptureEvent::Loop1Recorded { .. }));
    }
}
