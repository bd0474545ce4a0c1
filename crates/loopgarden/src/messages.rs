//! Messages crossing the realtime boundary
//!
//! The capture callback and the control thread never share mutable state.
//! They talk through one lock-free SPSC queue per direction:
//!
//! ```text
//! Control thread                          Capture callback (RT)
//!       │                                          │
//!       │  CaptureLink::post(CaptureCommand)       │
//!       ├─────────────── rtrb ────────────────────▶│ CapturePort (drained per block)
//!       │                                          │
//!       │◀────────────── rtrb ─────────────────────┤ CaptureEvent (buffers moved, not copied)
//!       │  CaptureLink::try_recv()                 │
//! ```
//!
//! Neither side ever blocks on the other. A full queue rejects the message.

use rtrb::{Consumer, Producer, RingBuffer};

/// Identifies one master or secondary take. The control thread allocates
/// ids and the capture engine echoes them, so events from an abandoned take
/// can be told apart from the current one.
pub type TakeId = u64;

/// Commands posted by the control thread, applied by the capture engine
/// before the first sample of the next block.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureCommand {
    /// Begin free-running master capture. Voids any existing grid.
    StartLoop1 { take: TakeId },
    /// End master capture; a non-empty take defines the loop length.
    StopLoop1,
    /// Record `track` from the next grid origin for exactly one loop.
    ArmLoop2 { track: usize, take: TakeId },
    /// Drop any pending arm and any capture in progress without emitting.
    Cancel,
}

/// Events emitted by the capture engine. Buffers are mono samples at the
/// stream sample rate; ownership moves to the receiver.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// The master loop finished; `length` is the new loop length in samples.
    Loop1Recorded {
        take: TakeId,
        length: usize,
        buffer: Vec<f32>,
    },
    /// An armed track started capturing at grid sample 0.
    Loop2Started { track: usize, take: TakeId },
    /// A secondary track finished; `buffer` holds exactly one loop.
    LoopRecorded {
        track: usize,
        take: TakeId,
        buffer: Vec<f32>,
    },
    /// The grid position wrapped to 0. `cycle` counts wraps since the
    /// current loop length was set, starting at 1.
    Boundary { cycle: u64 },
}

impl CaptureEvent {
    /// Whether the event hands over a recorded buffer
    pub fn carries_buffer(&self) -> bool {
        matches!(
            self,
            CaptureEvent::Loop1Recorded { .. } | CaptureEvent::LoopRecorded { .. }
        )
    }
}

/// A command the capture queue had no room for.
#[derive(Debug, thiserror::Error)]
#[error("capture command queue full, dropped {0:?}")]
pub struct QueueFull(pub CaptureCommand);

/// Control-side endpoint: posts commands, receives events.
pub struct CaptureLink {
    commands: Producer<CaptureCommand>,
    events: Consumer<CaptureEvent>,
}

impl CaptureLink {
    /// Post a command without blocking.
    pub fn post(&mut self, command: CaptureCommand) -> Result<(), QueueFull> {
        self.commands.push(command).map_err(|rtrb::PushError::Full(c)| QueueFull(c))
    }

    /// Take the next pending event, if any.
    pub fn try_recv(&mut self) -> Option<CaptureEvent> {
        self.events.pop().ok()
    }

    /// Number of events waiting to be received.
    pub fn pending_events(&self) -> usize {
        self.events.slots()
    }
}

/// Realtime-side endpoint, owned by the capture engine.
pub struct CapturePort {
    pub(crate) commands: Consumer<CaptureCommand>,
    pub(crate) events: Producer<CaptureEvent>,
}

/// Build both queues and split them into their two endpoints.
pub fn capture_link(command_capacity: usize, event_capacity: usize) -> (CaptureLink, CapturePort) {
    let (command_tx, command_rx) = RingBuffer::new(command_capacity);
    let (event_tx, event_rx) = RingBuffer::new(event_capacity);

    (
        CaptureLink {
            commands: command_tx,
            events: event_rx,
        },
        CapturePort {
            commands: command_rx,
            events: event_tx,
        },
    )
}
