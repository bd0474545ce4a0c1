//! Wall-clock loop phase for display and polled quantization
//!
//! The capture engine knows the exact grid position, but the control thread
//! only needs an approximate phase to draw a playhead. `LoopClock` derives it
//! from a monotonic anchor that is re-set whenever the control thread learns
//! of a real boundary.
//!
//! `BoundaryDetector` reproduces the polled crossing test: a boundary is seen
//! when the previous sampled phase was near 1 and the new one is near 0.

use std::time::Instant;

/// Monotonic clock that tracks phase within a loop
#[derive(Debug, Clone)]
pub struct LoopClock {
    /// Instant of the last known grid origin
    anchor: Instant,
    /// Loop period in seconds, always positive
    period: f64,
}

impl LoopClock {
    pub fn new(period: f64, now: Instant) -> Self {
        Self {
            anchor: now,
            period: sanitize_period(period),
        }
    }

    /// Phase in [0, 1) at `now`
    pub fn phase_at(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.anchor).as_secs_f64();
        let phase = (elapsed / self.period).fract();
        if phase.is_finite() {
            phase
        } else {
            0.0
        }
    }

    /// Phase at the current instant
    pub fn phase(&self) -> f64 {
        self.phase_at(Instant::now())
    }

    /// Mark `now` as a grid origin
    pub fn reset_at(&mut self, now: Instant) {
        self.anchor = now;
    }

    pub fn set_period(&mut self, period: f64) {
        self.period = sanitize_period(period);
    }

    /// Loop period in seconds
    pub fn period(&self) -> f64 {
        self.period
    }

    pub fn anchor(&self) -> Instant {
        self.anchor
    }
}

fn sanitize_period(period: f64) -> f64 {
    if period.is_finite() && period > 0.0 {
        period
    } else {
        1.0
    }
}

/// Detects a wrap in a sequence of sampled phases
#[derive(Debug, Clone)]
pub struct BoundaryDetector {
    last: f64,
    high: f64,
    low: f64,
}

impl BoundaryDetector {
    pub fn new(high: f64, low: f64) -> Self {
        Self {
            last: 0.0,
            high,
            low,
        }
    }

    /// Feed the next sampled phase; true if it crossed the loop boundary.
    pub fn crossed(&mut self, phase: f64) -> bool {
        let crossed = self.last > self.high && phase < self.low;
        self.last = phase;
        crossed
    }

    /// Forget the previous sample, e.g. after the loop was re-anchored
    pub fn reset(&mut self) {
        self.last = 0.0;
    }
}

impl Default for BoundaryDetector {
    fn default() -> Self {
        Self::new(0.95, 0.05)
    }
}
