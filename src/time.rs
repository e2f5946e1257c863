//! Frame timing
//!
//! - [`FrameClock`] measures wall time between presented frames, clamped
//! - [`FixedTimestep`] turns that elapsed time into whole simulation quanta

use std::time::{Duration, Instant};

/// Frame timing snapshot
#[derive(Debug, Copy, Clone)]
pub struct FrameTime {
    /// Time elapsed since the previous tick, clamped
    pub dt: Duration,
    pub now: Instant,
    pub frame_index: u64,
}

/// Produces [`FrameTime`] snapshots, one per presented frame.
///
/// Delta time is clamped so a stall (debugger, minimized window) does not
/// turn into one huge step.
#[derive(Debug, Clone)]
pub struct FrameClock {
    last: Instant,
    frame_index: u64,
    dt_min: Duration,
    dt_max: Duration,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::with_clamps(Duration::from_micros(100), Duration::from_millis(250))
    }

    pub fn with_clamps(dt_min: Duration, dt_max: Duration) -> Self {
        debug_assert!(dt_min <= dt_max);
        Self {
            last: Instant::now(),
            frame_index: 0,
            dt_min,
            dt_max,
        }
    }

    /// Restart measuring from now, e.g. after the window was restored
    pub fn reset(&mut self) {
        self.last = Instant::now();
    }

    pub fn tick(&mut self) -> FrameTime {
        self.tick_at(Instant::now())
    }

    /// Advance to `now`, which must not precede the previous tick
    pub fn tick_at(&mut self, now: Instant) -> FrameTime {
        let dt = now
            .saturating_duration_since(self.last)
            .clamp(self.dt_min, self.dt_max);
        self.last = now;

        let time = FrameTime {
            dt,
            now,
            frame_index: self.frame_index,
        };
        self.frame_index = self.frame_index.wrapping_add(1);
        time
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Quanta to run for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepPlan {
    pub steps: u32,
    /// Accumulated time thrown away because catch-up hit the step limit
    pub dropped: Duration,
}

/// Fixed-step accumulator with bounded catch-up
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    step: Duration,
    max_steps: u32,
    accumulator: Duration,
}

impl FixedTimestep {
    pub fn new(step: Duration, max_steps: u32) -> Self {
        Self {
            step: step.max(Duration::from_micros(1)),
            max_steps: max_steps.max(1),
            accumulator: Duration::ZERO,
        }
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Add `elapsed` and take out as many whole quanta as allowed.
    ///
    /// At most `max_steps` quanta run; beyond that everything except the
    /// sub-quantum remainder is dropped.
    pub fn advance(&mut self, elapsed: Duration) -> StepPlan {
        self.accumulator += elapsed;
        let step = self.step.as_nanos();
        let available = self.accumulator.as_nanos() / step;
        let steps = available.min(self.max_steps as u128) as u32;
        self.accumulator -= self.step * steps;

        let mut dropped = Duration::ZERO;
        if available > steps as u128 {
            let remainder = Duration::from_nanos((self.accumulator.as_nanos() % step) as u64);
            dropped = self.accumulator - remainder;
            self.accumulator = remainder;
            log::warn!(
                "Simulation fell behind: {} steps run, {:.1} ms dropped",
                steps,
                dropped.as_secs_f64() * 1000.0
            );
        }
        StepPlan { steps, dropped }
    }

    /// Fraction of a quantum left in the accumulator, in `[0, 1)`
    pub fn alpha(&self) -> f32 {
        (self.accumulator.as_secs_f64() / self.step.as_secs_f64()) as f32
    }
}
