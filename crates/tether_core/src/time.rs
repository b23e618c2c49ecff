//! Simulation clock
//!
//! Counts solver frames and the simulated time they covered. Frames are
//! variable length: each `update` advances by the host's `dt`.

use std::time::Duration;

pub struct SimulationClock {
    frame_count: u64,
    elapsed: Duration,
    last_dt: f32,
}

impl SimulationClock {
    pub fn new() -> Self {
        Self {
            frame_count: 0,
            elapsed: Duration::ZERO,
            last_dt: 0.0,
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Negative or non-finite steps count as a frame but add no time.
    pub fn advance(&mut self, dt: f32) {
        self.frame_count += 1;
        self.last_dt = dt;
        if dt.is_finite() && dt > 0.0 {
            self.elapsed += Duration::from_secs_f32(dt);
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn last_dt(&self) -> f32 {
        self.last_dt
    }
}

impl Default for SimulationClock {
    fn default() -> Self {
        Self::new()
    }
}
