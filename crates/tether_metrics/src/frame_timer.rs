//! Wall-clock time per solver frame, averaged over a sliding window.

use super::ring_buffer::RingBuffer;
use std::time::{Duration, Instant};

pub struct FrameTimer {
    started: Option<Instant>,
    samples: RingBuffer<Duration>,
    frames: u64,
}

impl FrameTimer {
    pub fn new(window: usize) -> Self {
        Self {
            started: None,
            samples: RingBuffer::new(window),
            frames: 0,
        }
    }

    pub fn begin(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Closes the frame opened by `begin`; a stray `end` records nothing.
    pub fn end(&mut self) {
        if let Some(started) = self.started.take() {
            self.samples.push(started.elapsed());
            self.frames += 1;
        }
    }

    /// Frames recorded since creation.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn fps(&self) -> f64 {
        let average = self.samples.average().as_secs_f64();
        if average > 0.0 {
            average.recip()
        } else {
            0.0
        }
    }

    pub fn frame_time_ms(&self) -> f64 {
        to_ms(self.samples.average())
    }

    pub fn frame_time_range_ms(&self) -> (f64, f64) {
        let (min, max) = self.samples.min_max();
        (to_ms(min), to_ms(max))
    }
}

fn to_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
