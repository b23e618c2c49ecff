//! Fixed-window sample buffer for rolling averages

use std::time::Duration;

pub struct RingBuffer<T> {
    samples: Vec<T>,
    window: usize,
    cursor: usize,
}

impl<T: Copy> RingBuffer<T> {
    /// A window of zero is bumped to one so `push` always has a slot.
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            samples: Vec::with_capacity(window),
            window,
            cursor: 0,
        }
    }

    pub fn push(&mut self, sample: T) {
        if self.samples.len() < self.window {
            self.samples.push(sample);
        } else {
            self.samples[self.cursor] = sample;
        }
        self.cursor = (self.cursor + 1) % self.window;
    }

    /// Most recently pushed sample.
    pub fn last(&self) -> Option<T> {
        if self.samples.is_empty() {
            return None;
        }
        let idx = (self.cursor + self.window - 1) % self.window;
        self.samples.get(idx).copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.cursor = 0;
    }
}

impl RingBuffer<Duration> {
    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let sum: Duration = self.samples.iter().sum();
        sum / self.samples.len() as u32
    }

    pub fn min_max(&self) -> (Duration, Duration) {
        let mut iter = self.samples.iter().copied();
        let Some(first) = iter.next() else {
            return (Duration::ZERO, Duration::ZERO);
        };
        iter.fold((first, first), |(lo, hi), s| (lo.min(s), hi.max(s)))
    }
}

impl RingBuffer<f64> {
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }
}
