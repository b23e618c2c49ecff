//! Rolling timings for the named phases of a simulation step

use super::ring_buffer::RingBuffer;
use std::time::{Duration, Instant};

/// Samples per named phase, kept in first-seen order.
pub struct PhaseProfiler {
    window: usize,
    phases: Vec<(&'static str, RingBuffer<Duration>)>,
}

impl PhaseProfiler {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            phases: Vec::new(),
        }
    }

    pub fn time_phase<F, R>(&mut self, name: &'static str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();
        self.samples_mut(name).push(elapsed);
        result
    }

    pub fn last(&self, name: &str) -> Duration {
        self.samples(name)
            .and_then(RingBuffer::last)
            .unwrap_or(Duration::ZERO)
    }

    pub fn average(&self, name: &str) -> Duration {
        self.samples(name)
            .map(|samples| samples.average())
            .unwrap_or(Duration::ZERO)
    }

    /// Every phase seen so far with its rolling average, in first-seen order.
    pub fn phases(&self) -> impl Iterator<Item = (&'static str, Duration)> + '_ {
        self.phases.iter().map(|(name, samples)| (*name, samples.average()))
    }

    pub fn reset(&mut self) {
        self.phases.clear();
    }

    fn samples(&self, name: &str) -> Option<&RingBuffer<Duration>> {
        self.phases
            .iter()
            .find(|(phase, _)| *phase == name)
            .map(|(_, samples)| samples)
    }

    fn samples_mut(&mut self, name: &'static str) -> &mut RingBuffer<Duration> {
        let idx = match self.phases.iter().position(|(phase, _)| *phase == name) {
            Some(idx) => idx,
            None => {
                self.phases.push((name, RingBuffer::new(self.window)));
                self.phases.len() - 1
            }
        };
        &mut self.phases[idx].1
    }
}

impl Default for PhaseProfiler {
    fn default() -> Self {
        Self::new(60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_keep_first_seen_order() {
        let mut profiler = PhaseProfiler::new(4);
        profiler.time_phase("grid", || ());
        profiler.time_phase("physics", || ());
        profiler.time_phase("grid", || ());

        let names: Vec<_> = profiler.phases().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["grid", "physics"]);
        assert_eq!(profiler.average("missing"), Duration::ZERO);
    }

    #[test]
    fn reset_forgets_phases() {
        let mut profiler = PhaseProfiler::new(4);
        profiler.time_phase("links", || std::thread::sleep(Duration::from_millis(1)));
        assert!(profiler.last("links") >= Duration::from_millis(1));
        assert!(profiler.average("links") >= Duration::from_millis(1));
        profiler.reset();
        assert_eq!(profiler.phases().count(), 0);
    }
}
