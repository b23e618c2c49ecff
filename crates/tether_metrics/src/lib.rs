//! Tether Metrics - frame and phase timing for the solver
//!
//! Timing collapses to zero-cost stubs unless the `metrics` feature is on,
//! so the solver can call into it unconditionally.
//!
//! # Feature Flags
//!
//! - `metrics` - Enable timing collection (default: disabled)
//!
//! # Usage
//!
//! ```ignore
//! use tether_metrics::PhaseProfiler;
//!
//! let mut profiler = PhaseProfiler::new(120);
//! profiler.time_phase("grid", || build_grid());
//! println!("grid: {:?}", profiler.average("grid"));
//! ```

#[cfg(feature = "metrics")]
mod frame_timer;
#[cfg(feature = "metrics")]
mod phase_profiler;
#[cfg(feature = "metrics")]
mod ring_buffer;

#[cfg(feature = "metrics")]
pub use frame_timer::FrameTimer;
#[cfg(feature = "metrics")]
pub use phase_profiler::PhaseProfiler;
#[cfg(feature = "metrics")]
pub use ring_buffer::RingBuffer;

// ============================================================================
// No-op stubs when metrics disabled
// ============================================================================

#[cfg(not(feature = "metrics"))]
pub struct FrameTimer;

#[cfg(not(feature = "metrics"))]
impl FrameTimer {
    pub fn new(_window: usize) -> Self { Self }
    pub fn begin(&mut self) {}
    pub fn end(&mut self) {}
    pub fn frames(&self) -> u64 { 0 }
    pub fn fps(&self) -> f64 { 0.0 }
    pub fn frame_time_ms(&self) -> f64 { 0.0 }
    pub fn frame_time_range_ms(&self) -> (f64, f64) { (0.0, 0.0) }
}

#[cfg(not(feature = "metrics"))]
pub struct PhaseProfiler;

#[cfg(not(feature = "metrics"))]
impl PhaseProfiler {
    pub fn new(_window: usize) -> Self { Self }
    pub fn time_phase<F, R>(&mut self, _name: &'static str, f: F) -> R where F: FnOnce() -> R { f() }
    pub fn last(&self, _name: &str) -> std::time::Duration { std::time::Duration::ZERO }
    pub fn average(&self, _name: &str) -> std::time::Duration { std::time::Duration::ZERO }
    pub fn phases(&self) -> impl Iterator<Item = (&'static str, std::time::Duration)> { std::iter::empty() }
    pub fn reset(&mut self) {}
}
