//! Input/output duration accounting for completion detection.
//!
//! The rendering engine gives no ground truth for "all speech has been
//! rendered", so the pipeline infers it: the ingest task counts how much
//! audio went in, the render loop counts how much came back out, and the
//! ratio between the two is the completion proxy the flush scheduler polls.
//!
//! The two counters have genuinely independent concurrent writers (ingest
//! task and render loop), hence atomics. Durations are stored as integer
//! microseconds so `fetch_add` stays lock-free.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic input/output duration counters for the current utterance.
#[derive(Debug, Default)]
pub struct CompletionTracker {
    input_us: AtomicU64,
    output_us: AtomicU64,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record audio forwarded to the rendering engine, in seconds.
    ///
    /// Negative or non-finite durations are ignored — the counters are
    /// monotonic by contract.
    pub fn record_input(&self, secs: f64) {
        if let Some(us) = to_micros(secs) {
            self.input_us.fetch_add(us, Ordering::Relaxed);
        }
    }

    /// Record audio emitted by the rendering engine, in seconds.
    pub fn record_output(&self, secs: f64) {
        if let Some(us) = to_micros(secs) {
            self.output_us.fetch_add(us, Ordering::Relaxed);
        }
    }

    /// Total input duration in seconds.
    pub fn input_duration(&self) -> f64 {
        self.input_us.load(Ordering::Relaxed) as f64 / 1e6
    }

    /// Total output duration in seconds.
    pub fn output_duration(&self) -> f64 {
        self.output_us.load(Ordering::Relaxed) as f64 / 1e6
    }

    /// Completion ratio: output / input, or 0.0 when no input is tracked.
    pub fn ratio(&self) -> f64 {
        let input = self.input_us.load(Ordering::Relaxed);
        if input == 0 {
            return 0.0;
        }
        self.output_us.load(Ordering::Relaxed) as f64 / input as f64
    }

    /// Reset both counters to zero (new utterance, or interrupt).
    pub fn reset(&self) {
        self.input_us.store(0, Ordering::Relaxed);
        self.output_us.store(0, Ordering::Relaxed);
    }
}

fn to_micros(secs: f64) -> Option<u64> {
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    Some((secs * 1e6).round() as u64)
}
