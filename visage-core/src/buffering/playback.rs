//! Clearable downstream audio buffer.
//!
//! Rendered audio lands here before the host's playout path (sound device
//! callback, track writer, …) pulls it at its own pace. Barge-in empties
//! the queue so already-rendered speech from a cancelled utterance never
//! reaches the speaker.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Default)]
struct QueueInner {
    buffer: VecDeque<i16>,
    /// Total samples pulled since the last clear — playout position.
    consumed: u64,
}

/// Shared audio playout queue. Cheap to clone; all clones view one buffer.
#[derive(Clone, Default)]
pub struct PlaybackQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_samples(&self, samples: &[i16]) {
        self.inner.lock().buffer.extend(samples.iter().copied());
    }

    /// Pull exactly `count` samples, zero-padding when underfull so a
    /// playout callback never starves.
    pub fn pull_samples(&self, count: usize) -> Vec<i16> {
        let mut inner = self.inner.lock();
        let available = inner.buffer.len().min(count);
        let mut samples: Vec<i16> = inner.buffer.drain(..available).collect();
        inner.consumed += available as u64;
        samples.resize(count, 0);
        samples
    }

    /// Drop everything queued and reset the playout position.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.buffer.clear();
        inner.consumed = 0;
    }

    pub fn queued_samples(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    pub fn queued_secs(&self, sample_rate: u32) -> f64 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.queued_samples() as f64 / sample_rate as f64
    }

    /// Playout position in seconds (samples consumed since the last clear).
    pub fn position_secs(&self, sample_rate: u32) -> f64 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.inner.lock().consumed as f64 / sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().buffer.is_empty()
    }
}
