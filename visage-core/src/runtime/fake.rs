//! `FakeRuntime` — deterministic in-process engine double.
//!
//! Reproduces the externally observable behavior the pipeline has to cope
//! with, without any rendering:
//!
//! - audio is buffered and re-emitted in fixed-size frames, so output
//!   duration trails input duration the way a real engine's does;
//! - a sub-frame remainder is **held back** until a `last_chunk = true`
//!   push arrives — the internal-batcher behavior the smart flush exists
//!   to outwit;
//! - `flush()` queues exactly one `end_of_speech` frame, emitted once the
//!   buffer has drained;
//! - `interrupt()` discards everything synchronously.
//!
//! Every call is counted so tests can assert on interaction shape.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::audio::chunk::AudioChunk;
use crate::error::{Result, VisageError};
use crate::runtime::{AvatarRuntime, RenderedFrame, VideoImage};

#[derive(Debug, Clone)]
pub struct FakeRuntimeConfig {
    /// The single input rate the engine accepts.
    pub sample_rate: u32,
    /// Samples per emitted frame (640 = 40 ms at 16 kHz, one 25 fps tick).
    pub frame_samples: usize,
    /// Attach a video image to every audio frame.
    pub emit_video: bool,
    pub video_size: (u32, u32),
}

impl Default for FakeRuntimeConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_samples: 640,
            emit_video: true,
            video_size: (64, 64),
        }
    }
}

#[derive(Default)]
struct Inner {
    pending: VecDeque<i16>,
    /// `last_chunk` seen — the batcher may emit its sub-frame remainder.
    release_remainder: bool,
    /// `flush()` called — emit one `end_of_speech` frame once drained.
    eos_pending: bool,
    closed: bool,
}

pub struct FakeRuntime {
    config: FakeRuntimeConfig,
    inner: Mutex<Inner>,
    notify: Notify,
    pushes: AtomicUsize,
    pushed_samples: AtomicUsize,
    flushes: AtomicUsize,
    interrupts: AtomicUsize,
    fail_pushes: AtomicBool,
    fail_flushes: AtomicBool,
}

impl FakeRuntime {
    pub fn new(config: FakeRuntimeConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            pushes: AtomicUsize::new(0),
            pushed_samples: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
            interrupts: AtomicUsize::new(0),
            fail_pushes: AtomicBool::new(false),
            fail_flushes: AtomicBool::new(false),
        }
    }

    /// End the frame sequence: `next_frame` returns `None` once drained.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_one();
    }

    /// Make subsequent `push_audio` calls fail (undefined-engine-state path).
    pub fn set_fail_pushes(&self, fail: bool) {
        self.fail_pushes.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `flush` calls fail.
    pub fn set_fail_flushes(&self, fail: bool) {
        self.fail_flushes.store(fail, Ordering::SeqCst);
    }

    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    pub fn pushed_samples(&self) -> usize {
        self.pushed_samples.load(Ordering::SeqCst)
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn interrupt_count(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    /// Samples buffered but not yet emitted.
    pub fn buffered_samples(&self) -> usize {
        self.inner.lock().pending.len()
    }

    fn video_frame(&self) -> VideoImage {
        let (width, height) = self.config.video_size;
        VideoImage {
            data: vec![0u8; (width * height * 3) as usize],
            width,
            height,
        }
    }
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new(FakeRuntimeConfig::default())
    }
}

#[async_trait]
impl AvatarRuntime for FakeRuntime {
    async fn push_audio(&self, samples: &[i16], sample_rate: u32, last_chunk: bool) -> Result<()> {
        if self.fail_pushes.load(Ordering::SeqCst) {
            return Err(VisageError::Runtime("push rejected by engine".into()));
        }
        if sample_rate != self.config.sample_rate {
            return Err(VisageError::Runtime(format!(
                "engine expects {} Hz, got {} Hz",
                self.config.sample_rate, sample_rate
            )));
        }

        {
            let mut inner = self.inner.lock();
            inner.pending.extend(samples.iter().copied());
            if last_chunk {
                inner.release_remainder = true;
            }
        }
        self.pushes.fetch_add(1, Ordering::SeqCst);
        self.pushed_samples.fetch_add(samples.len(), Ordering::SeqCst);
        self.notify.notify_one();
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        if self.fail_flushes.load(Ordering::SeqCst) {
            return Err(VisageError::Runtime("flush rejected by engine".into()));
        }
        self.inner.lock().eos_pending = true;
        self.flushes.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
        Ok(())
    }

    fn interrupt(&self) {
        let mut inner = self.inner.lock();
        let discarded = inner.pending.len();
        inner.pending.clear();
        inner.release_remainder = false;
        inner.eos_pending = false;
        drop(inner);
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
        debug!(discarded, "fake runtime interrupted");
    }

    async fn next_frame(&self) -> Option<RenderedFrame> {
        loop {
            {
                let mut inner = self.inner.lock();

                let emit_len = if inner.pending.len() >= self.config.frame_samples {
                    self.config.frame_samples
                } else if inner.release_remainder && !inner.pending.is_empty() {
                    inner.pending.len()
                } else {
                    0
                };

                if emit_len > 0 {
                    let samples: Vec<i16> = inner.pending.drain(..emit_len).collect();
                    if inner.pending.is_empty() {
                        inner.release_remainder = false;
                    }
                    drop(inner);
                    return Some(RenderedFrame {
                        video: self.config.emit_video.then(|| self.video_frame()),
                        audio: Some(AudioChunk::new(samples, self.config.sample_rate)),
                        end_of_speech: false,
                    });
                }

                if inner.eos_pending {
                    // A sub-frame remainder still held by the batcher at
                    // end-of-speech is lost, exactly like the real engine
                    // when nobody sent it a last_chunk kick.
                    let truncated = inner.pending.len();
                    inner.pending.clear();
                    inner.release_remainder = false;
                    inner.eos_pending = false;
                    if truncated > 0 {
                        debug!(truncated, "end of speech truncated buffered remainder");
                    }
                    return Some(RenderedFrame {
                        end_of_speech: true,
                        ..Default::default()
                    });
                }

                if inner.closed {
                    return None;
                }
            }

            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> FakeRuntime {
        FakeRuntime::new(FakeRuntimeConfig {
            frame_samples: 160,
            emit_video: false,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn emits_fixed_size_frames() {
        let runtime = small();
        runtime.push_audio(&[1; 400], 16_000, false).await.unwrap();

        let first = runtime.next_frame().await.unwrap();
        assert_eq!(first.audio.unwrap().samples.len(), 160);
        let second = runtime.next_frame().await.unwrap();
        assert_eq!(second.audio.unwrap().samples.len(), 160);

        // 80 samples remain — below a frame, held back by the batcher
        assert_eq!(runtime.buffered_samples(), 80);
    }

    #[tokio::test]
    async fn remainder_released_only_on_last_chunk() {
        let runtime = small();
        runtime.push_audio(&[1; 100], 16_000, false).await.unwrap();
        assert_eq!(runtime.buffered_samples(), 100);

        runtime.push_audio(&[], 16_000, true).await.unwrap();
        let frame = runtime.next_frame().await.unwrap();
        assert_eq!(frame.audio.unwrap().samples.len(), 100);
        assert_eq!(runtime.buffered_samples(), 0);
    }

    #[tokio::test]
    async fn eos_frame_follows_drain() {
        let runtime = small();
        runtime.push_audio(&[1; 160], 16_000, false).await.unwrap();
        runtime.flush().await.unwrap();

        let audio = runtime.next_frame().await.unwrap();
        assert!(!audio.end_of_speech);
        let eos = runtime.next_frame().await.unwrap();
        assert!(eos.end_of_speech);
        assert!(eos.audio.is_none());
    }

    #[tokio::test]
    async fn interrupt_discards_everything() {
        let runtime = small();
        runtime.push_audio(&[1; 1000], 16_000, false).await.unwrap();
        runtime.flush().await.unwrap();
        runtime.interrupt();

        assert_eq!(runtime.buffered_samples(), 0);
        runtime.close();
        assert!(runtime.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn wrong_rate_is_rejected() {
        let runtime = small();
        let err = runtime.push_audio(&[0; 16], 48_000, false).await;
        assert!(matches!(err, Err(VisageError::Runtime(_))));
    }
}
