//! Rendering-engine abstraction.
//!
//! The engine that turns speech audio into lip-synced video is an opaque,
//! externally supplied component with unknown and variable internal
//! latency. The `AvatarRuntime` trait is the whole of what the pipeline
//! assumes about it:
//!
//! - `push_audio` / `flush` suspend the caller only for engine-internal
//!   enqueueing, never for render latency;
//! - `interrupt` takes effect synchronously — the discard is visible to the
//!   next produced frame;
//! - `next_frame` is the session-lifetime frame sequence. It ends (returns
//!   `None`) only when the engine shuts down; restarting mid-utterance is
//!   not a thing — build a new runtime instead.
//!
//! If `push_audio` or `flush` fail, the engine's internal state is
//! undefined: the pipeline treats that as fatal for the current utterance
//! and never retries silently.

pub mod channel;
pub mod fake;

pub use channel::{ChannelRuntime, RuntimeCommand};
pub use fake::{FakeRuntime, FakeRuntimeConfig};

use std::sync::Arc;

use async_trait::async_trait;

use crate::audio::chunk::AudioChunk;
use crate::error::Result;

/// A rendered video image (BGR24, row-major).
#[derive(Debug, Clone)]
pub struct VideoImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// One frame produced by the rendering engine.
///
/// Any combination of fields may be present: video only, audio only, both,
/// or neither. `end_of_speech` marks the frame on which the engine
/// considers the last flushed utterance finished — the engine is observed
/// to keep emitting frames after it, so consumers must not treat it as a
/// terminator.
#[derive(Debug, Clone, Default)]
pub struct RenderedFrame {
    pub video: Option<VideoImage>,
    pub audio: Option<AudioChunk>,
    pub end_of_speech: bool,
}

/// Contract for rendering-engine adapters.
#[async_trait]
pub trait AvatarRuntime: Send + Sync + 'static {
    /// Enqueue speech audio for rendering.
    ///
    /// `last_chunk = true` tells the engine's internal batcher to emit any
    /// sub-batch remainder it is holding back.
    async fn push_audio(&self, samples: &[i16], sample_rate: u32, last_chunk: bool) -> Result<()>;

    /// Signal that no more audio is coming for this utterance; the engine
    /// drains its buffers and marks the final frame with `end_of_speech`.
    async fn flush(&self) -> Result<()>;

    /// Discard all buffered and in-flight state immediately.
    fn interrupt(&self);

    /// Await the next rendered frame. `None` means the engine has shut
    /// down and no further frames will ever arrive.
    async fn next_frame(&self) -> Option<RenderedFrame>;
}

/// Thread-safe reference-counted handle to any `AvatarRuntime` implementor.
///
/// Cheap to clone; every pipeline task holds one.
#[derive(Clone)]
pub struct RuntimeHandle(pub Arc<dyn AvatarRuntime>);

impl RuntimeHandle {
    /// Wrap any `AvatarRuntime` in a `RuntimeHandle`.
    pub fn new<R: AvatarRuntime>(runtime: R) -> Self {
        Self(Arc::new(runtime))
    }
}

impl std::fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHandle").finish_non_exhaustive()
    }
}
