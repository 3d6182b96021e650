//! # visage-core
//!
//! Reusable speech-to-avatar synchronization pipeline SDK.
//!
//! ## Architecture
//!
//! ```text
//! speech source ─► VisageEngine::push_audio ─► SegmentBuffer (resample, account)
//!                                                   │
//!                                        AvatarRuntime::push_audio
//!                                                   │  (opaque render latency)
//!                                        render loop drains frames
//!                                           │               │
//!                                   CompletionTracker   FrameEvent broadcast
//!                                           │               + PlaybackQueue
//!                                    flush scheduler
//!                                  (smart end-of-speech)
//! ```
//!
//! The rendering engine is an externally supplied black box that batches
//! audio internally and offers no completion signal; this crate supplies
//! the part every integration otherwise reinvents: duration-ratio
//! completion detection, cancellable deferred flushing, barge-in discard,
//! and fixed-rate frame delivery — behind a four-method runtime trait with
//! a deterministic fake for testing.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod events;
pub mod runtime;
pub mod tracking;

// Convenience re-exports for downstream crates
pub use audio::chunk::AudioChunk;
pub use buffering::PlaybackQueue;
pub use engine::{CompletionSnapshot, PipelineConfig, VisageEngine};
pub use error::VisageError;
pub use events::{FrameEvent, PipelineState, PipelineStatusEvent};
pub use runtime::{
    AvatarRuntime, ChannelRuntime, FakeRuntime, FakeRuntimeConfig, RenderedFrame, RuntimeCommand,
    RuntimeHandle, VideoImage,
};
pub use tracking::CompletionTracker;
