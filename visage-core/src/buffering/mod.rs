//! Utterance-side and playout-side buffering.
//!
//! [`segment::SegmentBuffer`] owns the ingest half of an utterance
//! (validate → resample → forward → account). [`playback::PlaybackQueue`]
//! is the clearable playout buffer on the far side of the render loop —
//! the thing barge-in has to empty.

pub mod playback;
pub mod segment;

pub use playback::PlaybackQueue;
pub use segment::SegmentBuffer;
