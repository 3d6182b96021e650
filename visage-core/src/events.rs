//! Events published by the pipeline to its owning session.
//!
//! Status events are serde-serializable so hosts can forward them over
//! whatever control channel they use (WebSocket, IPC, room data messages).
//! Frame events carry raw media and stay in-process, Arc-wrapped so
//! broadcast fan-out never copies pixel buffers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audio::chunk::AudioChunk;
use crate::runtime::VideoImage;

/// Current state of the synchronization pipeline.
///
/// Exactly one controller owns this state; transitions are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    /// No utterance in flight.
    Idle,
    /// Accepting audio; no flush scheduled.
    Active,
    /// Speech ended; flush scheduled but not yet acknowledged.
    Draining,
    /// Barge-in discard in progress.
    Interrupted,
}

/// Broadcast on every pipeline state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatusEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    pub state: PipelineState,
    /// Optional human-readable detail (e.g. error message on a fatal reset).
    pub detail: Option<String>,
}

/// Media forwarded to the downstream sink by the render loop.
///
/// Video and audio arrive in engine production order; neither is ever
/// reordered or dropped.
#[derive(Debug, Clone)]
pub enum FrameEvent {
    /// A rendered video image, paced to the configured frame rate.
    Video(Arc<VideoImage>),
    /// A rendered audio chunk at the engine's output rate.
    Audio(Arc<AudioChunk>),
    /// The engine finished emitting frames for the last flushed utterance.
    ///
    /// Informational: the engine may keep producing frames afterwards.
    SpeechCompleted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_with_camel_case_and_lowercase_state() {
        let event = PipelineStatusEvent {
            seq: 7,
            state: PipelineState::Draining,
            detail: Some("flush scheduled".into()),
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["seq"], 7);
        assert_eq!(json["state"], "draining");
        assert_eq!(json["detail"], "flush scheduled");

        let round_trip: PipelineStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.seq, 7);
        assert_eq!(round_trip.state, PipelineState::Draining);
        assert_eq!(round_trip.detail.as_deref(), Some("flush scheduled"));
    }

    #[test]
    fn pipeline_state_rejects_non_lowercase_values() {
        let err = serde_json::from_str::<PipelineState>(r#""Idle""#);
        assert!(err.is_err(), "expected invalid casing to fail");
    }

    #[test]
    fn all_states_have_distinct_tags() {
        let tags: Vec<String> = [
            PipelineState::Idle,
            PipelineState::Active,
            PipelineState::Draining,
            PipelineState::Interrupted,
        ]
        .iter()
        .map(|s| serde_json::to_string(s).unwrap())
        .collect();
        assert_eq!(tags, ["\"idle\"", "\"active\"", "\"draining\"", "\"interrupted\""]);
    }
}
