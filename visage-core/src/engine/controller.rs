//! Pipeline state machine.
//!
//! ## Design
//!
//! Transitions are a pure function of `(state, input)` — no clocks, no
//! channels, no engine — returning the next state plus a static action
//! list. A single event-loop task executes those actions, which serializes
//! every transition: there is exactly one writer of pipeline state, and
//! entry points merely enqueue events.
//!
//! ```text
//! Idle ──audio──► Active ──speech-end──► Draining ──flush-done──► Idle
//!                  ▲                        │
//!                  └────────audio───────────┘        (flush cancelled)
//!
//! any ──interrupt──► Interrupted ──► Idle
//! ```
//!
//! Utterances carry a generation number; a flush notification from a
//! cancelled predecessor is recognised by its stale generation and ignored.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::chunk::AudioChunk;
use crate::buffering::SegmentBuffer;
use crate::engine::flush::{FlushOutcome, FlushTask};
use crate::engine::{interrupt, Shared};
use crate::error::VisageError;
use crate::events::PipelineState;

/// Events fed to the controller loop, in arrival order.
#[derive(Debug)]
pub(crate) enum ControlEvent {
    Audio(AudioChunk),
    SpeechEnd,
    Interrupt,
    FlushFinished {
        generation: u64,
        outcome: FlushOutcome,
    },
}

/// State-machine input: the event stripped of payloads, plus the one piece
/// of runtime context a transition depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Input {
    Audio,
    SpeechEnd { has_input: bool },
    Interrupt,
    FlushFinished,
}

/// Side effects a transition requests, executed in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    /// New utterance: bump generation, reset counters, open a segment.
    OpenUtterance,
    /// Ingest the event's audio chunk into the open segment.
    ForwardChunk,
    /// Cancel the pending flush task and await its termination.
    CancelFlush,
    /// Drain the segment tail and spawn a flush task.
    ScheduleFlush,
    /// Drop per-utterance state.
    CloseUtterance,
    /// Run the barge-in discard sequence.
    RunInterrupt,
    /// Drop an audio chunk that cannot be attributed to any utterance.
    DiscardChunk,
}

/// The pure transition function. Total over `(state, input)`.
pub(crate) fn transition(state: PipelineState, input: Input) -> (PipelineState, &'static [Action]) {
    use Action::*;
    use PipelineState::*;

    match (state, input) {
        (Idle, Input::Audio) => (Active, &[OpenUtterance, ForwardChunk]),
        (Active, Input::Audio) => (Active, &[ForwardChunk]),
        // The common multi-burst case: synthesis resumed before the flush
        // landed, so the utterance continues.
        (Draining, Input::Audio) => (Active, &[CancelFlush, ForwardChunk]),
        (Interrupted, Input::Audio) => (Interrupted, &[DiscardChunk]),

        (Active, Input::SpeechEnd { has_input: true }) => (Draining, &[ScheduleFlush]),
        // Zero-input utterance: no flush call to the engine, straight home.
        (Active, Input::SpeechEnd { has_input: false }) => (Idle, &[CloseUtterance]),
        (state, Input::SpeechEnd { .. }) => (state, &[]),

        (_, Input::Interrupt) => (Interrupted, &[RunInterrupt]),

        (Draining, Input::FlushFinished) => (Idle, &[CloseUtterance]),
        (state, Input::FlushFinished) => (state, &[]),
    }
}

enum ExecOutcome {
    Continue,
    /// Short-circuit with a different final state (and optional detail).
    Override {
        state: PipelineState,
        detail: Option<String>,
    },
}

pub(crate) struct ControllerTask {
    shared: Arc<Shared>,
    events_tx: mpsc::UnboundedSender<ControlEvent>,
    rx: mpsc::UnboundedReceiver<ControlEvent>,
    session: CancellationToken,
    state: PipelineState,
    generation: u64,
    segment: Option<SegmentBuffer>,
    flush: Option<FlushTask>,
}

pub(crate) fn spawn(
    shared: Arc<Shared>,
    session: CancellationToken,
) -> (mpsc::UnboundedSender<ControlEvent>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = ControllerTask {
        shared,
        events_tx: tx.clone(),
        rx,
        session,
        state: PipelineState::Idle,
        generation: 0,
        segment: None,
        flush: None,
    };
    let handle = tokio::spawn(task.run());
    (tx, handle)
}

impl ControllerTask {
    async fn run(mut self) {
        debug!("pipeline controller started");
        loop {
            let event = tokio::select! {
                _ = self.session.cancelled() => break,
                event = self.rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle(event).await;
        }
        if let Some(flush) = self.flush.take() {
            flush.cancel().await;
        }
        debug!("pipeline controller stopped");
    }

    async fn handle(&mut self, event: ControlEvent) {
        // A flush notification from a cancelled predecessor carries a stale
        // generation and must not close the current utterance.
        if let ControlEvent::FlushFinished { generation, .. } = &event {
            if *generation != self.generation {
                debug!(
                    stale = *generation,
                    current = self.generation,
                    "stale flush notification ignored"
                );
                return;
            }
        }

        let input = self.classify(&event);
        let (next, actions) = transition(self.state, input);

        // Make the discard observable before it runs.
        if next == PipelineState::Interrupted && self.state != PipelineState::Interrupted {
            self.set_state(PipelineState::Interrupted, None);
        }

        let mut final_state = next;
        let mut detail = match &event {
            ControlEvent::FlushFinished { outcome, .. } => log_flush_outcome(outcome),
            _ => None,
        };

        for &action in actions {
            match self.execute(action, &event).await {
                Ok(ExecOutcome::Continue) => {}
                Ok(ExecOutcome::Override { state, detail: d }) => {
                    final_state = state;
                    if d.is_some() {
                        detail = d;
                    }
                    break;
                }
                Err(e) => {
                    self.fatal_reset(e).await;
                    return;
                }
            }
        }

        // Barge-in settles as soon as the discard sequence completes.
        if final_state == PipelineState::Interrupted {
            final_state = PipelineState::Idle;
        }
        self.set_state(final_state, detail);
    }

    fn classify(&self, event: &ControlEvent) -> Input {
        match event {
            ControlEvent::Audio(_) => Input::Audio,
            ControlEvent::SpeechEnd => Input::SpeechEnd {
                has_input: self.utterance_has_audio(),
            },
            ControlEvent::Interrupt => Input::Interrupt,
            ControlEvent::FlushFinished { .. } => Input::FlushFinished,
        }
    }

    fn utterance_has_audio(&self) -> bool {
        self.shared.tracker.input_duration() > 0.0
            || self.segment.as_ref().is_some_and(|s| s.has_pending())
    }

    async fn execute(
        &mut self,
        action: Action,
        event: &ControlEvent,
    ) -> Result<ExecOutcome, VisageError> {
        match action {
            Action::OpenUtterance => {
                self.generation += 1;
                self.shared.tracker.reset();
                self.segment = Some(SegmentBuffer::new(
                    self.shared.runtime.clone(),
                    Arc::clone(&self.shared.tracker),
                    self.shared.config.input_sample_rate,
                ));
                info!(generation = self.generation, "utterance started");
                Ok(ExecOutcome::Continue)
            }

            Action::ForwardChunk => {
                let ControlEvent::Audio(chunk) = event else {
                    return Ok(ExecOutcome::Continue);
                };
                let Some(segment) = self.segment.as_mut() else {
                    warn!("audio chunk with no open utterance, dropping");
                    return Ok(ExecOutcome::Continue);
                };
                match segment.ingest(chunk).await {
                    Ok(()) => Ok(ExecOutcome::Continue),
                    Err(VisageError::InvalidAudioInput(reason)) => {
                        warn!(%reason, "invalid audio chunk dropped");
                        Ok(ExecOutcome::Continue)
                    }
                    Err(e) => Err(e),
                }
            }

            Action::CancelFlush => {
                if let Some(flush) = self.flush.take() {
                    flush.cancel().await;
                    debug!(
                        generation = self.generation,
                        "pending flush cancelled, utterance resumed"
                    );
                }
                Ok(ExecOutcome::Continue)
            }

            Action::ScheduleFlush => {
                if let Some(segment) = self.segment.as_mut() {
                    segment.finish().await?;
                }
                if self.shared.tracker.input_duration() <= 0.0 {
                    debug!("speech ended with no forwarded audio, nothing to flush");
                    self.segment = None;
                    return Ok(ExecOutcome::Override {
                        state: PipelineState::Idle,
                        detail: None,
                    });
                }
                self.flush = Some(FlushTask::spawn(
                    Arc::clone(&self.shared),
                    self.generation,
                    self.events_tx.clone(),
                ));
                Ok(ExecOutcome::Continue)
            }

            Action::CloseUtterance => {
                self.segment = None;
                self.flush = None;
                Ok(ExecOutcome::Continue)
            }

            Action::RunInterrupt => {
                let flush = self.flush.take();
                self.segment = None;
                let detail = interrupt::run(&self.shared, flush, self.generation).await;
                Ok(match detail {
                    Some(detail) => ExecOutcome::Override {
                        state: PipelineState::Interrupted,
                        detail: Some(detail),
                    },
                    None => ExecOutcome::Continue,
                })
            }

            Action::DiscardChunk => {
                warn!("audio chunk discarded during interrupt");
                Ok(ExecOutcome::Continue)
            }
        }
    }

    async fn fatal_reset(&mut self, error: VisageError) {
        error!(error = %error, "engine failure, resetting pipeline");
        if let Some(flush) = self.flush.take() {
            flush.cancel().await;
        }
        self.segment = None;
        self.shared.tracker.reset();
        self.set_state(PipelineState::Idle, Some(error.to_string()));
    }

    fn set_state(&mut self, state: PipelineState, detail: Option<String>) {
        if self.state == state && detail.is_none() {
            return;
        }
        self.state = state;
        self.shared.publish_state(state, detail);
    }
}

fn log_flush_outcome(outcome: &FlushOutcome) -> Option<String> {
    match outcome {
        FlushOutcome::Confirmed { ratio } => {
            info!(ratio, "utterance rendered to completion");
            None
        }
        FlushOutcome::Settled { ratio } => {
            warn!(ratio, "utterance settled below full completion");
            None
        }
        FlushOutcome::TimedOut { ratio } => {
            warn!(ratio, "utterance flush timed out, trailing audio may be truncated");
            None
        }
        FlushOutcome::Failed(message) => {
            error!(error = %message, "flush failed");
            Some(message.clone())
        }
    }
}
