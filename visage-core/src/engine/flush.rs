//! Smart flush: completion-ratio-gated end-of-utterance finalization.
//!
//! The rendering engine batches audio internally and exposes no "I'm done"
//! signal, so flushing too early truncates lip-synced speech and flushing
//! too late adds dead latency. The scheduler splits the difference:
//!
//! 1. poll until output duration has (nearly) caught up with input;
//! 2. kick the engine's batcher with a `last_chunk` silence tail so the
//!    held-back sub-batch remainder is emitted;
//! 3. wait (bounded) for that remainder to come back out;
//! 4. `flush()` to mark end-of-speech.
//!
//! The 0.98 confirm threshold and the "0.90 after one second of no
//! progress" settling rule are tuned observations about engines that stop
//! emitting audio for trailing silence — a documented heuristic, not a
//! correctness proof. Both are configuration.
//!
//! Every wait point is cancellable via [`CancellationToken`]; cancellation
//! can never abandon a started `flush()` call, and a cancelled task
//! reports nothing — the audio it already pushed simply stands.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::chunk::AudioChunk;
use crate::engine::controller::ControlEvent;
use crate::engine::Shared;
use crate::error::Result;

/// How a flush attempt ended.
#[derive(Debug, Clone)]
pub enum FlushOutcome {
    /// Output caught up with input before the deadline.
    Confirmed { ratio: f64 },
    /// Output stalled close enough to complete; proceeded on the heuristic.
    Settled { ratio: f64 },
    /// Deadline reached; proceeded best-effort, trailing audio may be lost.
    TimedOut { ratio: f64 },
    /// The engine rejected a push or the flush itself — fatal for the
    /// utterance.
    Failed(String),
}

/// A scheduled, cancellable flush for one utterance.
///
/// Restart is modeled as cancel-then-spawn-a-successor; there is no state
/// to reuse between attempts.
pub(crate) struct FlushTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl FlushTask {
    pub(crate) fn spawn(
        shared: Arc<Shared>,
        generation: u64,
        events: tokio::sync::mpsc::UnboundedSender<ControlEvent>,
    ) -> Self {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let outcome = match drive(&shared, &task_token).await {
                Ok(Some(outcome)) => outcome,
                // Cancelled mid-wait: effects are void, report nothing.
                Ok(None) => {
                    debug!(generation, "flush cancelled");
                    return;
                }
                Err(e) => FlushOutcome::Failed(e.to_string()),
            };
            if task_token.is_cancelled() {
                return;
            }
            let _ = events.send(ControlEvent::FlushFinished {
                generation,
                outcome,
            });
        });
        Self { token, handle }
    }

    /// Cancel and wait for the task to wind down completely.
    pub(crate) async fn cancel(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}

/// Returns `Ok(None)` when cancelled.
async fn drive(shared: &Shared, token: &CancellationToken) -> Result<Option<FlushOutcome>> {
    let config = &shared.config;
    let tracker = &shared.tracker;

    let deadline = Instant::now() + config.max_flush_wait();
    let mut last_output = tracker.output_duration();
    let mut stalled_since = Instant::now();
    let mut settled = false;
    let mut timed_out = false;

    info!(
        input_secs = tracker.input_duration(),
        output_secs = tracker.output_duration(),
        max_wait_ms = config.max_flush_wait().as_millis() as u64,
        "waiting for rendering to catch up before flush"
    );

    loop {
        let ratio = tracker.ratio();
        if ratio >= config.completed_ratio {
            info!(ratio, "rendering caught up");
            break;
        }

        let output = tracker.output_duration();
        if output > last_output {
            last_output = output;
            stalled_since = Instant::now();
        } else if stalled_since.elapsed() >= config.no_progress_window {
            if ratio >= config.settle_ratio {
                warn!(ratio, "output stalled but close enough, proceeding");
                settled = true;
                break;
            }
            warn!(ratio, "output stalled well short of complete, still waiting");
            stalled_since = Instant::now();
        }

        if Instant::now() >= deadline {
            warn!(
                ratio,
                input_secs = tracker.input_duration(),
                output_secs = tracker.output_duration(),
                "flush deadline reached, trailing audio may be truncated"
            );
            timed_out = true;
            break;
        }

        tokio::select! {
            _ = token.cancelled() => return Ok(None),
            _ = sleep(config.check_interval) => {}
        }
    }

    if token.is_cancelled() {
        return Ok(None);
    }

    // Kick the engine's internal batcher: a short last_chunk silence tail
    // forces it to emit whatever sub-batch remainder it is holding.
    let tail = AudioChunk::silence(config.silence_tail.as_millis() as u64, config.input_sample_rate);
    debug!(samples = tail.samples.len(), "pushing last-chunk silence tail");
    shared
        .runtime
        .0
        .push_audio(&tail.samples, config.input_sample_rate, true)
        .await?;

    let post_deadline = Instant::now() + config.post_flush_wait;
    while Instant::now() < post_deadline {
        if tracker.ratio() >= config.completed_ratio {
            break;
        }
        tokio::select! {
            _ = token.cancelled() => return Ok(None),
            _ = sleep(config.check_interval) => {}
        }
    }

    if token.is_cancelled() {
        return Ok(None);
    }

    shared.runtime.0.flush().await?;

    let ratio = tracker.ratio();
    info!(ratio, "end of speech signalled to engine");
    Ok(Some(if timed_out {
        FlushOutcome::TimedOut { ratio }
    } else if settled {
        FlushOutcome::Settled { ratio }
    } else {
        FlushOutcome::Confirmed { ratio }
    }))
}
