//! Barge-in: discard the current utterance everywhere at once.
//!
//! Order matters. The flush task dies first so it cannot race the discard
//! with a late `flush()`; the engine is interrupted and then flushed so
//! its internal buffer is dropped rather than replayed into the next
//! utterance; only then is the playout queue emptied and the accounting
//! reset.

use tracing::{debug, error, info};

use crate::engine::flush::FlushTask;
use crate::engine::Shared;

/// Run the interrupt sequence. Returns error text for the status event if
/// the engine misbehaved — the pipeline lands in `Idle` regardless.
pub(crate) async fn run(
    shared: &Shared,
    flush: Option<FlushTask>,
    generation: u64,
) -> Option<String> {
    if let Some(flush) = flush {
        flush.cancel().await;
        debug!("pending flush cancelled by interrupt");
    }

    shared.runtime.0.interrupt();

    let mut detail = None;
    if let Err(e) = shared.runtime.0.flush().await {
        error!(error = %e, "engine flush after interrupt failed");
        detail = Some(e.to_string());
    }

    let discarded = shared.playback.queued_samples();
    shared.playback.clear();
    shared.tracker.reset();

    info!(generation, discarded_queued_samples = discarded, "utterance discarded");
    detail
}
