//! Session-lifetime render loop.
//!
//! Drains the engine's frame stream for as long as the session lives,
//! independent of utterance boundaries. Video is paced to the target frame
//! rate and forwarded in production order — never reordered, never
//! dropped. Audio is forwarded immediately and accounted into the
//! completion tracker; the `end_of_speech` marker is broadcast but the
//! loop keeps draining, because the engine is observed to emit frames past
//! its own marker.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::Shared;
use crate::events::FrameEvent;

pub(crate) fn spawn(shared: Arc<Shared>, session: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(run(shared, session))
}

async fn run(shared: Arc<Shared>, session: CancellationToken) {
    let mut pacer = FramePacer::new(shared.config.video_fps);
    info!(fps = shared.config.video_fps, "render loop started");

    let mut frames = 0u64;

    loop {
        let frame = tokio::select! {
            _ = session.cancelled() => break,
            frame = shared.runtime.0.next_frame() => frame,
        };
        let Some(frame) = frame else {
            info!(frames, "engine frame stream ended");
            break;
        };
        frames += 1;

        if let Some(video) = frame.video {
            pacer.pace().await;
            let _ = shared.frame_tx.send(FrameEvent::Video(Arc::new(video)));
        }

        if let Some(audio) = frame.audio {
            shared.tracker.record_output(audio.duration_secs());
            shared.playback.push_samples(&audio.samples);
            let _ = shared.frame_tx.send(FrameEvent::Audio(Arc::new(audio)));
        }

        if frame.end_of_speech {
            debug!(
                output_secs = shared.tracker.output_duration(),
                "engine reported end of speech"
            );
            let _ = shared.frame_tx.send(FrameEvent::SpeechCompleted);
        }
    }
}

/// Paces frame delivery to a target rate without ever dropping a frame.
///
/// Deadlines are scheduled from the previous deadline (drift-free); after a
/// stall longer than one interval the schedule restarts from now instead of
/// burst-delivering a backlog.
pub struct FramePacer {
    interval: Option<Duration>,
    next_due: Option<Instant>,
}

impl FramePacer {
    pub fn new(fps: f64) -> Self {
        let interval = (fps > 0.0).then(|| Duration::from_secs_f64(1.0 / fps));
        Self {
            interval,
            next_due: None,
        }
    }

    /// Wait until the next frame slot. The first call never waits.
    pub async fn pace(&mut self) {
        let Some(interval) = self.interval else {
            return;
        };

        let now = Instant::now();
        match self.next_due {
            None => {
                self.next_due = Some(now + interval);
            }
            Some(due) => {
                if due > now {
                    sleep_until(due).await;
                }
                let now = Instant::now();
                let base = if now > due + interval { now } else { due };
                self.next_due = Some(base + interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn paces_to_target_rate() {
        let mut pacer = FramePacer::new(25.0);
        let start = Instant::now();

        // First frame is immediate, the next four are 40 ms apart.
        for _ in 0..5 {
            pacer.pace().await;
        }

        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(160) && elapsed < Duration::from_millis(200),
            "elapsed {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn zero_fps_disables_pacing() {
        let mut pacer = FramePacer::new(0.0);
        let start = Instant::now();
        for _ in 0..100 {
            pacer.pace().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn stall_does_not_burst_afterwards() {
        let mut pacer = FramePacer::new(25.0);
        pacer.pace().await;
        pacer.pace().await;

        // Engine stalls for a second — the schedule restarts from now
        // rather than delivering 25 overdue frames instantly.
        tokio::time::sleep(Duration::from_secs(1)).await;

        let start = Instant::now();
        pacer.pace().await; // overdue, immediate
        pacer.pace().await; // next slot, one interval later
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(40) && elapsed < Duration::from_millis(80),
            "elapsed {elapsed:?}"
        );
    }
}
