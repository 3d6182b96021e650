//! `VisageEngine` — top-level pipeline handle.
//!
//! ## Lifecycle
//!
//! ```text
//! VisageEngine::new(config, runtime)
//!     └─► start()              → controller + render loop spawned
//!         ├─► push_audio()     → Idle → Active (implicit speech-start)
//!         ├─► end_of_speech()  → Active → Draining → Idle
//!         ├─► interrupt()      → any → Interrupted → Idle
//!         └─► stop()           → tasks wound down; engine restartable
//! ```
//!
//! `start()`/`stop()` are guarded: calling them in the wrong state returns
//! an error rather than panicking.
//!
//! ## Threading
//!
//! The engine handle is `Send + Sync` — all fields use interior mutability.
//! Entry points enqueue events on the controller loop, which is the only
//! writer of pipeline state; the render loop and the ingest path update the
//! completion tracker through atomics. Wrap in `Arc<VisageEngine>` to share
//! between transport tasks.

pub mod controller;
pub mod flush;
pub mod interrupt;
pub mod render;

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::audio::chunk::AudioChunk;
use crate::audio::wav;
use crate::buffering::PlaybackQueue;
use crate::error::{Result, VisageError};
use crate::events::{FrameEvent, PipelineState, PipelineStatusEvent};
use crate::runtime::RuntimeHandle;
use crate::tracking::CompletionTracker;

use controller::ControlEvent;

/// Broadcast channel capacity for status and frame events.
const BROADCAST_CAP: usize = 256;

/// Configuration for the synchronization pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The single input rate the rendering engine accepts (Hz).
    /// Incoming audio at other rates is resampled. Default: 16000.
    pub input_sample_rate: u32,
    /// Target video frame rate for downstream delivery. `0.0` disables
    /// pacing. Default: 25.0.
    pub video_fps: f64,
    /// Base delay the flush deadline is derived from
    /// (`max_wait = max(2 × flush_delay, 2 s)`). Default: 500 ms.
    pub flush_delay: Duration,
    /// Completion-ratio polling interval. Default: 50 ms.
    pub check_interval: Duration,
    /// Ratio at which rendering counts as caught up. Default: 0.98.
    pub completed_ratio: f64,
    /// Ratio accepted after a stall of `no_progress_window` — engines go
    /// quiet on trailing silence. Default: 0.90.
    pub settle_ratio: f64,
    /// Output stall window before the settle heuristic applies.
    /// Default: 1 s.
    pub no_progress_window: Duration,
    /// Bound on the wait for the batcher remainder after the silence tail.
    /// Default: 1 s.
    pub post_flush_wait: Duration,
    /// Length of the `last_chunk` silence push that kicks the engine's
    /// internal batcher. Default: 10 ms.
    pub silence_tail: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            video_fps: 25.0,
            flush_delay: Duration::from_millis(500),
            check_interval: Duration::from_millis(50),
            completed_ratio: 0.98,
            settle_ratio: 0.90,
            no_progress_window: Duration::from_secs(1),
            post_flush_wait: Duration::from_secs(1),
            silence_tail: Duration::from_millis(10),
        }
    }
}

impl PipelineConfig {
    /// Hard ceiling on the pre-flush wait.
    pub fn max_flush_wait(&self) -> Duration {
        (self.flush_delay * 2).max(Duration::from_secs(2))
    }
}

/// State shared by the controller loop, the render loop and flush tasks.
pub(crate) struct Shared {
    pub config: PipelineConfig,
    pub runtime: RuntimeHandle,
    pub tracker: Arc<CompletionTracker>,
    pub playback: PlaybackQueue,
    pub frame_tx: broadcast::Sender<FrameEvent>,
    pub status_tx: broadcast::Sender<PipelineStatusEvent>,
    /// Mirror of the controller's state for cheap snapshots.
    state: Mutex<PipelineState>,
    seq: AtomicU64,
}

impl Shared {
    pub(crate) fn publish_state(&self, state: PipelineState, detail: Option<String>) {
        *self.state.lock() = state;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let _ = self.status_tx.send(PipelineStatusEvent { seq, state, detail });
    }
}

/// Observability snapshot of the duration counters.
#[derive(Debug, Clone, Copy)]
pub struct CompletionSnapshot {
    pub input_secs: f64,
    pub output_secs: f64,
    pub ratio: f64,
}

struct Session {
    control_tx: mpsc::UnboundedSender<ControlEvent>,
    token: CancellationToken,
    controller: JoinHandle<()>,
    render: JoinHandle<()>,
}

/// The top-level pipeline handle.
pub struct VisageEngine {
    shared: Arc<Shared>,
    running: AtomicBool,
    session: Mutex<Option<Session>>,
}

impl VisageEngine {
    /// Create a new engine around an already-constructed rendering runtime.
    /// Does not spawn anything — call `start()` from within a Tokio runtime.
    pub fn new(config: PipelineConfig, runtime: RuntimeHandle) -> Self {
        let (frame_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);

        let shared = Arc::new(Shared {
            config,
            runtime,
            tracker: Arc::new(CompletionTracker::new()),
            playback: PlaybackQueue::new(),
            frame_tx,
            status_tx,
            state: Mutex::new(PipelineState::Idle),
            seq: AtomicU64::new(0),
        });

        Self {
            shared,
            running: AtomicBool::new(false),
            session: Mutex::new(None),
        }
    }

    /// Spawn the controller and render loops.
    ///
    /// # Errors
    /// `VisageError::AlreadyRunning` if already started.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(VisageError::AlreadyRunning);
        }

        // A previous session may have stopped mid-utterance.
        self.shared.tracker.reset();
        self.shared.playback.clear();
        *self.shared.state.lock() = PipelineState::Idle;

        let token = CancellationToken::new();
        let (control_tx, controller) =
            controller::spawn(Arc::clone(&self.shared), token.clone());
        let render = render::spawn(Arc::clone(&self.shared), token.clone());

        *self.session.lock() = Some(Session {
            control_tx,
            token,
            controller,
            render,
        });

        info!("pipeline started");
        Ok(())
    }

    /// Wind the pipeline down. The engine may be started again afterwards
    /// (against the same runtime, if it is still alive).
    ///
    /// # Errors
    /// `VisageError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(VisageError::NotRunning);
        }

        if let Some(session) = self.session.lock().take() {
            // Tasks observe the token at their next await point and wind
            // down, cancelling any in-flight flush on the way out.
            session.token.cancel();
            drop(session.controller);
            drop(session.render);
        }

        info!("pipeline stop requested");
        Ok(())
    }

    /// Feed one chunk of synthesized speech. The first chunk of an
    /// utterance doubles as the speech-start signal.
    pub fn push_audio(&self, chunk: AudioChunk) -> Result<()> {
        self.send(ControlEvent::Audio(chunk))
    }

    /// Signal that the current utterance's audio is complete. Draining and
    /// the end-of-speech flush happen in the background; more audio may
    /// still arrive and resume the utterance.
    pub fn end_of_speech(&self) -> Result<()> {
        self.send(ControlEvent::SpeechEnd)
    }

    /// Barge-in: discard the current utterance's audio and rendering state
    /// immediately.
    pub fn interrupt(&self) -> Result<()> {
        self.send(ControlEvent::Interrupt)
    }

    /// Current pipeline state (snapshot).
    pub fn state(&self) -> PipelineState {
        *self.shared.state.lock()
    }

    /// Subscribe to state transitions.
    pub fn subscribe_status(&self) -> broadcast::Receiver<PipelineStatusEvent> {
        self.shared.status_tx.subscribe()
    }

    /// Subscribe to rendered video/audio frames in production order.
    pub fn subscribe_frames(&self) -> broadcast::Receiver<FrameEvent> {
        self.shared.frame_tx.subscribe()
    }

    /// The pull-based playout queue (cleared on barge-in).
    pub fn playback(&self) -> PlaybackQueue {
        self.shared.playback.clone()
    }

    /// Duration counters for the current utterance.
    pub fn completion(&self) -> CompletionSnapshot {
        CompletionSnapshot {
            input_secs: self.shared.tracker.input_duration(),
            output_secs: self.shared.tracker.output_duration(),
            ratio: self.shared.tracker.ratio(),
        }
    }

    /// Stream a 16-bit PCM WAV clip as one utterance: sliced into
    /// `chunk_len` pieces, pushed slightly faster than real time, then
    /// closed with `end_of_speech`.
    pub async fn stream_wav_file<P: AsRef<Path>>(&self, path: P, chunk_len: Duration) -> Result<()> {
        let clip = wav::read_wav(path.as_ref())?;
        let rate = clip.sample_rate;
        let samples_per_chunk =
            ((rate as f64 * chunk_len.as_secs_f64()) as usize).max(1);

        info!(
            path = %path.as_ref().display(),
            duration_secs = clip.duration_secs(),
            rate,
            "streaming audio clip"
        );

        for slice in clip.samples.chunks(samples_per_chunk) {
            self.push_audio(AudioChunk::new(slice.to_vec(), rate))?;
            // Stay a little ahead of real time so the engine never starves.
            tokio::time::sleep(chunk_len.mul_f64(0.8)).await;
        }

        self.end_of_speech()
    }

    fn send(&self, event: ControlEvent) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(VisageError::NotRunning);
        }
        let session = self.session.lock();
        let Some(session) = session.as_ref() else {
            return Err(VisageError::NotRunning);
        };
        session
            .control_tx
            .send(event)
            .map_err(|_| VisageError::NotRunning)
    }
}

impl Drop for VisageEngine {
    fn drop(&mut self) {
        if let Some(session) = self.session.lock().take() {
            debug!("engine dropped while running, cancelling tasks");
            session.token.cancel();
        }
    }
}
