//! Channel-backed production adapter.
//!
//! The real rendering engine usually lives somewhere the pipeline cannot
//! call directly — a vendor SDK loop on its own thread, a sidecar process,
//! a socket task. `ChannelRuntime` adapts that split: commands go out over
//! an unbounded sender (so `push_audio`/`flush` suspend only to enqueue,
//! and `interrupt` can be issued synchronously), frames come back over a
//! bounded receiver that the render loop drains.
//!
//! The integrator wires the far ends:
//!
//! ```ignore
//! let (runtime, mut commands, frames) = ChannelRuntime::connect(64);
//! tokio::spawn(async move {
//!     while let Some(cmd) = commands.recv().await {
//!         // drive the vendor engine, send RenderedFrames back on `frames`
//!     }
//! });
//! let engine = VisageEngine::new(config, RuntimeHandle::new(runtime));
//! ```

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::audio::chunk::AudioChunk;
use crate::error::{Result, VisageError};
use crate::runtime::{AvatarRuntime, RenderedFrame};

/// Commands sent to the engine-side loop.
#[derive(Debug)]
pub enum RuntimeCommand {
    Push {
        chunk: AudioChunk,
        last_chunk: bool,
    },
    Flush,
    Interrupt,
}

/// `AvatarRuntime` implemented over a command/frame channel pair.
pub struct ChannelRuntime {
    commands: mpsc::UnboundedSender<RuntimeCommand>,
    frames: tokio::sync::Mutex<mpsc::Receiver<RenderedFrame>>,
}

impl ChannelRuntime {
    /// Create an adapter plus the far ends the engine loop needs: the
    /// command receiver to drain and the frame sender to publish on.
    pub fn connect(
        frame_buffer: usize,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<RuntimeCommand>,
        mpsc::Sender<RenderedFrame>,
    ) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::channel(frame_buffer);

        let runtime = Self {
            commands: command_tx,
            frames: tokio::sync::Mutex::new(frame_rx),
        };

        (runtime, command_rx, frame_tx)
    }

    fn send(&self, command: RuntimeCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| VisageError::Runtime("engine command channel closed".into()))
    }
}

#[async_trait]
impl AvatarRuntime for ChannelRuntime {
    async fn push_audio(&self, samples: &[i16], sample_rate: u32, last_chunk: bool) -> Result<()> {
        self.send(RuntimeCommand::Push {
            chunk: AudioChunk::new(samples.to_vec(), sample_rate),
            last_chunk,
        })
    }

    async fn flush(&self) -> Result<()> {
        self.send(RuntimeCommand::Flush)
    }

    fn interrupt(&self) {
        if self.send(RuntimeCommand::Interrupt).is_err() {
            warn!("interrupt dropped: engine command channel closed");
        }
    }

    async fn next_frame(&self) -> Option<RenderedFrame> {
        self.frames.lock().await.recv().await
    }
}
