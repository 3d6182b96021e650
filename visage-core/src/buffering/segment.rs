//! Per-utterance ingest path.
//!
//! `SegmentBuffer` sits between the speech source and the rendering
//! engine for the lifetime of one utterance: it validates incoming
//! chunks, resamples them to the engine's fixed input rate, forwards the
//! result, and accounts the **post-resample** duration — the quantity the
//! engine actually receives — into the completion tracker.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::audio::chunk::AudioChunk;
use crate::audio::resample::{f32_to_i16, i16_to_f32, RateConverter};
use crate::error::{Result, VisageError};
use crate::runtime::RuntimeHandle;
use crate::tracking::CompletionTracker;

pub struct SegmentBuffer {
    runtime: RuntimeHandle,
    tracker: Arc<CompletionTracker>,
    target_rate: u32,
    /// Lazily created per source rate; rebuilt if the rate changes
    /// mid-utterance (synthesis services have been seen doing that).
    converter: Option<(u32, RateConverter)>,
    forwarded_secs: f64,
}

impl SegmentBuffer {
    pub fn new(runtime: RuntimeHandle, tracker: Arc<CompletionTracker>, target_rate: u32) -> Self {
        Self {
            runtime,
            tracker,
            target_rate,
            converter: None,
            forwarded_secs: 0.0,
        }
    }

    /// Validate, resample and forward one chunk of speech audio.
    ///
    /// # Errors
    /// - `VisageError::InvalidAudioInput` for empty chunks or a zero sample
    ///   rate — the caller logs and the utterance continues.
    /// - `VisageError::Runtime` if the engine rejects the push — fatal to
    ///   the current utterance.
    pub async fn ingest(&mut self, chunk: &AudioChunk) -> Result<()> {
        if chunk.sample_rate == 0 {
            return Err(VisageError::InvalidAudioInput("zero sample rate".into()));
        }
        if chunk.is_empty() {
            return Err(VisageError::InvalidAudioInput("empty chunk".into()));
        }

        let samples = if chunk.sample_rate == self.target_rate {
            chunk.samples.clone()
        } else {
            let converter = self.converter_for(chunk.sample_rate)?;
            f32_to_i16(&converter.process(&i16_to_f32(&chunk.samples)))
        };

        if samples.is_empty() {
            // Sub-chunk accumulation inside the converter — nothing ready
            // to forward yet. Forwarding degenerate slivers could stall the
            // engine's batcher, so they wait for more input or `finish`.
            debug!(
                source_rate = chunk.sample_rate,
                input = chunk.samples.len(),
                "chunk buffered awaiting a full resampler block"
            );
            return Ok(());
        }

        self.forward(samples).await
    }

    /// Flush the resampler remainder at speech-end so the utterance's full
    /// duration reaches the engine before the flush scheduler starts
    /// comparing input and output.
    pub async fn finish(&mut self) -> Result<()> {
        let tail = match self.converter.as_mut() {
            Some((_, converter)) => f32_to_i16(&converter.drain()),
            None => Vec::new(),
        };
        if tail.is_empty() {
            return Ok(());
        }
        debug!(samples = tail.len(), "forwarding resampler tail");
        self.forward(tail).await
    }

    /// Post-resample audio forwarded so far, in seconds.
    pub fn forwarded_secs(&self) -> f64 {
        self.forwarded_secs
    }

    /// Whether the converter is holding samples that `finish` would flush.
    pub fn has_pending(&self) -> bool {
        self.converter
            .as_ref()
            .is_some_and(|(_, c)| c.pending() > 0)
    }

    async fn forward(&mut self, samples: Vec<i16>) -> Result<()> {
        let secs = samples.len() as f64 / self.target_rate as f64;
        self.runtime
            .0
            .push_audio(&samples, self.target_rate, false)
            .await?;
        self.tracker.record_input(secs);
        self.forwarded_secs += secs;
        Ok(())
    }

    fn converter_for(&mut self, source_rate: u32) -> Result<&mut RateConverter> {
        let rebuild = !matches!(&self.converter, Some((rate, _)) if *rate == source_rate);
        if rebuild {
            if let Some((old_rate, _)) = &self.converter {
                warn!(
                    old_rate = *old_rate,
                    source_rate, "source sample rate changed mid-utterance"
                );
            }
            let fresh = RateConverter::new(source_rate, self.target_rate)?;
            self.converter = Some((source_rate, fresh));
        }
        match &mut self.converter {
            Some((_, converter)) => Ok(converter),
            None => Err(VisageError::Resample("converter unavailable".into())),
        }
    }
}
