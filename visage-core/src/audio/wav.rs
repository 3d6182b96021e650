//! WAV file ingestion for the audio-clip path.
//!
//! Avatars are frequently driven from canned clips (greetings, hold
//! messages) rather than live synthesis. This loader turns a 16-bit PCM
//! WAV into a single [`AudioChunk`] that can be sliced and streamed into
//! the pipeline like any other utterance.

use std::path::Path;

use crate::audio::chunk::AudioChunk;
use crate::error::{Result, VisageError};

/// Read a 16-bit PCM WAV file into a mono [`AudioChunk`].
///
/// Multi-channel files are downmixed by averaging channels.
///
/// # Errors
/// `VisageError::WavFormat` for non-PCM or non-16-bit files,
/// `VisageError::Io` if the file cannot be read.
pub fn read_wav<P: AsRef<Path>>(path: P) -> Result<AudioChunk> {
    let mut reader = hound::WavReader::open(path.as_ref())
        .map_err(|e| VisageError::WavFormat(format!("{}: {e}", path.as_ref().display())))?;
    let spec = reader.spec();

    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(VisageError::WavFormat(format!(
            "expected 16-bit PCM, got {}-bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }

    let channels = spec.channels as usize;
    if channels == 0 {
        return Err(VisageError::WavFormat("zero channels".into()));
    }

    let interleaved: Vec<i16> = reader
        .samples::<i16>()
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| VisageError::WavFormat(format!("sample decode: {e}")))?;

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    };

    Ok(AudioChunk::new(samples, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write_wav(path: &Path, channels: u16, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn mono_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        let samples: Vec<i16> = (0..1600).map(|i| (i % 100) as i16).collect();
        write_wav(&path, 1, &samples);

        let chunk = read_wav(&path).unwrap();
        assert_eq!(chunk.sample_rate, 16_000);
        assert_eq!(chunk.samples, samples);
    }

    #[test]
    fn stereo_is_downmixed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        // L=100, R=300 interleaved → mono 200
        let interleaved: Vec<i16> = [100i16, 300].repeat(50);
        write_wav(&path, 2, &interleaved);

        let chunk = read_wav(&path).unwrap();
        assert_eq!(chunk.samples.len(), 50);
        assert!(chunk.samples.iter().all(|&s| s == 200));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(read_wav("/nonexistent/clip.wav").is_err());
    }
}
