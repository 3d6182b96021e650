use thiserror::Error;

/// All errors produced by visage-core.
#[derive(Debug, Error)]
pub enum VisageError {
    #[error("invalid audio input: {0}")]
    InvalidAudioInput(String),

    #[error("rendering runtime error: {0}")]
    Runtime(String),

    #[error("resampler error: {0}")]
    Resample(String),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("unsupported WAV format: {0}")]
    WavFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VisageError>;
