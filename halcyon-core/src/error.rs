use thiserror::Error;

/// All errors produced by halcyon-core.
#[derive(Debug, Error)]
pub enum HalcyonError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("smoothing factor must be within [0, 1], got {value}")]
    InvalidSmoothingFactor { value: f32 },

    #[error("frame size must be nonzero")]
    InvalidFrameSize,

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("failed to persist session audio: {0}")]
    Persistence(String),

    #[error("no unsaved session audio to retry")]
    NothingToSave,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, HalcyonError>;
