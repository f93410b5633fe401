use thiserror::Error;

/// Errors raised at the boundary of the scope pipeline (queue, capture, view).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    /// A block handed to the queue does not match its fixed block size.
    #[error("block holds {actual} samples, queue expects {expected}")]
    BlockLength { expected: usize, actual: usize },

    #[error("block size must be a non-zero power of two, got {0}")]
    BlockSize(usize),

    #[error("queue needs at least one slot")]
    NoSlots,

    #[error("frame rate must be within 1..1000 fps, got {0}")]
    FrameRate(u32),
}

/// Errors raised while opening or running the output stream.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio output device available")]
    NoDevice,

    #[error("output device '{0}' not found")]
    DeviceNotFound(String),

    #[error("could not query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build {format} stream: {source}")]
    BuildStream {
        format: &'static str,
        #[source]
        source: cpal::BuildStreamError,
    },

    #[error("failed to start audio: {0}")]
    Play(#[from] cpal::PlayStreamError),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Scope(#[from] ScopeError),
}
