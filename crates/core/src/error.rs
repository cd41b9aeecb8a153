/// Result alias that carries the custom [`CandleError`] type.
pub type Result<T> = std::result::Result<T, CandleError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum CandleError {
    /// The capture device is missing or access was refused. This is the only
    /// error surfaced to the audience; the show stays on the candle.
    #[error("audio device unavailable: {0}")]
    AudioAccess(String),
    /// A frame did not have the configured number of samples.
    #[error("invalid audio frame: expected {expected} samples, got {actual}")]
    FrameLength { expected: usize, actual: usize },
    /// A frame contained NaN or an infinite sample.
    #[error("invalid audio frame: non-finite sample at index {index}")]
    NonFiniteSample { index: usize },
    /// The audio sink failed to render a note.
    #[error("note could not be rendered: {0}")]
    Sink(String),
    /// Startup configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Message(String),
}

impl CandleError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Returns `true` for the malformed-frame variants, which are skipped
    /// rather than treated as stream failures.
    pub fn is_invalid_frame(&self) -> bool {
        matches!(self, Self::FrameLength { .. } | Self::NonFiniteSample { .. })
    }
}

impl From<&str> for CandleError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for CandleError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
