/// Result alias that carries the custom [`EngineError`] type.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Common error type for the core crate.
///
/// Load failures never show up here: the controller resolves them into a
/// final `Error` event so the presentation layer only ever receives a message.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Free-form message for failures that have no dedicated variant.
    #[error("{0}")]
    Message(String),
    /// A caller supplied a value outside the accepted domain.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The playback resource refused to start, usually because the host is
    /// waiting for a user gesture.
    #[error("playback rejected: {0}")]
    PlaybackRejected(String),
    /// The resource factory could not produce a playback resource.
    #[error("playback resource unavailable: {0}")]
    ResourceUnavailable(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Malformed configuration or catalog JSON.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// The FFT plan rejected the buffers it was handed.
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
}

impl EngineError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        Self::InvalidInput(msg.into())
    }
}

impl From<&str> for EngineError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for EngineError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
