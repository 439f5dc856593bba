pub type RenderResult<T> = Result<T, RenderError>;

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("audio decode failed: {0}")]
    Decode(String),

    #[error("background extraction failed: {0}")]
    Extraction(String),

    #[error("failed to start encoder: {0}")]
    EncodeStart(String),

    #[error("failed to write frame to encoder: {message}")]
    EncodeWrite { message: String, diagnostics: String },

    #[error("encoder exited with {status}")]
    EncodeFinish { status: String, diagnostics: String },

    #[error("a render is already in progress")]
    Busy,

    #[error("render cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RenderError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction(msg.into())
    }

    pub fn encode_start(msg: impl Into<String>) -> Self {
        Self::EncodeStart(msg.into())
    }

    /// Short status line for the notification channel. Never carries raw
    /// subprocess output; use [`RenderError::diagnostics`] for that.
    pub fn status(&self) -> String {
        match self {
            Self::InvalidRequest(msg) => format!("Error: {msg}"),
            Self::Decode(_) => "Error: could not decode the audio file".into(),
            Self::Extraction(_) => "Warning: background video could not be read".into(),
            Self::EncodeStart(_) => "Error: could not start the video encoder".into(),
            Self::EncodeWrite { .. } => "Error: the video encoder stopped unexpectedly".into(),
            Self::EncodeFinish { .. } => "Error: the video encoder reported a failure".into(),
            Self::Busy => "Error: a render is already running".into(),
            Self::Cancelled => "Cancelled".into(),
            Self::Io(_) => "Error: file system failure".into(),
        }
    }

    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::EncodeWrite { diagnostics, .. } | Self::EncodeFinish { diagnostics, .. } => {
                Some(diagnostics.as_str())
            }
            _ => None,
        }
    }
}
