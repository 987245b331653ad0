//! Error types for the BDA service

/// Result type alias using the BDA service's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for BDA operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or malformed configuration / doctrine documents
    #[error("configuration error: {0}")]
    Config(String),

    /// Local load and the fetch-then-retry both failed
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Model loaded but not fully resident on an accelerator
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Image could not be read or decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// The inference capability failed during generation
    #[error("inference error: {0}")]
    Inference(String),

    /// Filesystem errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new model-unavailable error
    pub fn model_unavailable(msg: impl Into<String>) -> Self {
        Self::ModelUnavailable(msg.into())
    }

    /// Create a new resource-exhausted error
    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    /// Create a new decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new inference error
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether a batch run over many images should stop on this error.
    ///
    /// Decode failures only affect the image that produced them.
    pub fn is_fatal_for_batch(&self) -> bool {
        !matches!(self, Self::Decode(_))
    }
}
