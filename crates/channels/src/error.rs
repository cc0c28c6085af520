/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed channel errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Inbound payload is structurally valid JSON but not a usable event.
    #[error("invalid event payload: {message}")]
    InvalidInput { message: String },

    /// JSON decoding failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }
}
