use {parley_common::Error as CommonError, parley_voice::Stage, thiserror::Error};

/// Collaborator failures the dispatcher recovers from. None of them ever
/// leaves `handle_inbound_event`; they are logged and turned into a fixed
/// reply.
#[derive(Debug, Error)]
pub enum Failure {
    /// Language-model, image or transcription backend.
    #[error("{operation} failed: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },

    /// Attachment fetch, download, transcode or history storage.
    #[error("{operation} failed: {message}")]
    Io {
        operation: &'static str,
        message: String,
    },

    /// Platform credential could not be obtained.
    #[error("credential unavailable: {message}")]
    Auth { message: String },

    /// Outgoing reply was not delivered.
    #[error("reply delivery failed: {message}")]
    Delivery { message: String },

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
}

impl Failure {
    /// Backend failure, or [`Failure::Timeout`] when the chain carries a
    /// deadline error.
    #[must_use]
    pub fn backend(operation: &'static str, err: &anyhow::Error) -> Self {
        if CommonError::is_timeout(err) {
            return Self::Timeout { operation };
        }
        Self::Backend {
            operation,
            message: format!("{err:#}"),
        }
    }

    #[must_use]
    pub fn io(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Io {
            operation,
            message: err.to_string(),
        }
    }

    #[must_use]
    pub fn delivery(err: &anyhow::Error) -> Self {
        Self::Delivery {
            message: format!("{err:#}"),
        }
    }

    /// Map a failed transcription run onto the taxonomy by the step that
    /// broke.
    #[must_use]
    pub fn from_transcription(failure: &parley_voice::TranscriptionFailure) -> Self {
        let message = format!("{:#}", failure.error);
        if CommonError::is_timeout(&failure.error) {
            return Self::Timeout {
                operation: failure.stage.as_str(),
            };
        }
        match failure.stage {
            Stage::Credential => Self::Auth { message },
            Stage::Transcribe => Self::Backend {
                operation: "transcription",
                message,
            },
            Stage::Fetch | Stage::Download | Stage::Transcode => Self::Io {
                operation: failure.stage.as_str(),
                message,
            },
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Backend { .. } => "backend",
            Self::Io { .. } => "io",
            Self::Auth { .. } => "auth",
            Self::Delivery { .. } => "delivery",
            Self::Timeout { .. } => "timeout",
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
