//! Orchestrator error type.

use banter_common::error::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    InvalidState(&'static str),

    #[error("{0}")]
    BadRequest(&'static str),

    #[error("router cannot consume this producer with the given capabilities")]
    IncompatibleCodecs,

    #[error("sfu error: {0}")]
    Sfu(String),

    #[error("signaling operation timed out")]
    Timeout,
}

impl VoiceError {
    /// Wrap an SFU library failure. The detail lands in the server log;
    /// the client only ever sees the generic `internal` kind.
    pub fn sfu(error: impl std::fmt::Display) -> Self {
        Self::Sfu(error.to_string())
    }

    /// Client-visible error kind for a failure ack.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::IncompatibleCodecs => ErrorKind::IncompatibleCodecs,
            Self::Sfu(_) | Self::Timeout => ErrorKind::Internal,
        }
    }
}
