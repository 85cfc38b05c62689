use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Domain-specific error codes for trip assembly and matching.
/// Covers transport failures, malformed feed payloads, and missing fields.
#[derive(Error, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Error {
    #[error("code: processing_error, description: {0}")]
    ProcessingError(String),

    #[error("code: invalid_payload, description: {0}")]
    InvalidPayload(String),

    #[error("code: missing_field, description: missing {0}")]
    MissingField(String),

    #[error("code: transport_error, description: {0}")]
    TransportError(String),
}

impl Error {
    /// Returns the error code.
    #[must_use]
    pub const fn code(&self) -> &str {
        match self {
            Self::ProcessingError(_) => "processing_error",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::MissingField(_) => "missing_field",
            Self::TransportError(_) => "transport_error",
        }
    }

    /// Returns the error description.
    #[must_use]
    pub fn description(&self) -> String {
        self.to_string()
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<Self>() {
            Some(Self::ProcessingError(e)) => Self::ProcessingError(format!("{err}: {e}")),
            Some(Self::InvalidPayload(e)) => Self::InvalidPayload(format!("{err}: {e}")),
            Some(Self::MissingField(e)) => Self::MissingField(format!("{err}: {e}")),
            Some(Self::TransportError(e)) => Self::TransportError(format!("{err}: {e}")),
            None => {
                let stack = err.chain().fold(String::new(), |cause, e| format!("{cause} -> {e}"));
                let stack = stack.trim_start_matches(" -> ").to_string();
                Self::TransportError(stack)
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
