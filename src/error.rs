use thiserror::Error;

/// Message a document carries when its run was cancelled by the user.
pub const CANCELLED_MESSAGE: &str = "Cancelled";

/// Failures of an analysis run, at batch or document granularity.
///
/// Malformed frames never show up here: the decoder drops them and keeps
/// going. Errors the server reports for a single angle arrive as
/// `angle_error` events instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    /// Missing input or configuration, detected before any request is sent.
    #[error("{0}")]
    Precondition(String),

    /// The connection failed, before or during streaming.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server refused the request or returned no body.
    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The user cancelled the run.
    #[error("{}", CANCELLED_MESSAGE)]
    Cancelled,

    /// A run is already in flight on this session.
    #[error("An analysis is already running")]
    AlreadyRunning,
}

impl AnalysisError {
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Text shown in place of a failed document.
    pub fn document_message(&self) -> String {
        match self {
            Self::Status { body, .. } if !body.trim().is_empty() => body.trim().to_string(),
            Self::Status { status, .. } => format!("Server returned {status} with an empty body"),
            other => other.to_string(),
        }
    }
}
