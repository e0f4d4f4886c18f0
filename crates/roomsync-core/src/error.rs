use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error category used for user-facing handling and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller referenced something the store does not know about.
    NotFound,
    /// A conflicting operation is already running; retry later.
    Busy,
    /// Transient network or transport failure.
    Network,
    /// Backend answered with a payload the store could not understand.
    Protocol,
    /// Invalid input supplied by the caller.
    Config,
}

/// Failures raised while decoding a pushed frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Frame is not a JSON envelope at all.
    #[error("malformed envelope: {0}")]
    Malformed(String),
    /// Envelope tag is not one this client understands.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    /// Body does not match the shape expected for its tag.
    #[error("invalid payload for '{command}': {reason}")]
    InvalidPayload { command: String, reason: String },
}

/// Kind of RPC-level failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connection-level failure.
    Network,
    /// Backend processed the request and returned an error.
    Backend,
    /// No response arrived within the configured request timeout.
    Timeout,
    /// The RPC channel is shut down.
    Closed,
}

/// RPC failure reported by the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Backend, message)
    }

    pub fn timeout(method: &str, after: Duration) -> Self {
        Self::new(
            TransportErrorKind::Timeout,
            format!("'{method}' got no response within {} ms", after.as_millis()),
        )
    }
}

/// Errors surfaced to callers of request-issuing store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("room not found: {0}")]
    RoomNotFound(String),
    #[error("{operation} already in progress for {room_id}")]
    AlreadyInProgress {
        operation: &'static str,
        room_id: String,
    },
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("invalid response to '{method}': {reason}")]
    InvalidResponse { method: String, reason: String },
    #[error("invalid media uri '{0}'")]
    InvalidMediaUri(String),
}

impl StoreError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RoomNotFound(_) => "room_not_found",
            Self::AlreadyInProgress { .. } => "already_in_progress",
            Self::Transport(err) => match err.kind {
                TransportErrorKind::Timeout => "request_timeout",
                TransportErrorKind::Closed => "transport_closed",
                TransportErrorKind::Network | TransportErrorKind::Backend => "transport_error",
            },
            Self::InvalidResponse { .. } => "invalid_response",
            Self::InvalidMediaUri(_) => "invalid_media_uri",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RoomNotFound(_) => ErrorCategory::NotFound,
            Self::AlreadyInProgress { .. } => ErrorCategory::Busy,
            Self::Transport(_) => ErrorCategory::Network,
            Self::InvalidResponse { .. } => ErrorCategory::Protocol,
            Self::InvalidMediaUri(_) => ErrorCategory::Config,
        }
    }

    /// Whether trying the same operation again later may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Busy | ErrorCategory::Network)
    }
}
