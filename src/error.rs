//! Error types for the public API and the error-callback surface.
//!
//! Two shapes serve two audiences:
//! - [`KrakenError`] is returned synchronously from public API calls that
//!   can fail a precondition (bad arguments, missing credentials).
//! - [`ErrorEvent`] is delivered through the registered error callback for
//!   faults the pipeline absorbs (transport drops, parse failures, checksum
//!   mismatches, queue overflow, panicking user callbacks).

use thiserror::Error;

/// Classification shared by synchronous errors and asynchronous error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConnectionFailed,
    ConnectionClosed,
    AuthenticationError,
    InvalidArgument,
    InvalidSymbol,
    ParseError,
    ChecksumMismatch,
    QueueOverflow,
    RateLimited,
    CallbackError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ConnectionFailed => "connection_failed",
            Self::ConnectionClosed => "connection_closed",
            Self::AuthenticationError => "authentication_error",
            Self::InvalidArgument => "invalid_argument",
            Self::InvalidSymbol => "invalid_symbol",
            Self::ParseError => "parse_error",
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::QueueOverflow => "queue_overflow",
            Self::RateLimited => "rate_limited",
            Self::CallbackError => "callback_error",
        };
        f.write_str(name)
    }
}

/// Errors returned from the public API.
#[derive(Debug, Error)]
pub enum KrakenError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("authentication error: {0}")]
    Authentication(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("checksum mismatch: {0}")]
    ChecksumMismatch(String),

    #[error("queue overflow: {0}")]
    QueueOverflow(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("callback error: {0}")]
    Callback(String),
}

impl KrakenError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionFailed(_) => ErrorKind::ConnectionFailed,
            Self::ConnectionClosed(_) => ErrorKind::ConnectionClosed,
            Self::Authentication(_) => ErrorKind::AuthenticationError,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::InvalidSymbol(_) => ErrorKind::InvalidSymbol,
            Self::Parse(_) => ErrorKind::ParseError,
            Self::ChecksumMismatch(_) => ErrorKind::ChecksumMismatch,
            Self::QueueOverflow(_) => ErrorKind::QueueOverflow,
            Self::RateLimited(_) => ErrorKind::RateLimited,
            Self::Callback(_) => ErrorKind::CallbackError,
        }
    }
}

/// An error reported through the registered error callback.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<String>,
}

impl ErrorEvent {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        kind: ErrorKind,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Some(details.into()),
        }
    }
}

impl std::fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{}: {} ({})", self.kind, self.message, details),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}
