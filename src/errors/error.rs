//! Error type for streaming operations.

use std::time::Duration;
use thiserror::Error;

use super::categories::ErrorKind;
use crate::transport::TransportError;

/// Result type alias for streaming operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Error that settles a streaming request, or prevents one from starting.
#[derive(Error, Debug, Clone)]
pub enum StreamError {
    /// Connection failure or non-success status before the body was streamed.
    #[error("Transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// HTTP status code, when the server answered.
        status: Option<u16>,
        /// Raw (redacted) response body, when available.
        body: Option<String>,
        /// Server-provided retry hint.
        retry_after: Option<Duration>,
    },

    /// Malformed frame, invalid JSON or unexpected payload shape.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Error message.
        message: String,
        /// The offending line, truncated.
        line: Option<String>,
    },

    /// In-band error object sent by the provider mid-stream.
    #[error("Provider error: {message}")]
    Provider {
        /// Provider message, preserved verbatim.
        message: String,
        /// Provider error code.
        code: Option<String>,
    },

    /// The request was cancelled before it settled.
    #[error("Stream cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message.
        message: String,
    },

    /// Invalid request input.
    #[error("Validation error: {message}")]
    Validation {
        /// Error message.
        message: String,
    },

    /// Unexpected internal condition.
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

const MAX_LINE_IN_ERROR: usize = 256;

impl StreamError {
    /// Creates a protocol error, keeping a truncated copy of the line.
    pub fn protocol(message: impl Into<String>, line: Option<&str>) -> Self {
        StreamError::Protocol {
            message: message.into(),
            line: line.map(truncate_line),
        }
    }

    /// Creates a provider error.
    pub fn provider(message: impl Into<String>, code: Option<String>) -> Self {
        StreamError::Provider {
            message: message.into(),
            code,
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        StreamError::Configuration {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        StreamError::Validation {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        StreamError::Internal {
            message: message.into(),
        }
    }

    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamError::Transport { .. } => ErrorKind::Transport,
            StreamError::Protocol { .. } => ErrorKind::Protocol,
            StreamError::Provider { .. } => ErrorKind::Provider,
            StreamError::Cancelled => ErrorKind::Cancelled,
            StreamError::Configuration { .. } => ErrorKind::Configuration,
            StreamError::Validation { .. } => ErrorKind::Validation,
            StreamError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns true if opening the stream again may succeed.
    ///
    /// Only transport errors qualify: connection failures (no status) and
    /// 408, 429 and 5xx gateway statuses.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Transport { status: None, .. } => true,
            StreamError::Transport {
                status: Some(status),
                ..
            } => matches!(status, 408 | 429 | 500 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// Returns the retry-after duration if the server sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            StreamError::Transport { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Returns the HTTP status code if available.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            StreamError::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

fn truncate_line(line: &str) -> String {
    if line.len() <= MAX_LINE_IN_ERROR {
        return line.to_string();
    }
    let mut end = MAX_LINE_IN_ERROR;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &line[..end])
}

impl From<TransportError> for StreamError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Status {
                status,
                message,
                body,
                retry_after,
            } => StreamError::Transport {
                message,
                status: Some(status),
                body,
                retry_after,
            },
            TransportError::Cancelled => StreamError::Cancelled,
            other => StreamError::Transport {
                message: other.to_string(),
                status: None,
                body: None,
                retry_after: None,
            },
        }
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::from(err).into()
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Protocol {
            message: format!("Invalid JSON: {}", err),
            line: None,
        }
    }
}

impl From<url::ParseError> for StreamError {
    fn from(err: url::ParseError) -> Self {
        StreamError::Configuration {
            message: format!("Invalid URL: {}", err),
        }
    }
}
