//! Error categories and provider error bodies.

use serde::Deserialize;
use serde_json::Value;

/// Error category for classification, metrics labels and retry handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection-level failure or non-success status before streaming.
    Transport,
    /// Malformed frame or unexpected payload shape.
    Protocol,
    /// Well-formed in-band error object sent by the provider.
    Provider,
    /// Cooperative cancellation was observed.
    Cancelled,
    /// Invalid client configuration.
    Configuration,
    /// Invalid request input.
    Validation,
    /// Unexpected internal condition.
    Internal,
}

impl ErrorKind {
    /// Returns the label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Provider => "provider",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Validation => "validation",
            ErrorKind::Internal => "internal",
        }
    }

    /// Returns true for the kinds that terminate an in-flight stream.
    pub fn is_stream_failure(&self) -> bool {
        matches!(
            self,
            ErrorKind::Transport | ErrorKind::Protocol | ErrorKind::Provider | ErrorKind::Cancelled
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error body returned by a provider with a non-success status.
///
/// Providers disagree on the shape: Ollama sends `{"error": "..."}`, OpenAI
/// compatible APIs send `{"error": {"message": "...", "code": ...}}` and
/// Tongyi sends `{"code": "...", "message": "..."}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    /// Either a plain message or a nested error object.
    #[serde(default)]
    pub error: Option<Value>,
    /// Top-level message.
    #[serde(default)]
    pub message: Option<String>,
    /// Top-level error code.
    #[serde(default)]
    pub code: Option<Value>,
}

impl ApiErrorBody {
    /// Parses a raw body, returning `None` when it is not a JSON object.
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str::<Self>(body).ok()
    }

    /// Extracts the most specific human-readable message.
    pub fn message(&self) -> Option<String> {
        match &self.error {
            Some(Value::String(message)) => return Some(message.clone()),
            Some(Value::Object(obj)) => {
                if let Some(Value::String(message)) = obj.get("message") {
                    return Some(message.clone());
                }
            }
            _ => {}
        }
        self.message.clone()
    }

    /// Extracts the error code, if the provider sent one.
    pub fn code(&self) -> Option<String> {
        let nested = match &self.error {
            Some(Value::Object(obj)) => obj.get("code").or_else(|| obj.get("type")),
            _ => None,
        };
        nested.or(self.code.as_ref()).and_then(value_to_code)
    }
}

pub(crate) fn value_to_code(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
