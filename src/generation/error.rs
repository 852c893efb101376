// Error types for the request lifecycle

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// What the HTTP adapter reports when a call does not produce an image
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportFailure {
    /// The server answered with a non-success status
    #[error("server responded with status {status}")]
    Status { status: u16, body: Value },

    /// The request went out but nothing came back
    #[error("no response received: {0}")]
    NoResponse(String),

    /// The request could not be issued at all
    #[error("request could not be issued: {0}")]
    Local(String),
}

/// Classified failure of one submission.
///
/// The `Display` output is the message shown to the user.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestFailure {
    #[error("Error {status}: {}", describe_body(.body))]
    Server { status: u16, body: Value },

    #[error("No response from server. Please check your network connection.")]
    NoResponse,

    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),

    #[error("Request timed out after {} seconds.", format_seconds(.0))]
    Timeout(Duration),
}

impl From<TransportFailure> for RequestFailure {
    fn from(failure: TransportFailure) -> Self {
        match failure {
            TransportFailure::Status { status, body } => Self::Server { status, body },
            TransportFailure::NoResponse(_) => Self::NoResponse,
            TransportFailure::Local(message) => Self::Unexpected(message),
        }
    }
}

/// Submissions rejected before any state changes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Prompt must not be empty")]
    EmptyPrompt,
}

/// Picks the most useful part of an error body: `error`, then `detail`, then everything
fn describe_body(body: &Value) -> String {
    ["error", "detail"]
        .iter()
        .filter_map(|key| body.get(key))
        .find(|value| is_truthy(value))
        .map(|value| match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| body.to_string())
}

/// Whole seconds print without a fraction: `120`, `0.05`
fn format_seconds(duration: &Duration) -> String {
    if duration.subsec_nanos() == 0 {
        duration.as_secs().to_string()
    } else {
        duration.as_secs_f64().to_string()
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
