use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Main error type for the push-pull rate limiting service
#[derive(Debug)]
pub enum RatelimitError {
    /// Configuration or CLI argument errors
    Config(String),

    /// Caller supplied an invalid admission request
    Validation(String),

    /// A single inbound event could not be applied
    MalformedEvent(String),

    /// No counter exists for the requested identifier
    NotFound(String),

    /// Outbound queue for a peer is full
    CapacityExceeded(String),

    /// Push-pull calls between nodes failed or timed out
    Transport(String),

    /// System I/O errors
    Io(std::io::Error),

    /// Serialization/deserialization errors
    Serialization(SerializationError),

    /// Internal channel or task errors
    Concurrency(String),
}

/// Serialization related errors
#[derive(Debug)]
pub enum SerializationError {
    /// JSON serialization/deserialization errors
    Json(serde_json::Error),

    /// Binary encoding errors
    Encode(bincode::error::EncodeError),

    /// Binary decoding errors
    Decode(bincode::error::DecodeError),
}

impl fmt::Display for RatelimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RatelimitError::Config(msg) => write!(f, "Configuration error: {}", msg),
            RatelimitError::Validation(msg) => write!(f, "Validation error: {}", msg),
            RatelimitError::MalformedEvent(msg) => write!(f, "Malformed event: {}", msg),
            RatelimitError::NotFound(msg) => write!(f, "Not found: {}", msg),
            RatelimitError::CapacityExceeded(msg) => write!(f, "Capacity exceeded: {}", msg),
            RatelimitError::Transport(msg) => write!(f, "Transport error: {}", msg),
            RatelimitError::Io(err) => write!(f, "I/O error: {}", err),
            RatelimitError::Serialization(err) => write!(f, "Serialization error: {}", err),
            RatelimitError::Concurrency(msg) => write!(f, "Concurrency error: {}", msg),
        }
    }
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializationError::Json(err) => write!(f, "JSON: {}", err),
            SerializationError::Encode(err) => write!(f, "Binary encode: {}", err),
            SerializationError::Decode(err) => write!(f, "Binary decode: {}", err),
        }
    }
}

impl std::error::Error for RatelimitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RatelimitError::Io(err) => Some(err),
            RatelimitError::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl std::error::Error for SerializationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SerializationError::Json(err) => Some(err),
            SerializationError::Encode(err) => Some(err),
            SerializationError::Decode(err) => Some(err),
        }
    }
}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, RatelimitError>;

impl IntoResponse for RatelimitError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = json!({
            "error": {
                "code": status_code.as_u16(),
                "message": self.user_message(),
                "type": self.error_type(),
            }
        });

        (status_code, Json(error_response)).into_response()
    }
}

impl RatelimitError {
    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RatelimitError::Config(_) => StatusCode::BAD_REQUEST,
            RatelimitError::Validation(_) => StatusCode::BAD_REQUEST,
            RatelimitError::MalformedEvent(_) => StatusCode::BAD_REQUEST,
            RatelimitError::NotFound(_) => StatusCode::NOT_FOUND,
            RatelimitError::CapacityExceeded(_) => StatusCode::SERVICE_UNAVAILABLE,
            RatelimitError::Transport(_) => StatusCode::BAD_GATEWAY,
            RatelimitError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RatelimitError::Serialization(_) => StatusCode::BAD_REQUEST,
            RatelimitError::Concurrency(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            RatelimitError::Config(msg) => format!("Configuration error: {}", msg),
            RatelimitError::Validation(msg) => format!("Invalid request: {}", msg),
            RatelimitError::MalformedEvent(msg) => format!("Malformed event: {}", msg),
            RatelimitError::NotFound(msg) => format!("Not found: {}", msg),
            RatelimitError::CapacityExceeded(_) => {
                "Service temporarily unavailable. Please try again later.".to_string()
            }
            RatelimitError::Transport(_) => {
                "Peer communication failed. Please try again later.".to_string()
            }
            RatelimitError::Io(_) => "Internal server error. Please try again later.".to_string(),
            RatelimitError::Serialization(_) => {
                "Data processing error. Please check your request format.".to_string()
            }
            RatelimitError::Concurrency(_) => {
                "Internal server error. Please try again later.".to_string()
            }
        }
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            RatelimitError::Config(_) => "configuration_error",
            RatelimitError::Validation(_) => "validation_error",
            RatelimitError::MalformedEvent(_) => "malformed_event",
            RatelimitError::NotFound(_) => "not_found",
            RatelimitError::CapacityExceeded(_) => "capacity_exceeded",
            RatelimitError::Transport(_) => "transport_error",
            RatelimitError::Io(_) => "io_error",
            RatelimitError::Serialization(_) => "serialization_error",
            RatelimitError::Concurrency(_) => "concurrency_error",
        }
    }

    /// Transport failures are retried by the reconciler, everything else is not
    pub fn is_retryable(&self) -> bool {
        matches!(self, RatelimitError::Transport(_) | RatelimitError::Io(_))
    }
}

// Conversions from common error types
impl From<std::io::Error> for RatelimitError {
    fn from(err: std::io::Error) -> Self {
        RatelimitError::Io(err)
    }
}

impl From<serde_json::Error> for RatelimitError {
    fn from(err: serde_json::Error) -> Self {
        RatelimitError::Serialization(SerializationError::Json(err))
    }
}

impl From<bincode::error::EncodeError> for RatelimitError {
    fn from(err: bincode::error::EncodeError) -> Self {
        RatelimitError::Serialization(SerializationError::Encode(err))
    }
}

impl From<bincode::error::DecodeError> for RatelimitError {
    fn from(err: bincode::error::DecodeError) -> Self {
        RatelimitError::Serialization(SerializationError::Decode(err))
    }
}

impl From<SerializationError> for RatelimitError {
    fn from(err: SerializationError) -> Self {
        RatelimitError::Serialization(err)
    }
}

impl From<reqwest::Error> for RatelimitError {
    fn from(err: reqwest::Error) -> Self {
        RatelimitError::Transport(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for RatelimitError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        RatelimitError::Transport(format!("deadline exceeded: {}", err))
    }
}

impl From<url::ParseError> for RatelimitError {
    fn from(err: url::ParseError) -> Self {
        RatelimitError::Config(format!("invalid url: {}", err))
    }
}

// Helper macros for common error construction patterns
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::RatelimitError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::RatelimitError::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! validation_error {
    ($msg:expr) => {
        $crate::error::RatelimitError::Validation($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::RatelimitError::Validation(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! malformed_event {
    ($msg:expr) => {
        $crate::error::RatelimitError::MalformedEvent($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::RatelimitError::MalformedEvent(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! transport_error {
    ($msg:expr) => {
        $crate::error::RatelimitError::Transport($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::RatelimitError::Transport(format!($fmt, $($arg)*))
    };
}
