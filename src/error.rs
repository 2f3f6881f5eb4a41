//! Error types and handling for the AlphaESS bridge
//!
//! Every failure the poller can meet is classified here. Components downgrade
//! most of them to a logged warning plus a safe fallback; only configuration
//! problems in ad-hoc queries travel back to a caller.

use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Main error type for the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Required configuration (serial, credential seed) missing or invalid
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Network, timeout or non-2xx HTTP failures
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Login or refresh rejected by the vendor
    #[error("Authentication error ({code}): {message}")]
    Auth { code: i64, message: String },

    /// The vendor reported that the refresh key is no longer valid
    #[error("Refresh token expired")]
    ExpiredRefreshToken,

    /// Body was not JSON or lacked expected fields
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// Vendor returned a success envelope without data
    #[error("Empty payload from {endpoint}")]
    EmptyPayload { endpoint: String },

    /// Vendor returned a non-success code outside of authentication
    #[error("Vendor rejected request ({code}): {message}")]
    Rejected { code: i64, message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// HTTP server errors
    #[error("Web server error: {message}")]
    Web { message: String },
}

impl BridgeError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        BridgeError::Config {
            message: message.into(),
        }
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        BridgeError::Transport {
            message: message.into(),
        }
    }

    /// Create a new authentication error
    pub fn auth<S: Into<String>>(code: i64, message: S) -> Self {
        BridgeError::Auth {
            code,
            message: message.into(),
        }
    }

    /// Create a new parse error
    pub fn parse<S: Into<String>>(message: S) -> Self {
        BridgeError::Parse {
            message: message.into(),
        }
    }

    /// Create a new empty-payload error
    pub fn empty_payload<S: Into<String>>(endpoint: S) -> Self {
        BridgeError::EmptyPayload {
            endpoint: endpoint.into(),
        }
    }

    /// Create a new vendor rejection error
    pub fn rejected<S: Into<String>>(code: i64, message: S) -> Self {
        BridgeError::Rejected {
            code,
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        BridgeError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        BridgeError::Io {
            message: message.into(),
        }
    }

    /// Create a new web error
    pub fn web<S: Into<String>>(message: S) -> Self {
        BridgeError::Web {
            message: message.into(),
        }
    }

    /// Soft failures that the realtime path answers with a fallback instead of
    /// skipping the tick
    pub fn is_unusable_payload(&self) -> bool {
        matches!(
            self,
            BridgeError::Parse { .. } | BridgeError::EmptyPayload { .. }
        )
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for BridgeError {
    fn from(err: serde_yaml::Error) -> Self {
        BridgeError::config(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::parse(err.to_string())
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BridgeError::parse(err.to_string())
        } else {
            BridgeError::transport(err.to_string())
        }
    }
}
