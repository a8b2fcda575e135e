//! Error types for relaychat.
//!
//! Every failure that can end a stream is folded into one of four kinds
//! (validation, transport, provider, timeout) so the session can resolve it
//! into an ordinary `streaming -> idle` transition instead of a crash.

use std::error;
use std::fmt;
use std::io;
use std::str::Utf8Error;
use std::sync::Arc;

/// The coarse classification callers use to decide how to present a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A submission or request was rejected before any state changed.
    Validation,
    /// The relay could not be reached or the byte stream broke.
    Transport,
    /// The model backend reported a failure.
    Provider,
    /// The execution ceiling was exceeded.
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Transport => "TransportError",
            ErrorKind::Provider => "ProviderError",
            ErrorKind::Timeout => "TimeoutError",
        };
        f.write_str(name)
    }
}

/// The main error type for relaychat.
#[derive(Clone, Debug)]
pub enum Error {
    /// Input failed validation.
    Validation {
        /// Human-readable error message.
        message: String,
        /// Parameter that failed validation.
        param: Option<String>,
    },

    /// Network failure talking to the relay or the provider.
    Transport {
        /// Human-readable error message.
        message: String,
        /// HTTP status code, when the peer answered at all.
        status_code: Option<u16>,
        /// Underlying cause.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// The model backend returned a failure.
    Provider {
        /// Human-readable error message.
        message: String,
        /// HTTP status code returned by the provider, if any.
        status_code: Option<u16>,
    },

    /// The execution ceiling was exceeded.
    Timeout {
        /// Human-readable error message.
        message: String,
        /// Duration of the timeout in seconds.
        duration: Option<f64>,
    },

    /// Error during JSON or YAML serialization or deserialization.
    Serialization {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// I/O error.
    Io {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Arc<io::Error>,
    },

    /// Encoding/decoding error.
    Encoding {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// A URL parsing error.
    Url {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<url::ParseError>,
    },

    /// Invalid configuration.
    Config {
        /// Human-readable error message.
        message: String,
    },
}

impl Error {
    /// Creates a new validation error.
    pub fn validation(message: impl Into<String>, param: Option<String>) -> Self {
        Error::Validation {
            message: message.into(),
            param,
        }
    }

    /// Creates a new transport error.
    pub fn transport(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Transport {
            message: message.into(),
            status_code: None,
            source: source.map(Arc::from),
        }
    }

    /// Creates a new transport error for an unexpected HTTP status.
    pub fn transport_status(message: impl Into<String>, status_code: u16) -> Self {
        Error::Transport {
            message: message.into(),
            status_code: Some(status_code),
            source: None,
        }
    }

    /// Creates a new provider error.
    pub fn provider(message: impl Into<String>, status_code: Option<u16>) -> Self {
        Error::Provider {
            message: message.into(),
            status_code,
        }
    }

    /// Creates a new timeout error.
    pub fn timeout(message: impl Into<String>, duration: Option<f64>) -> Self {
        Error::Timeout {
            message: message.into(),
            duration,
        }
    }

    /// Creates a new serialization error.
    pub fn serialization(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Serialization {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new I/O error.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source: Arc::new(source),
        }
    }

    /// Creates a new encoding error.
    pub fn encoding(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Encoding {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new URL error.
    pub fn url(message: impl Into<String>, source: Option<url::ParseError>) -> Self {
        Error::Url {
            message: message.into(),
            source,
        }
    }

    /// Creates a new configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// Classifies this error into one of the kinds the session reports.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. } | Error::Url { .. } | Error::Config { .. } => {
                ErrorKind::Validation
            }
            Error::Transport { .. }
            | Error::Io { .. }
            | Error::Serialization { .. }
            | Error::Encoding { .. } => ErrorKind::Transport,
            Error::Provider { .. } => ErrorKind::Provider,
            Error::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Returns true if this error is a validation error.
    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    /// Returns true if this error is a transport error.
    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// Returns true if this error came from the model backend.
    pub fn is_provider(&self) -> bool {
        self.kind() == ErrorKind::Provider
    }

    /// Returns true if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    /// Returns the status code associated with this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Transport { status_code, .. } | Error::Provider { status_code, .. } => {
                *status_code
            }
            _ => None,
        }
    }

    /// Returns the bare message without the kind prefix used by `Display`.
    pub fn message(&self) -> &str {
        match self {
            Error::Validation { message, .. }
            | Error::Transport { message, .. }
            | Error::Provider { message, .. }
            | Error::Timeout { message, .. }
            | Error::Serialization { message, .. }
            | Error::Io { message, .. }
            | Error::Encoding { message, .. }
            | Error::Url { message, .. }
            | Error::Config { message } => message,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation { message, param } => {
                if let Some(param) = param {
                    write!(f, "Validation error: {message} (parameter: {param})")
                } else {
                    write!(f, "Validation error: {message}")
                }
            }
            Error::Transport {
                message,
                status_code,
                ..
            } => {
                if let Some(status_code) = status_code {
                    write!(f, "Transport error: {message} (status {status_code})")
                } else {
                    write!(f, "Transport error: {message}")
                }
            }
            Error::Provider {
                message,
                status_code,
            } => {
                if let Some(status_code) = status_code {
                    write!(f, "Provider error: {message} (status {status_code})")
                } else {
                    write!(f, "Provider error: {message}")
                }
            }
            Error::Timeout { message, duration } => {
                if let Some(duration) = duration {
                    write!(f, "Timeout error: {message} ({duration} seconds)")
                } else {
                    write!(f, "Timeout error: {message}")
                }
            }
            Error::Serialization { message, .. } => {
                write!(f, "Serialization error: {message}")
            }
            Error::Io { message, .. } => {
                write!(f, "I/O error: {message}")
            }
            Error::Encoding { message, .. } => {
                write!(f, "Encoding error: {message}")
            }
            Error::Url { message, .. } => {
                write!(f, "URL error: {message}")
            }
            Error::Config { message } => {
                write!(f, "Configuration error: {message}")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Transport { source, .. }
            | Error::Serialization { source, .. }
            | Error::Encoding { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Io { source, .. } => Some(source.as_ref()),
            Error::Url { source, .. } => {
                source.as_ref().map(|e| e as &(dyn error::Error + 'static))
            }
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err.to_string(), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(format!("JSON error: {err}"), Some(Box::new(err)))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::serialization(format!("YAML error: {err}"), Some(Box::new(err)))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::url(format!("URL parse error: {err}"), Some(err))
    }
}

impl From<Utf8Error> for Error {
    fn from(err: Utf8Error) -> Self {
        Error::encoding(format!("UTF-8 error: {err}"), Some(Box::new(err)))
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::encoding(format!("base64 error: {err}"), Some(Box::new(err)))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::timeout(format!("Request timed out: {err}"), None)
        } else if err.is_connect() {
            Error::transport(format!("Connection error: {err}"), Some(Box::new(err)))
        } else if err.is_decode() {
            Error::serialization(format!("Failed to decode body: {err}"), Some(Box::new(err)))
        } else {
            Error::transport(format!("Request failed: {err}"), Some(Box::new(err)))
        }
    }
}

/// A specialized Result type for relaychat operations.
pub type Result<T> = std::result::Result<T, Error>;
