//! Error types for the client decoration layer.
//!
//! - [`ClientError`]: everything a call can fail with
//! - [`ConfigError`]: invalid client configuration, reported by validation
//! - [`SecurityError`]: failures from the transport-security collaborator
//! - [`DialError`]: failure to assemble connection options

use std::path::PathBuf;
use std::time::Duration;

use grpcclient_core::{Code, UnsupportedCompression};

/// Call-path error variants.
///
/// Every variant maps onto a gRPC [`Code`] through [`ClientError::code`], but
/// the policy-relevant conditions are distinct variants so they can be
/// matched on without inspecting messages.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    /// A status returned by the server or synthesized by the client.
    #[error("{code}: {}", .message.as_deref().unwrap_or("<no message>"))]
    Status {
        code: Code,
        message: Option<String>,
    },

    /// The client-side rate limiter had no capacity for this attempt.
    #[error("rate limited: {message}")]
    RateLimited { message: String },

    /// Every permitted attempt was rejected by a rate limit.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Total attempts made, the initial one included.
        attempts: u32,
        /// The rejection returned by the final attempt.
        last: Box<ClientError>,
    },

    /// A message exceeded the configured send or receive limit.
    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },

    /// Transport-level error (connection failed, reset, etc.).
    #[error("transport error: {0}")]
    Transport(String),

    /// Protocol error (malformed metadata, unexpected data, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Create a new status error with a code and message.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        ClientError::Status {
            code,
            message: Some(message.into()),
        }
    }

    /// Create a new status error with just a code.
    pub fn from_code(code: Code) -> Self {
        ClientError::Status {
            code,
            message: None,
        }
    }

    /// Create a rate-limit rejection.
    pub fn rate_limited<S: Into<String>>(message: S) -> Self {
        ClientError::RateLimited {
            message: message.into(),
        }
    }

    /// Create a deadline exceeded error.
    pub fn deadline_exceeded<S: Into<String>>(message: S) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    /// Create a canceled error.
    pub fn canceled<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Canceled, message)
    }

    /// Create an unavailable error.
    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unavailable, message)
    }

    /// Create an invalid argument error.
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// Get the error code.
    ///
    /// For non-Status variants, returns an appropriate code:
    /// - RateLimited / RetriesExhausted / MessageTooLarge: `ResourceExhausted`
    /// - Transport: `Unavailable`
    /// - Protocol: `Internal`
    pub fn code(&self) -> Code {
        match self {
            ClientError::Status { code, .. } => *code,
            ClientError::RateLimited { .. }
            | ClientError::RetriesExhausted { .. }
            | ClientError::MessageTooLarge { .. } => Code::ResourceExhausted,
            ClientError::Transport(_) => Code::Unavailable,
            ClientError::Protocol(_) => Code::Internal,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> Option<&str> {
        match self {
            ClientError::Status { message, .. } => message.as_deref(),
            ClientError::RateLimited { message } => Some(message),
            ClientError::RetriesExhausted { last, .. } => last.message(),
            ClientError::MessageTooLarge { .. } => None,
            ClientError::Transport(msg) | ClientError::Protocol(msg) => Some(msg),
        }
    }

    /// Returns whether this error is a rate-limit rejection.
    ///
    /// True for client-side [`ClientError::RateLimited`] rejections and for
    /// `ResourceExhausted` statuses returned by the server. This is the only
    /// condition the backoff retry interceptor retries.
    /// [`ClientError::RetriesExhausted`] and [`ClientError::MessageTooLarge`]
    /// share the code but are terminal.
    ///
    /// ```
    /// use grpcclient::ClientError;
    /// use grpcclient::Code;
    ///
    /// assert!(ClientError::rate_limited("no tokens").is_rate_limited());
    /// assert!(ClientError::new(Code::ResourceExhausted, "quota").is_rate_limited());
    /// assert!(!ClientError::unavailable("down").is_rate_limited());
    /// ```
    pub fn is_rate_limited(&self) -> bool {
        match self {
            ClientError::RateLimited { .. } => true,
            ClientError::Status { code, .. } => code.is_rate_limit(),
            _ => false,
        }
    }

    /// Returns whether retries were exhausted.
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, ClientError::RetriesExhausted { .. })
    }
}

/// Invalid client configuration.
///
/// Reported by validation, before any connection is attempted.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The compression codec name is not one of the supported values.
    #[error(transparent)]
    UnsupportedCompression(#[from] UnsupportedCompression),

    /// A message size limit was zero.
    #[error("{field} must be a positive number of bytes")]
    InvalidMessageSize { field: &'static str },

    /// The rate limit was negative or not a finite number.
    #[error("rate limit must be a finite, non-negative number of events per second, got {0}")]
    InvalidRateLimit(f64),

    /// The backoff policy's minimum delay exceeds its maximum delay.
    #[error("backoff min period {min:?} must not exceed max period {max:?}")]
    InvalidBackoff { min: Duration, max: Duration },

    /// The backoff jitter factor was not a finite number in `0.0..=1.0`.
    #[error("backoff jitter must be between 0.0 and 1.0, got {0}")]
    InvalidJitter(f64),
}

/// Failure to resolve transport-security options.
#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    /// A certificate or key file could not be read or parsed.
    #[error("failed to load {kind} from {path}: {message}")]
    Pem {
        kind: &'static str,
        path: PathBuf,
        message: String,
    },

    /// Exactly one of the client certificate and key was configured.
    #[error("client certificate and key must be configured together")]
    IncompleteClientAuth,

    /// No rustls crypto provider is compiled in or installed.
    #[error(
        "TLS requires a crypto provider: enable `tls-ring` or `tls-aws-lc`, \
         or install one via `CryptoProvider::install_default()`"
    )]
    NoCryptoProvider,

    /// The configured server name is not a valid DNS name or IP address.
    #[error("invalid TLS server name: {0}")]
    InvalidServerName(String),

    /// rustls rejected the configuration.
    #[error("TLS configuration error: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Failure to assemble dial options.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Security(#[from] SecurityError),
}
