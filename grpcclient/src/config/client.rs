//! Client configuration and dial-option assembly.

use std::sync::Arc;

use grpcclient_core::Compression;
use serde::{Deserialize, Serialize};

use super::backoff::BackoffPolicy;
use super::defaults;
use super::options::{CallOptions, DialOptions, KeepaliveParams};
use crate::interceptor::Interceptor;
use crate::policy::{compose_stream, compose_unary};
use crate::transport::{SecurityProvider, TlsClientConfig};
use crate::{ConfigError, DialError};

/// Configuration for a gRPC client connection.
///
/// Deserializes from partial documents; every missing field takes its
/// default. Field names follow the flag/YAML surface of the service
/// configuration (`max_recv_msg_size`, `grpc_compression`, ...), with the TLS
/// fields inlined.
///
/// # Example
///
/// ```
/// use grpcclient::{BackoffPolicy, ClientConfig};
///
/// let config = ClientConfig::new()
///     .compression("gzip")
///     .rate_limit(50.0, 10)
///     .backoff_on_ratelimits(true)
///     .backoff(BackoffPolicy::new().max_retries(3));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Largest response message accepted, in bytes.
    pub max_recv_msg_size: usize,
    /// Largest request message sent, in bytes.
    pub max_send_msg_size: usize,
    /// Compression codec name: `gzip`, `snappy`, or empty for none.
    pub grpc_compression: String,
    /// Client-side rate limit in requests per second. Zero disables it.
    pub rate_limit: f64,
    /// Bucket capacity for the rate limiter.
    pub rate_limit_burst: u32,
    /// Retry calls rejected by a rate limit.
    pub backoff_on_ratelimits: bool,
    /// Backoff between rate-limited attempts.
    pub backoff_config: BackoffPolicy,
    /// Enable TLS on the connection.
    pub tls_enabled: bool,
    /// TLS material, used when `tls_enabled` is set.
    #[serde(flatten)]
    pub tls: TlsClientConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_recv_msg_size: defaults::MAX_RECV_MSG_SIZE,
            max_send_msg_size: defaults::MAX_SEND_MSG_SIZE,
            grpc_compression: String::new(),
            rate_limit: 0.0,
            rate_limit_burst: 0,
            backoff_on_ratelimits: false,
            backoff_config: BackoffPolicy::default(),
            tls_enabled: false,
            tls: TlsClientConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum response message size.
    pub fn max_recv_msg_size(mut self, size: usize) -> Self {
        self.max_recv_msg_size = size;
        self
    }

    /// Set the maximum request message size.
    pub fn max_send_msg_size(mut self, size: usize) -> Self {
        self.max_send_msg_size = size;
        self
    }

    /// Set the compression codec name.
    pub fn compression(mut self, name: impl Into<String>) -> Self {
        self.grpc_compression = name.into();
        self
    }

    /// Set the client-side rate limit and burst.
    pub fn rate_limit(mut self, rate: f64, burst: u32) -> Self {
        self.rate_limit = rate;
        self.rate_limit_burst = burst;
        self
    }

    /// Enable or disable retrying rate-limited calls.
    pub fn backoff_on_ratelimits(mut self, enabled: bool) -> Self {
        self.backoff_on_ratelimits = enabled;
        self
    }

    /// Set the backoff policy.
    pub fn backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff_config = policy;
        self
    }

    /// Enable TLS with the given material.
    pub fn tls(mut self, tls: TlsClientConfig) -> Self {
        self.tls_enabled = true;
        self.tls = tls;
        self
    }

    /// Parse the configured compression codec.
    pub fn parsed_compression(&self) -> Result<Option<Compression>, ConfigError> {
        Ok(Compression::from_name(&self.grpc_compression)?)
    }

    /// Validate the configuration.
    ///
    /// Checks run in field order and the first failure is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.parsed_compression()?;

        if self.max_recv_msg_size == 0 {
            return Err(ConfigError::InvalidMessageSize {
                field: "max_recv_msg_size",
            });
        }
        if self.max_send_msg_size == 0 {
            return Err(ConfigError::InvalidMessageSize {
                field: "max_send_msg_size",
            });
        }

        if !self.rate_limit.is_finite() || self.rate_limit < 0.0 {
            return Err(ConfigError::InvalidRateLimit(self.rate_limit));
        }

        self.backoff_config.validate()
    }

    /// Build the options attached to every call.
    pub fn call_options(&self) -> Result<CallOptions, ConfigError> {
        Ok(CallOptions {
            max_recv_size: self.max_recv_msg_size,
            max_send_size: self.max_send_msg_size,
            compression: self.parsed_compression()?,
        })
    }

    /// Assemble dial options, resolving transport security from the
    /// configured TLS material.
    ///
    /// Keepalive time and timeout are given in seconds.
    pub fn dial_options(
        &self,
        unary: Vec<Arc<dyn Interceptor>>,
        stream: Vec<Arc<dyn Interceptor>>,
        keepalive_time_secs: u64,
        keepalive_timeout_secs: u64,
    ) -> Result<DialOptions, DialError> {
        self.dial_options_with(
            &self.tls,
            unary,
            stream,
            keepalive_time_secs,
            keepalive_timeout_secs,
        )
    }

    /// Assemble dial options using an explicit security provider.
    ///
    /// The configuration is validated first. A security failure is returned
    /// unchanged.
    pub fn dial_options_with(
        &self,
        security: &dyn SecurityProvider,
        unary: Vec<Arc<dyn Interceptor>>,
        stream: Vec<Arc<dyn Interceptor>>,
        keepalive_time_secs: u64,
        keepalive_timeout_secs: u64,
    ) -> Result<DialOptions, DialError> {
        self.validate()?;

        let security = security.transport_security(self.tls_enabled)?;
        let unary_interceptor = compose_unary(self, unary);
        let stream_interceptor = compose_stream(stream);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            unary = ?unary_interceptor.names(),
            stream = ?stream_interceptor.names(),
            tls = self.tls_enabled,
            "assembled dial options"
        );

        Ok(DialOptions {
            security,
            call_options: self.call_options()?,
            unary_interceptor,
            stream_interceptor,
            keepalive: KeepaliveParams::from_secs(keepalive_time_secs, keepalive_timeout_secs),
        })
    }
}
