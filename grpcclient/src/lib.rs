//! Client-side call policies for gRPC.
//!
//! This crate is the decoration layer that sits between application code and
//! an established gRPC connection. It does not speak the wire protocol; it
//! validates client configuration, assembles the options a connection is
//! dialed with, and wraps every call in an ordered interceptor pipeline.
//!
//! ## Features
//!
//! - Client-side rate limiting (token bucket, fail fast)
//! - Backoff retry of rate-limited unary calls
//! - Composition of policy interceptors with caller-supplied ones
//! - Message size limits and compression codec selection
//! - TLS through rustls, keepalive parameters
//!
//! ## Example
//!
//! ```ignore
//! use grpcclient::{BackoffPolicy, Client, ClientConfig, UnaryRequest};
//! use std::time::Duration;
//!
//! let config = ClientConfig::new()
//!     .compression("gzip")
//!     .rate_limit(100.0, 20)
//!     .backoff_on_ratelimits(true)
//!     .backoff(BackoffPolicy::new().max_retries(5));
//!
//! let options = config.dial_options(unary_interceptors, stream_interceptors, 20, 10)?;
//! let client = Client::connect(&connector, "dns:///api.internal:443", &options).await?;
//!
//! let response = client
//!     .unary(UnaryRequest::new("/pkg.Service/Method", body).with_timeout(Duration::from_secs(5)))
//!     .await?;
//! ```
//!
//! ## Call Pipeline
//!
//! Unary calls run through, outermost first:
//!
//! ```text
//! retry -> rate_limit -> caller[0] -> ... -> caller[n] -> transport
//! ```
//!
//! Each policy is present only when enabled. The rate limiter sits inside
//! retry, so every attempt is admitted individually, and every retried
//! attempt re-enters the caller's interceptors. Streaming calls run through
//! the caller's stream interceptors only.
//!
//! ## Rate Limiting and Retry
//!
//! With a positive `rate_limit`, each unary attempt takes one token from a
//! bucket of `rate_limit_burst` tokens refilled at `rate_limit` per second.
//! An attempt with no token available fails immediately with
//! [`ClientError::RateLimited`].
//!
//! With `backoff_on_ratelimits` set, rate-limited attempts (client-side
//! rejections and `RESOURCE_EXHAUSTED` statuses alike) are retried after an
//! exponentially growing delay. When `max_retries` retries have failed the
//! call returns [`ClientError::RetriesExhausted`]. Backoff sleeps honor the
//! request's deadline and cancellation token.
//!
//! ## Feature Flags
//!
//! | Feature | Description | Dependencies |
//! |---------|-------------|--------------|
//! | `tls` | `tls-ring` + `tls-native-roots` (default) | |
//! | `tls-ring` | ring crypto provider | `rustls/ring` |
//! | `tls-aws-lc` | AWS LC crypto provider | `rustls/aws-lc-rs` |
//! | `tls-native-roots` | System root certificates | `rustls-native-certs` |
//! | `tls-webpki-roots` | Bundled Mozilla root certificates | `webpki-roots` |
//! | `tracing` | Spans for calls, events for policy decisions (default) | `tracing` |
//!
//! When `tracing` is enabled, each call creates a span with:
//! - `rpc.method`: Full procedure name (e.g., "/package.Service/Method")
//! - `rpc.type`: "unary" or "stream"
//! - `otel.kind`: "client"

mod client;
mod config;
mod error;
mod interceptor;
mod policy;
pub mod transport;

pub use client::{Client, GRPC_ENCODING_HEADER};
pub use config::{
    Backoff, BackoffPolicy, BackoffStep, CallOptions, ClientConfig, DialOptions, KeepaliveParams,
    defaults,
};
pub use error::{ClientError, ConfigError, DialError, SecurityError};
pub use interceptor::{
    BoxFuture, FnInterceptor, HeaderInterceptor, Interceptor, InterceptorChain, StreamFunc,
    StreamRequest, Streaming, UnaryFunc, UnaryNext, UnaryRequest, UnaryResponse,
};
pub use policy::{
    RateLimitInterceptor, RetryInterceptor, Sleep, TokenBucket, TokioSleep, UnaryPolicies,
    compose_stream, compose_unary,
};
pub use transport::{
    Connector, SecurityProvider, TlsClientConfig, TlsVersion, Transport, TransportSecurity,
};

// Re-export core types
pub use grpcclient_core::{Code, Compression, UnsupportedCompression};

// Re-export commonly used external types
pub use bytes::Bytes;
pub use tokio_util::sync::CancellationToken;
