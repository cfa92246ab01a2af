//! Transport boundary.
//!
//! The decoration layer does not speak the wire protocol. It hands
//! [`DialOptions`] to a [`Connector`], which returns a [`Transport`] that
//! performs raw unary and streaming calls. Transport security is resolved
//! beforehand by a [`SecurityProvider`]; see [`tls`].

pub mod tls;

use std::sync::Arc;

use crate::ClientError;
use crate::config::DialOptions;
use crate::interceptor::{BoxFuture, StreamRequest, Streaming, UnaryRequest, UnaryResponse};

pub use tls::{SecurityProvider, TlsClientConfig, TlsVersion, TransportSecurity};

/// An established connection that performs raw calls.
pub trait Transport: Send + Sync {
    /// Perform one unary call.
    fn unary(&self, request: UnaryRequest) -> BoxFuture<'static, Result<UnaryResponse, ClientError>>;

    /// Open a streaming call.
    fn stream(&self, request: StreamRequest) -> BoxFuture<'static, Result<Streaming, ClientError>>;
}

/// Establishes connections from assembled dial options.
pub trait Connector: Send + Sync {
    /// Connect to `target`.
    fn connect<'a>(
        &'a self,
        target: &'a str,
        options: &'a DialOptions,
    ) -> BoxFuture<'a, Result<Arc<dyn Transport>, ClientError>>;
}
