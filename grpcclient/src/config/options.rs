//! Call and dial option bundles.
//!
//! - [`CallOptions`]: limits and codec attached to every outgoing call
//! - [`KeepaliveParams`]: connection liveness probing
//! - [`DialOptions`]: everything connection establishment consumes

use std::time::Duration;

use grpcclient_core::Compression;

use crate::interceptor::InterceptorChain;
use crate::transport::TransportSecurity;

/// Options attached to every outgoing call.
///
/// Read-only once built by [`ClientConfig::call_options`].
///
/// [`ClientConfig::call_options`]: crate::ClientConfig::call_options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    /// Largest response message accepted, in bytes.
    pub max_recv_size: usize,
    /// Largest request message sent, in bytes.
    pub max_send_size: usize,
    /// Codec used for request payloads, if any.
    pub compression: Option<Compression>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            max_recv_size: super::defaults::MAX_RECV_MSG_SIZE,
            max_send_size: super::defaults::MAX_SEND_MSG_SIZE,
            compression: None,
        }
    }
}

/// Keepalive probing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveParams {
    /// Idle time after which the client pings the server.
    pub time: Duration,
    /// How long to wait for ping activity before closing the connection.
    pub timeout: Duration,
    /// Whether pings are sent with no active stream.
    pub permit_without_stream: bool,
}

impl KeepaliveParams {
    /// Build keepalive parameters from whole seconds.
    ///
    /// Pings are always permitted without an active stream.
    pub fn from_secs(time: u64, timeout: u64) -> Self {
        Self {
            time: Duration::from_secs(time),
            timeout: Duration::from_secs(timeout),
            permit_without_stream: true,
        }
    }
}

/// The options bundle consumed when establishing a connection.
///
/// Produced by [`ClientConfig::dial_options`] and handed to a
/// [`Connector`](crate::transport::Connector).
///
/// [`ClientConfig::dial_options`]: crate::ClientConfig::dial_options
#[derive(Debug, Clone)]
pub struct DialOptions {
    /// Transport-level security resolved by the security collaborator.
    pub security: TransportSecurity,
    /// Default options for every call on the connection.
    pub call_options: CallOptions,
    /// Composed unary pipeline, policy interceptors included.
    pub unary_interceptor: InterceptorChain,
    /// Composed streaming pipeline.
    pub stream_interceptor: InterceptorChain,
    /// Keepalive probing.
    pub keepalive: KeepaliveParams,
}
