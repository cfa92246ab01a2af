//! Client handle.
//!
//! [`Client`] drives a [`Transport`] through the composed interceptor
//! chains of a [`DialOptions`] bundle.

use std::sync::Arc;

use http::HeaderValue;
use http::header::HeaderName;
#[cfg(feature = "tracing")]
use tracing::{Instrument, info_span};

use crate::ClientError;
use crate::config::{CallOptions, DialOptions};
use crate::interceptor::{
    StreamFunc, StreamRequest, Streaming, UnaryFunc, UnaryRequest, UnaryResponse,
};
use crate::transport::{Connector, Transport};

/// Metadata key naming the request payload codec.
pub const GRPC_ENCODING_HEADER: HeaderName = HeaderName::from_static("grpc-encoding");

/// A connected client.
///
/// Cheap to clone; clones share the connection and the composed chains,
/// including the rate limiter.
///
/// # Example
///
/// ```ignore
/// use grpcclient::{Client, ClientConfig, UnaryRequest};
///
/// let options = ClientConfig::new()
///     .rate_limit(100.0, 10)
///     .backoff_on_ratelimits(true)
///     .dial_options(Vec::new(), Vec::new(), 20, 10)?;
///
/// let client = Client::connect(&connector, "dns:///api.internal:443", &options).await?;
/// let response = client
///     .unary(UnaryRequest::new("/pkg.Service/Method", body).with_timeout(timeout))
///     .await?;
/// ```
#[derive(Clone)]
pub struct Client {
    unary: UnaryFunc,
    stream: StreamFunc,
    call_options: CallOptions,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("call_options", &self.call_options)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Connect through `connector` and wrap the resulting transport.
    pub async fn connect(
        connector: &dyn Connector,
        target: &str,
        options: &DialOptions,
    ) -> Result<Self, ClientError> {
        let transport = connector.connect(target, options).await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %target, tls = options.security.is_tls(), "connected");

        Ok(Self::new(transport, options))
    }

    /// Wrap an established transport with the composed chains.
    pub fn new(transport: Arc<dyn Transport>, options: &DialOptions) -> Self {
        Self {
            unary: options.unary_interceptor.wrap_unary(raw_unary(transport.clone())),
            stream: options.stream_interceptor.wrap_stream(raw_stream(transport)),
            call_options: options.call_options,
        }
    }

    /// Options stamped onto every call.
    pub fn call_options(&self) -> CallOptions {
        self.call_options
    }

    /// Perform a unary call.
    ///
    /// The request's deadline and cancellation token bound the whole call,
    /// retries and backoff included.
    pub async fn unary(&self, mut request: UnaryRequest) -> Result<UnaryResponse, ClientError> {
        request.options = self.call_options;

        let deadline = request.deadline;
        let cancellation = request.cancellation.clone();

        #[cfg(feature = "tracing")]
        let span = info_span!(
            "rpc.call",
            rpc.method = %request.procedure,
            rpc.type = "unary",
            otel.kind = "client",
        );

        let call = (self.unary)(request);
        #[cfg(feature = "tracing")]
        let call = call.instrument(span);

        let expired = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(ClientError::canceled("call canceled")),
            _ = expired => Err(ClientError::deadline_exceeded("deadline exceeded")),
            result = call => result,
        }
    }

    /// Open a streaming call.
    ///
    /// Streaming calls go through the caller's stream interceptors only.
    pub async fn stream(&self, mut request: StreamRequest) -> Result<Streaming, ClientError> {
        request.options = self.call_options;

        #[cfg(feature = "tracing")]
        let span = info_span!(
            "rpc.call",
            rpc.method = %request.procedure,
            rpc.type = "stream",
            otel.kind = "client",
        );

        let cancellation = request.cancellation.clone();
        let call = (self.stream)(request);
        #[cfg(feature = "tracing")]
        let call = call.instrument(span);

        tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(ClientError::canceled("call canceled")),
            result = call => result,
        }
    }
}

/// The innermost unary call: size limits, codec metadata, then the
/// transport.
fn raw_unary(transport: Arc<dyn Transport>) -> UnaryFunc {
    Arc::new(move |mut request: UnaryRequest| {
        let transport = transport.clone();
        Box::pin(async move {
            let options = request.options;
            check_size(request.body.len(), options.max_send_size)?;
            stamp_encoding(&mut request.metadata, &options);

            let response = transport.unary(request).await?;
            check_size(response.body.len(), options.max_recv_size)?;
            Ok(response)
        })
    })
}

/// The innermost streaming call. Each inbound message is checked against
/// the receive limit; outbound messages are left to the transport.
fn raw_stream(transport: Arc<dyn Transport>) -> StreamFunc {
    use futures::StreamExt;

    Arc::new(move |mut request: StreamRequest| {
        let transport = transport.clone();
        Box::pin(async move {
            let options = request.options;
            stamp_encoding(&mut request.metadata, &options);

            let streaming = transport.stream(request).await?;
            let max_recv = options.max_recv_size;
            Ok(Streaming {
                metadata: streaming.metadata,
                inbound: streaming
                    .inbound
                    .map(move |message| {
                        message.and_then(|message| {
                            check_size(message.len(), max_recv).map(|()| message)
                        })
                    })
                    .boxed(),
            })
        })
    })
}

fn stamp_encoding(metadata: &mut http::HeaderMap, options: &CallOptions) {
    if let Some(compression) = options.compression {
        metadata.insert(
            GRPC_ENCODING_HEADER,
            HeaderValue::from_static(compression.as_str()),
        );
    }
}

fn check_size(size: usize, limit: usize) -> Result<(), ClientError> {
    if size > limit {
        return Err(ClientError::MessageTooLarge { size, limit });
    }
    Ok(())
}
