//! Interceptors for gRPC client calls.
//!
//! An interceptor wraps a call function and returns a new one, so it can
//! inspect or modify the request, delay it, retry it, or short-circuit it.
//! Chains are folded once at construction time into a single callable.
//!
//! # Example
//!
//! ```ignore
//! use grpcclient::{FnInterceptor, HeaderInterceptor, InterceptorChain};
//! use std::sync::Arc;
//!
//! let mut chain = InterceptorChain::new();
//! chain.push(Arc::new(HeaderInterceptor::try_new("authorization", "Bearer token123")?));
//! chain.push(Arc::new(FnInterceptor::unary(|req, next| {
//!     Box::pin(async move {
//!         println!("Calling: {}", req.procedure);
//!         next.call(req).await
//!     })
//! })));
//!
//! let call = chain.wrap_unary(transport_call);
//! let response = call(request).await?;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use http::HeaderMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ClientError;
use crate::config::CallOptions;

/// Type alias for a boxed future returning a result.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A unary RPC request.
///
/// This is a type-erased request: the payload is already encoded. Retry
/// re-sends a clone, so cloning is cheap (`Bytes` and the cancellation token
/// are reference counted).
#[derive(Debug, Clone)]
pub struct UnaryRequest {
    /// The procedure being called (e.g., "/package.Service/Method").
    pub procedure: String,
    /// Request metadata.
    pub metadata: HeaderMap,
    /// Encoded request message.
    pub body: Bytes,
    /// Call options attached by the client.
    pub options: CallOptions,
    /// Point in time after which the call must give up.
    pub deadline: Option<Instant>,
    /// Caller-controlled cancellation signal.
    pub cancellation: CancellationToken,
}

impl UnaryRequest {
    /// Create a new unary request with default options and no deadline.
    pub fn new(procedure: impl Into<String>, body: Bytes) -> Self {
        Self {
            procedure: procedure.into(),
            metadata: HeaderMap::new(),
            body,
            options: CallOptions::default(),
            deadline: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Replace the request metadata.
    pub fn with_metadata(mut self, metadata: HeaderMap) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set an absolute deadline for the call.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline relative to now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Attach a cancellation token controlled by the caller.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Get a mutable reference to the metadata.
    pub fn metadata_mut(&mut self) -> &mut HeaderMap {
        &mut self.metadata
    }

    /// Time left before the deadline, if one is set.
    ///
    /// Returns `Some(Duration::ZERO)` once the deadline has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

/// A unary RPC response.
#[derive(Debug, Clone)]
pub struct UnaryResponse {
    /// Response metadata.
    pub metadata: HeaderMap,
    /// Encoded response message.
    pub body: Bytes,
}

impl UnaryResponse {
    /// Create a new unary response.
    pub fn new(metadata: HeaderMap, body: Bytes) -> Self {
        Self { metadata, body }
    }

    /// Get a mutable reference to the metadata.
    pub fn metadata_mut(&mut self) -> &mut HeaderMap {
        &mut self.metadata
    }
}

/// The signature of a unary RPC call.
///
/// Interceptors wrap this function to add logic before and after the call.
pub type UnaryFunc =
    Arc<dyn Fn(UnaryRequest) -> BoxFuture<'static, Result<UnaryResponse, ClientError>> + Send + Sync>;

/// The "next" function in the interceptor chain.
///
/// Call this to proceed to the next interceptor or the actual RPC call.
#[derive(Clone)]
pub struct UnaryNext {
    inner: UnaryFunc,
}

impl UnaryNext {
    pub(crate) fn new(inner: UnaryFunc) -> Self {
        Self { inner }
    }

    /// Call the next interceptor or the actual RPC.
    pub async fn call(self, request: UnaryRequest) -> Result<UnaryResponse, ClientError> {
        (self.inner)(request).await
    }
}

/// A streaming RPC request.
///
/// Streaming requests are consumed by the call and never retried, so unlike
/// [`UnaryRequest`] they are not `Clone`.
pub struct StreamRequest {
    /// The procedure being called.
    pub procedure: String,
    /// Request metadata, sent before the first message.
    pub metadata: HeaderMap,
    /// Outbound encoded messages.
    pub outbound: BoxStream<'static, Bytes>,
    /// Call options attached by the client.
    pub options: CallOptions,
    /// Caller-controlled cancellation signal.
    pub cancellation: CancellationToken,
}

impl StreamRequest {
    /// Create a new streaming request.
    pub fn new(procedure: impl Into<String>, outbound: BoxStream<'static, Bytes>) -> Self {
        Self {
            procedure: procedure.into(),
            metadata: HeaderMap::new(),
            outbound,
            options: CallOptions::default(),
            cancellation: CancellationToken::new(),
        }
    }
}

impl std::fmt::Debug for StreamRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRequest")
            .field("procedure", &self.procedure)
            .field("metadata", &self.metadata)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// An open streaming RPC.
pub struct Streaming {
    /// Response metadata.
    pub metadata: HeaderMap,
    /// Inbound encoded messages.
    pub inbound: BoxStream<'static, Result<Bytes, ClientError>>,
}

impl std::fmt::Debug for Streaming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Streaming")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// The signature of a streaming RPC call.
pub type StreamFunc =
    Arc<dyn Fn(StreamRequest) -> BoxFuture<'static, Result<Streaming, ClientError>> + Send + Sync>;

/// An interceptor that can wrap unary and streaming RPC calls.
///
/// Both methods default to passing the call through unchanged, so an
/// interceptor only implements the call types it cares about.
pub trait Interceptor: Send + Sync {
    /// A short name identifying this interceptor in diagnostics.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Wrap a unary RPC call.
    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        next
    }

    /// Wrap a streaming RPC call.
    fn wrap_stream(&self, next: StreamFunc) -> StreamFunc {
        next
    }
}

/// An ordered chain of interceptors.
///
/// The first interceptor pushed is the outermost: it sees the request first
/// and the response last.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("interceptors", &self.names())
            .finish()
    }
}

impl InterceptorChain {
    /// Create a new empty interceptor chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an interceptor as the innermost layer.
    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    /// Check if the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Get the number of interceptors in the chain.
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Names of the interceptors, outermost first.
    pub fn names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    /// Wrap a unary function with all interceptors in the chain.
    pub fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        // Apply in reverse so the first interceptor ends up outermost
        self.interceptors
            .iter()
            .rev()
            .fold(next, |wrapped, interceptor| interceptor.wrap_unary(wrapped))
    }

    /// Wrap a streaming function with all interceptors in the chain.
    pub fn wrap_stream(&self, next: StreamFunc) -> StreamFunc {
        self.interceptors
            .iter()
            .rev()
            .fold(next, |wrapped, interceptor| interceptor.wrap_stream(wrapped))
    }
}

impl FromIterator<Arc<dyn Interceptor>> for InterceptorChain {
    fn from_iter<T: IntoIterator<Item = Arc<dyn Interceptor>>>(iter: T) -> Self {
        Self {
            interceptors: iter.into_iter().collect(),
        }
    }
}

impl Interceptor for InterceptorChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        InterceptorChain::wrap_unary(self, next)
    }

    fn wrap_stream(&self, next: StreamFunc) -> StreamFunc {
        InterceptorChain::wrap_stream(self, next)
    }
}

/// An interceptor that adds a metadata entry to every call.
///
/// # Example
///
/// ```ignore
/// use grpcclient::HeaderInterceptor;
///
/// let auth = HeaderInterceptor::try_new("authorization", "Bearer token123")?;
/// ```
#[derive(Clone, Debug)]
pub struct HeaderInterceptor {
    name: http::HeaderName,
    value: http::HeaderValue,
}

impl HeaderInterceptor {
    /// Create a new header interceptor, returning an error if the name or
    /// value is not valid metadata.
    pub fn try_new(name: &str, value: &str) -> Result<Self, ClientError> {
        let name = name
            .parse()
            .map_err(|_| ClientError::Protocol(format!("invalid metadata key: {}", name)))?;
        let value = value
            .parse()
            .map_err(|_| ClientError::Protocol(format!("invalid metadata value: {}", value)))?;
        Ok(Self { name, value })
    }

    /// Create a new header interceptor from pre-parsed values.
    pub fn from_parts(name: http::HeaderName, value: http::HeaderValue) -> Self {
        Self { name, value }
    }
}

impl Interceptor for HeaderInterceptor {
    fn name(&self) -> &'static str {
        "header"
    }

    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        let name = self.name.clone();
        let value = self.value.clone();
        Arc::new(move |mut request: UnaryRequest| {
            request.metadata.insert(name.clone(), value.clone());
            next(request)
        })
    }

    fn wrap_stream(&self, next: StreamFunc) -> StreamFunc {
        let name = self.name.clone();
        let value = self.value.clone();
        Arc::new(move |mut request: StreamRequest| {
            request.metadata.insert(name.clone(), value.clone());
            next(request)
        })
    }
}

/// A closure-based unary interceptor.
///
/// # Example
///
/// ```ignore
/// use grpcclient::{FnInterceptor, UnaryNext, UnaryRequest};
///
/// let logging = FnInterceptor::unary(|req: UnaryRequest, next: UnaryNext| {
///     Box::pin(async move {
///         println!("Calling: {}", req.procedure);
///         next.call(req).await
///     })
/// });
/// ```
#[derive(Clone)]
pub struct FnInterceptor<F> {
    func: F,
}

impl<F> FnInterceptor<F>
where
    F: Fn(UnaryRequest, UnaryNext) -> BoxFuture<'static, Result<UnaryResponse, ClientError>>
        + Send
        + Sync
        + Clone
        + 'static,
{
    /// Create a new closure-based unary interceptor.
    pub fn unary(func: F) -> Self {
        Self { func }
    }
}

impl<F> std::fmt::Debug for FnInterceptor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnInterceptor").finish()
    }
}

impl<F> Interceptor for FnInterceptor<F>
where
    F: Fn(UnaryRequest, UnaryNext) -> BoxFuture<'static, Result<UnaryResponse, ClientError>>
        + Send
        + Sync
        + Clone
        + 'static,
{
    fn name(&self) -> &'static str {
        "fn"
    }

    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        let func = self.func.clone();
        Arc::new(move |request: UnaryRequest| func(request, UnaryNext::new(next.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn capture_unary(captured: Arc<Mutex<Option<HeaderMap>>>) -> UnaryFunc {
        Arc::new(move |req: UnaryRequest| {
            let captured = captured.clone();
            Box::pin(async move {
                *captured.lock().unwrap() = Some(req.metadata.clone());
                Ok(UnaryResponse::new(HeaderMap::new(), Bytes::new()))
            })
        })
    }

    #[test]
    fn test_interceptor_chain_empty() {
        let chain = InterceptorChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.len(), 0);
        assert!(chain.names().is_empty());
    }

    #[test]
    fn test_interceptor_chain_push() {
        let mut chain = InterceptorChain::new();
        chain.push(Arc::new(HeaderInterceptor::try_new("x-test", "value").unwrap()));
        assert!(!chain.is_empty());
        assert_eq!(chain.names(), vec!["header"]);
    }

    #[test]
    fn test_header_interceptor_invalid() {
        assert!(matches!(
            HeaderInterceptor::try_new("bad key\n", "v"),
            Err(ClientError::Protocol(_))
        ));
        assert!(HeaderInterceptor::try_new("x-ok", "bad\nvalue").is_err());
    }

    #[tokio::test]
    async fn test_header_interceptor_unary() {
        let interceptor = HeaderInterceptor::try_new("x-auth", "bearer-token").unwrap();
        let captured = Arc::new(Mutex::new(None));

        let wrapped = interceptor.wrap_unary(capture_unary(captured.clone()));
        wrapped(UnaryRequest::new("/test.Service/Method", Bytes::new()))
            .await
            .unwrap();

        let headers = captured.lock().unwrap().take().unwrap();
        assert_eq!(headers.get("x-auth").unwrap(), "bearer-token");
    }

    #[tokio::test]
    async fn test_header_interceptor_stream() {
        let interceptor = HeaderInterceptor::try_new("x-auth", "bearer-token").unwrap();
        let captured = Arc::new(Mutex::new(None));
        let captured_clone = captured.clone();

        let next: StreamFunc = Arc::new(move |req: StreamRequest| {
            let captured = captured_clone.clone();
            Box::pin(async move {
                *captured.lock().unwrap() = Some(req.metadata.clone());
                Ok(Streaming {
                    metadata: HeaderMap::new(),
                    inbound: Box::pin(futures::stream::empty()),
                })
            })
        });

        let wrapped = interceptor.wrap_stream(next);
        let request =
            StreamRequest::new("/test.Service/Stream", Box::pin(futures::stream::empty()));
        wrapped(request).await.unwrap();

        let headers = captured.lock().unwrap().take().unwrap();
        assert_eq!(headers.get("x-auth").unwrap(), "bearer-token");
    }

    #[tokio::test]
    async fn test_fn_interceptor() {
        let interceptor = FnInterceptor::unary(|mut req, next| {
            Box::pin(async move {
                req.metadata.insert("x-modified", "true".parse().unwrap());
                next.call(req).await
            })
        });
        let captured = Arc::new(Mutex::new(None));

        let wrapped = interceptor.wrap_unary(capture_unary(captured.clone()));
        wrapped(UnaryRequest::new("/test.Service/Method", Bytes::new()))
            .await
            .unwrap();

        let headers = captured.lock().unwrap().take().unwrap();
        assert_eq!(headers.get("x-modified").unwrap(), "true");
    }

    #[tokio::test]
    async fn test_interceptor_chain_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = |label: &'static str| {
            let seen = seen.clone();
            Arc::new(FnInterceptor::unary(move |req, next| {
                seen.lock().unwrap().push(label);
                Box::pin(next.call(req))
            })) as Arc<dyn Interceptor>
        };

        let chain: InterceptorChain = vec![record("first"), record("second"), record("third")]
            .into_iter()
            .collect();

        let wrapped = chain.wrap_unary(capture_unary(Arc::new(Mutex::new(None))));
        wrapped(UnaryRequest::new("/test.Service/Method", Bytes::new()))
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_fn_interceptor_short_circuit() {
        let interceptor = FnInterceptor::unary(|_req, _next| {
            Box::pin(async { Err(ClientError::invalid_argument("blocked")) })
        });
        let captured = Arc::new(Mutex::new(None));

        let wrapped = interceptor.wrap_unary(capture_unary(captured.clone()));
        let err = wrapped(UnaryRequest::new("/test.Service/Method", Bytes::new()))
            .await
            .unwrap_err();

        assert_eq!(err.code(), grpcclient_core::Code::InvalidArgument);
        assert!(captured.lock().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unary_request_remaining() {
        let request = UnaryRequest::new("/test.Service/Method", Bytes::new());
        assert!(request.remaining().is_none());

        let request = request.with_timeout(Duration::from_secs(5));
        assert_eq!(request.remaining(), Some(Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(request.remaining(), Some(Duration::ZERO));
    }
}
