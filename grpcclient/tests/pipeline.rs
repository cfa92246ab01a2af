//! End-to-end behavior of the composed call pipeline, driven through
//! [`Client`] against an in-memory transport.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use grpcclient::{
    BackoffPolicy, BoxFuture, CallOptions, Client, ClientConfig, ClientError, Code, ConfigError,
    Connector, DialError, DialOptions, FnInterceptor, Interceptor, InterceptorChain,
    KeepaliveParams, RateLimitInterceptor, RetryInterceptor, Sleep, StreamRequest, Streaming,
    TokenBucket, Transport, TransportSecurity, UnaryFunc, UnaryPolicies, UnaryRequest,
    UnaryResponse,
};
use bytes::Bytes;
use http::HeaderMap;

type Log = Arc<Mutex<Vec<&'static str>>>;

/// Fails the first `failures` unary calls with `error`, then echoes.
struct ScriptedTransport {
    log: Log,
    calls: AtomicU32,
    failures: u32,
    error: ClientError,
}

impl ScriptedTransport {
    fn new(log: Log, failures: u32, error: ClientError) -> Arc<Self> {
        Arc::new(Self {
            log,
            calls: AtomicU32::new(0),
            failures,
            error,
        })
    }

    fn ok(log: Log) -> Arc<Self> {
        Self::new(log, 0, ClientError::from_code(Code::Unknown))
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    fn unary(&self, request: UnaryRequest) -> BoxFuture<'static, Result<UnaryResponse, ClientError>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.lock().unwrap().push("call");
        let result = if call <= self.failures {
            Err(self.error.clone())
        } else {
            Ok(UnaryResponse::new(HeaderMap::new(), request.body))
        };
        Box::pin(async move { result })
    }

    fn stream(&self, _request: StreamRequest) -> BoxFuture<'static, Result<Streaming, ClientError>> {
        Box::pin(async {
            Ok(Streaming {
                metadata: HeaderMap::new(),
                inbound: Box::pin(futures::stream::empty()),
            })
        })
    }
}

#[derive(Default)]
struct RecordingSleep {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleep {
    fn count(&self) -> usize {
        self.delays.lock().unwrap().len()
    }
}

impl Sleep for RecordingSleep {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.delays.lock().unwrap().push(duration);
        Box::pin(async {})
    }
}

/// Writes "sleep" to the shared log instead of waiting.
struct LoggedSleep(Log);

impl Sleep for LoggedSleep {
    fn sleep(&self, _duration: Duration) -> BoxFuture<'static, ()> {
        self.0.lock().unwrap().push("sleep");
        Box::pin(async {})
    }
}

/// Logs `label` every time the wrapped interceptor's call is entered.
struct Logged {
    label: &'static str,
    inner: Arc<dyn Interceptor>,
    log: Log,
}

impl Logged {
    fn wrap(
        log: &Log,
        label: &'static str,
        inner: impl Interceptor + 'static,
    ) -> Arc<dyn Interceptor> {
        Arc::new(Self {
            label,
            inner: Arc::new(inner),
            log: log.clone(),
        })
    }
}

impl Interceptor for Logged {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        let inner = self.inner.wrap_unary(next);
        let log = self.log.clone();
        let label = self.label;
        Arc::new(move |req: UnaryRequest| {
            log.lock().unwrap().push(label);
            inner(req)
        })
    }
}

fn recorder(log: &Log, label: &'static str) -> Arc<dyn Interceptor> {
    let log = log.clone();
    Arc::new(FnInterceptor::unary(move |req, next| {
        log.lock().unwrap().push(label);
        Box::pin(next.call(req))
    }))
}

fn options(unary: InterceptorChain) -> DialOptions {
    DialOptions {
        security: TransportSecurity::Insecure,
        call_options: CallOptions::default(),
        unary_interceptor: unary,
        stream_interceptor: InterceptorChain::new(),
        keepalive: KeepaliveParams::from_secs(20, 10),
    }
}

fn backoff(max_retries: u32) -> BackoffPolicy {
    BackoffPolicy::new()
        .min_delay(Duration::from_millis(10))
        .max_delay(Duration::from_millis(80))
        .max_retries(max_retries)
        .jitter(0.0)
}

fn request() -> UnaryRequest {
    UnaryRequest::new("/test.v1.Service/Method", Bytes::from_static(b"payload"))
}

fn resource_exhausted() -> ClientError {
    ClientError::new(Code::ResourceExhausted, "server quota")
}

#[tokio::test(start_paused = true)]
async fn test_retried_attempts_reenter_limiter_and_caller_chain() {
    let log: Log = Arc::default();
    let sleep = Arc::new(RecordingSleep::default());
    let bucket = Arc::new(TokenBucket::new(0.001, 2));

    let chain = UnaryPolicies {
        retry: Some(RetryInterceptor::new(backoff(5)).with_sleep(sleep.clone())),
        rate_limit: Some(RateLimitInterceptor::new(bucket.clone())),
    }
    .compose(vec![recorder(&log, "caller0"), recorder(&log, "caller1")]);
    assert_eq!(chain.names(), vec!["retry", "rate_limit", "fn", "fn"]);

    let transport = ScriptedTransport::new(log.clone(), 1, resource_exhausted());
    let client = Client::new(transport.clone(), &options(chain));

    let response = client.unary(request()).await.unwrap();
    assert_eq!(response.body, Bytes::from_static(b"payload"));
    assert_eq!(
        *log.lock().unwrap(),
        vec!["caller0", "caller1", "call", "caller0", "caller1", "call"]
    );
    assert_eq!(sleep.count(), 1);

    // Both attempts took a token
    assert!(bucket.available() < 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_policy_order_holds_for_every_attempt() {
    let log: Log = Arc::default();
    let bucket = Arc::new(TokenBucket::new(0.001, 3));

    let chain: InterceptorChain = [
        Logged::wrap(
            &log,
            "retry",
            RetryInterceptor::new(backoff(5)).with_sleep(Arc::new(LoggedSleep(log.clone()))),
        ),
        Logged::wrap(&log, "rate_limit", RateLimitInterceptor::new(bucket.clone())),
        recorder(&log, "caller0"),
        recorder(&log, "caller1"),
    ]
    .into_iter()
    .collect();
    assert_eq!(chain.names(), vec!["retry", "rate_limit", "fn", "fn"]);

    let transport = ScriptedTransport::new(log.clone(), 2, resource_exhausted());
    let client = Client::new(transport.clone(), &options(chain));

    client.unary(request()).await.unwrap();

    let attempt = ["rate_limit", "caller0", "caller1", "call"];
    let mut expected = vec!["retry"];
    expected.extend(attempt);
    expected.push("sleep");
    expected.extend(attempt);
    expected.push("sleep");
    expected.extend(attempt);
    assert_eq!(*log.lock().unwrap(), expected);
    assert_eq!(transport.calls(), 3);
    assert!(bucket.available() < 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_limiter_rejection_skips_caller_chain() {
    let log: Log = Arc::default();
    let sleep = Arc::new(RecordingSleep::default());

    let chain = UnaryPolicies {
        retry: Some(RetryInterceptor::new(backoff(3)).with_sleep(sleep.clone())),
        rate_limit: Some(RateLimitInterceptor::with_rate(0.001, 1)),
    }
    .compose(vec![recorder(&log, "caller")]);

    let transport = ScriptedTransport::ok(log.clone());
    let client = Client::new(transport.clone(), &options(chain));

    assert!(client.unary(request()).await.is_ok());
    log.lock().unwrap().clear();

    let err = client.unary(request()).await.unwrap_err();
    match err {
        ClientError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 4);
            assert!(matches!(*last, ClientError::RateLimited { .. }));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(sleep.count(), 3);
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_burst_admits_exactly_b_calls() {
    let log: Log = Arc::default();
    let transport = ScriptedTransport::ok(log);
    let options = ClientConfig::new()
        .rate_limit(1.0, 3)
        .dial_options(Vec::new(), Vec::new(), 20, 10)
        .unwrap();
    let client = Client::new(transport.clone(), &options);

    for _ in 0..3 {
        assert!(client.unary(request()).await.is_ok());
    }
    let err = client.unary(request()).await.unwrap_err();
    assert!(matches!(err, ClientError::RateLimited { .. }));
    assert_eq!(transport.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_zero_rate_never_rejects() {
    let log: Log = Arc::default();
    let transport = ScriptedTransport::ok(log);
    let options = ClientConfig::new()
        .rate_limit(0.0, 1)
        .dial_options(Vec::new(), Vec::new(), 20, 10)
        .unwrap();
    assert!(options.unary_interceptor.is_empty());

    let client = Client::new(transport.clone(), &options);
    for _ in 0..1_000 {
        assert!(client.unary(request()).await.is_ok());
    }
    assert_eq!(transport.calls(), 1_000);
}

#[tokio::test]
async fn test_always_rate_limited_exhausts_after_n_plus_one_attempts() {
    let log: Log = Arc::default();
    let sleep = Arc::new(RecordingSleep::default());
    let chain = UnaryPolicies {
        retry: Some(RetryInterceptor::new(backoff(4)).with_sleep(sleep.clone())),
        rate_limit: None,
    }
    .compose(Vec::new());

    let transport = ScriptedTransport::new(log, u32::MAX, ClientError::rate_limited("upstream"));
    let client = Client::new(transport.clone(), &options(chain));

    let err = client.unary(request()).await.unwrap_err();
    assert!(err.is_retries_exhausted());
    assert_eq!(transport.calls(), 5);
    assert_eq!(
        *sleep.delays.lock().unwrap(),
        [10, 20, 40, 80].map(Duration::from_millis)
    );
}

#[tokio::test]
async fn test_k_rejections_then_success_sleeps_k_times() {
    let log: Log = Arc::default();
    let sleep = Arc::new(RecordingSleep::default());
    let chain = UnaryPolicies {
        retry: Some(RetryInterceptor::new(backoff(5)).with_sleep(sleep.clone())),
        rate_limit: None,
    }
    .compose(Vec::new());

    let transport = ScriptedTransport::new(log, 3, resource_exhausted());
    let client = Client::new(transport.clone(), &options(chain));

    assert!(client.unary(request()).await.is_ok());
    assert_eq!(transport.calls(), 4);
    assert_eq!(sleep.count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_disabled_surfaces_rate_limit() {
    let log: Log = Arc::default();
    let transport = ScriptedTransport::ok(log);
    let options = ClientConfig::new()
        .rate_limit(1.0, 1)
        .backoff_on_ratelimits(false)
        .dial_options(Vec::new(), Vec::new(), 20, 10)
        .unwrap();
    let client = Client::new(transport.clone(), &options);

    assert!(client.unary(request()).await.is_ok());
    let err = client.unary(request()).await.unwrap_err();
    assert!(err.is_rate_limited());
    assert_eq!(err.code(), Code::ResourceExhausted);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_expires_mid_backoff() {
    let log: Log = Arc::default();
    let transport = ScriptedTransport::new(log, u32::MAX, resource_exhausted());
    let options = ClientConfig::new()
        .backoff_on_ratelimits(true)
        .backoff(
            BackoffPolicy::new()
                .min_delay(Duration::from_secs(2))
                .max_delay(Duration::from_secs(2))
                .jitter(0.0),
        )
        .dial_options(Vec::new(), Vec::new(), 20, 10)
        .unwrap();
    let client = Client::new(transport.clone(), &options);

    let started = tokio::time::Instant::now();
    let err = client
        .unary(request().with_timeout(Duration::from_secs(1)))
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::DeadlineExceeded);
    assert_eq!(transport.calls(), 1);
    assert_eq!(started.elapsed(), Duration::from_secs(1));

    // No attempt sneaks in after the deadline
    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(transport.calls(), 1);
}

#[test]
fn test_unsupported_compression_fails_assembly() {
    let err = ClientConfig::new()
        .compression("deflate")
        .dial_options(Vec::new(), Vec::new(), 20, 10)
        .unwrap_err();
    assert!(matches!(
        err,
        DialError::Config(ConfigError::UnsupportedCompression(_))
    ));
    assert!(err.to_string().contains("deflate"));
}

struct RecordingConnector {
    transport: Arc<ScriptedTransport>,
    targets: Mutex<Vec<String>>,
}

impl Connector for RecordingConnector {
    fn connect<'a>(
        &'a self,
        target: &'a str,
        _options: &'a DialOptions,
    ) -> BoxFuture<'a, Result<Arc<dyn Transport>, ClientError>> {
        self.targets.lock().unwrap().push(target.to_string());
        let transport: Arc<dyn Transport> = self.transport.clone();
        Box::pin(async move { Ok(transport) })
    }
}

#[tokio::test]
async fn test_connect_through_connector() {
    let log: Log = Arc::default();
    let connector = RecordingConnector {
        transport: ScriptedTransport::ok(log.clone()),
        targets: Mutex::new(Vec::new()),
    };
    let options = ClientConfig::new()
        .compression("gzip")
        .dial_options(vec![recorder(&log, "caller")], Vec::new(), 20, 10)
        .unwrap();

    let client = Client::connect(&connector, "dns:///api.internal:443", &options)
        .await
        .unwrap();
    client.unary(request()).await.unwrap();

    assert_eq!(*connector.targets.lock().unwrap(), vec!["dns:///api.internal:443"]);
    assert_eq!(*log.lock().unwrap(), vec!["caller", "call"]);
    assert_eq!(
        client.call_options().compression,
        Some(grpcclient::Compression::Gzip)
    );
}
