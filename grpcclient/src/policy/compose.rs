//! Interceptor chain composition.
//!
//! Unary chains are ordered outermost first as
//! `retry -> rate_limit -> caller[0..n] -> call`, each policy present only
//! when enabled. Because the limiter sits inside retry, every retried
//! attempt takes its own token and re-enters the whole caller chain.
//! Streaming chains contain the caller interceptors only.

use std::sync::Arc;

use super::{RateLimitInterceptor, RetryInterceptor};
use crate::config::ClientConfig;
use crate::interceptor::{Interceptor, InterceptorChain};

/// The policy interceptors placed ahead of the caller's unary chain.
#[derive(Clone, Debug, Default)]
pub struct UnaryPolicies {
    /// Backoff retry on rate-limit rejections.
    pub retry: Option<RetryInterceptor>,
    /// Client-side admission control.
    pub rate_limit: Option<RateLimitInterceptor>,
}

impl UnaryPolicies {
    /// Derive the policies a configuration enables.
    ///
    /// Creates a fresh token bucket, so two compositions never share a
    /// limiter.
    pub fn from_config(config: &ClientConfig) -> Self {
        let retry = config
            .backoff_on_ratelimits
            .then(|| RetryInterceptor::new(config.backoff_config.clone()));

        let rate_limit = (config.rate_limit > 0.0)
            .then(|| RateLimitInterceptor::with_rate(config.rate_limit, config.rate_limit_burst));

        Self { retry, rate_limit }
    }

    /// Build the unary chain around the caller's interceptors.
    pub fn compose<I>(self, caller: I) -> InterceptorChain
    where
        I: IntoIterator<Item = Arc<dyn Interceptor>>,
    {
        let policies = [
            self.retry.map(|retry| Arc::new(retry) as Arc<dyn Interceptor>),
            self.rate_limit.map(|limit| Arc::new(limit) as Arc<dyn Interceptor>),
        ];

        policies.into_iter().flatten().chain(caller).collect()
    }
}

/// Compose the unary chain for a configuration.
pub fn compose_unary<I>(config: &ClientConfig, caller: I) -> InterceptorChain
where
    I: IntoIterator<Item = Arc<dyn Interceptor>>,
{
    UnaryPolicies::from_config(config).compose(caller)
}

/// Compose the streaming chain. Policies never apply to streams.
pub fn compose_stream<I>(caller: I) -> InterceptorChain
where
    I: IntoIterator<Item = Arc<dyn Interceptor>>,
{
    caller.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::{StreamFunc, StreamRequest, Streaming};
    use crate::{BackoffPolicy, HeaderInterceptor};
    use http::HeaderMap;

    fn caller() -> Vec<Arc<dyn Interceptor>> {
        vec![
            Arc::new(HeaderInterceptor::try_new("x-a", "1").unwrap()),
            Arc::new(HeaderInterceptor::try_new("x-b", "2").unwrap()),
        ]
    }

    #[test]
    fn test_compose_unary_order() {
        let config = ClientConfig::new()
            .rate_limit(5.0, 1)
            .backoff_on_ratelimits(true);
        let chain = compose_unary(&config, caller());
        assert_eq!(chain.names(), vec!["retry", "rate_limit", "header", "header"]);
    }

    #[test]
    fn test_compose_unary_disabled_policies() {
        let chain = compose_unary(&ClientConfig::new(), caller());
        assert_eq!(chain.names(), vec!["header", "header"]);

        let chain = compose_unary(&ClientConfig::new(), Vec::new());
        assert!(chain.is_empty());
    }

    #[test]
    fn test_compose_uses_configured_backoff() {
        let config = ClientConfig::new()
            .backoff_on_ratelimits(true)
            .backoff(BackoffPolicy::new().max_retries(7));
        let policies = UnaryPolicies::from_config(&config);
        assert_eq!(policies.retry.unwrap().policy().max_retries, 7);
        assert!(policies.rate_limit.is_none());
    }

    #[test]
    fn test_compose_creates_independent_buckets() {
        let config = ClientConfig::new().rate_limit(1.0, 1);
        let first = UnaryPolicies::from_config(&config).rate_limit.unwrap();
        let second = UnaryPolicies::from_config(&config).rate_limit.unwrap();
        assert!(!Arc::ptr_eq(first.bucket(), second.bucket()));
    }

    #[tokio::test]
    async fn test_compose_stream_skips_policies() {
        let chain = compose_stream(caller());
        assert_eq!(chain.names(), vec!["header", "header"]);

        let next: StreamFunc = Arc::new(|req: StreamRequest| {
            Box::pin(async move {
                Ok(Streaming {
                    metadata: req.metadata,
                    inbound: Box::pin(futures::stream::empty()),
                })
            })
        });
        let request = StreamRequest::new("/test.Service/Stream", Box::pin(futures::stream::empty()));
        let streaming = chain.wrap_stream(next)(request).await.unwrap();

        let mut expected = HeaderMap::new();
        expected.insert("x-a", "1".parse().unwrap());
        expected.insert("x-b", "2".parse().unwrap());
        assert_eq!(streaming.metadata, expected);
    }
}
