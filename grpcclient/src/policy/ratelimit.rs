//! Client-side rate limiting.
//!
//! A [`TokenBucket`] holds up to `burst` tokens and refills at `rate` tokens
//! per second. [`RateLimitInterceptor`] takes one token per unary attempt and
//! rejects the attempt with [`ClientError::RateLimited`] when the bucket is
//! empty. It never waits for capacity.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::time::Instant;

use crate::ClientError;
use crate::interceptor::{Interceptor, UnaryFunc, UnaryRequest};

/// A token bucket shared by every call through one limiter.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    refilled_at: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    ///
    /// A rate of zero (or below) disables limiting entirely. A burst of zero
    /// with a positive rate uses `max(1, floor(rate))` as the capacity.
    pub fn new(rate: f64, burst: u32) -> Self {
        let capacity = if burst == 0 {
            rate.floor().max(1.0)
        } else {
            f64::from(burst)
        };
        Self {
            rate,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                refilled_at: Instant::now(),
            }),
        }
    }

    /// Tokens added per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Maximum number of tokens the bucket holds.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Whether this bucket admits everything.
    pub fn is_unlimited(&self) -> bool {
        self.rate.is_nan() || self.rate <= 0.0
    }

    /// Take one token if available.
    pub fn try_acquire(&self) -> bool {
        if self.is_unlimited() {
            return true;
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available, after refilling.
    pub fn available(&self) -> f64 {
        if self.is_unlimited() {
            return f64::INFINITY;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.refilled_at);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
        state.refilled_at = now;
    }
}

/// Rejects unary attempts the token bucket has no capacity for.
///
/// Streaming calls pass through untouched.
#[derive(Clone, Debug)]
pub struct RateLimitInterceptor {
    bucket: Arc<TokenBucket>,
}

impl RateLimitInterceptor {
    /// Create an interceptor over a shared bucket.
    pub fn new(bucket: Arc<TokenBucket>) -> Self {
        Self { bucket }
    }

    /// Create an interceptor with its own bucket.
    pub fn with_rate(rate: f64, burst: u32) -> Self {
        Self::new(Arc::new(TokenBucket::new(rate, burst)))
    }

    /// The bucket this interceptor draws from.
    pub fn bucket(&self) -> &Arc<TokenBucket> {
        &self.bucket
    }
}

impl Interceptor for RateLimitInterceptor {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        if self.bucket.is_unlimited() {
            return next;
        }

        let bucket = self.bucket.clone();
        Arc::new(move |request: UnaryRequest| {
            if bucket.try_acquire() {
                return next(request);
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(
                procedure = %request.procedure,
                rate = bucket.rate(),
                burst = bucket.capacity(),
                "request rejected by client rate limit"
            );

            let message = format!(
                "client rate limit of {}/s (burst {}) exceeded",
                bucket.rate(),
                bucket.capacity()
            );
            Box::pin(async move { Err(ClientError::rate_limited(message)) })
        })
    }
}
