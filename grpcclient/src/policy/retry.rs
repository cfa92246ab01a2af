//! Backoff retry for rate-limited unary calls.
//!
//! [`RetryInterceptor`] re-invokes a unary call whenever it fails with a
//! rate-limit rejection (see [`ClientError::is_rate_limited`]), sleeping
//! between attempts according to a [`BackoffPolicy`]. Any other error is
//! returned immediately. Once the policy's retry ceiling is reached the call
//! fails with [`ClientError::RetriesExhausted`].
//!
//! Sleeps race the request's deadline and cancellation token, so a call
//! never outlives either while backing off.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::ClientError;
use crate::config::{Backoff, BackoffPolicy};
use crate::interceptor::{BoxFuture, Interceptor, UnaryFunc, UnaryRequest, UnaryResponse};

/// Something that can suspend the current task for a duration.
///
/// The retry loop sleeps through this trait so tests can observe delays
/// without waiting for them.
pub trait Sleep: Send + Sync {
    /// Sleep for `duration`.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Sleeps on the tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleep;

impl Sleep for TokioSleep {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Retries unary calls rejected by a rate limit.
///
/// Streaming calls pass through untouched.
#[derive(Clone)]
pub struct RetryInterceptor {
    policy: BackoffPolicy,
    sleep: Arc<dyn Sleep>,
    seed: Option<u64>,
    /// Calls started, mixed into the seed so concurrent calls diverge.
    calls: Arc<AtomicU64>,
}

impl std::fmt::Debug for RetryInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryInterceptor")
            .field("policy", &self.policy)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

impl RetryInterceptor {
    /// Create a retry interceptor that sleeps on the tokio timer.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            sleep: Arc::new(TokioSleep),
            seed: None,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Use a custom sleep implementation.
    pub fn with_sleep(mut self, sleep: Arc<dyn Sleep>) -> Self {
        self.sleep = sleep;
        self
    }

    /// Make jitter reproducible, for tests.
    ///
    /// Call `k` (zero based) through this interceptor uses a cursor seeded
    /// with `seed + k`, so a fixed sequence of calls replays the same delays
    /// while concurrent calls still get distinct jitter.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// The backoff policy in use.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    fn cursor(&self) -> Backoff {
        match self.seed {
            Some(seed) => {
                let call = self.calls.fetch_add(1, Ordering::Relaxed);
                Backoff::with_seed(self.policy.clone(), seed.wrapping_add(call))
            }
            None => self.policy.backoff(),
        }
    }
}

impl Interceptor for RetryInterceptor {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        let this = self.clone();
        Arc::new(move |request: UnaryRequest| {
            Box::pin(retry_rate_limited(
                next.clone(),
                request,
                this.cursor(),
                this.sleep.clone(),
            ))
        })
    }
}

/// Drive one logical call through attempts and backoff sleeps.
async fn retry_rate_limited(
    next: UnaryFunc,
    request: UnaryRequest,
    mut backoff: Backoff,
    sleep: Arc<dyn Sleep>,
) -> Result<UnaryResponse, ClientError> {
    let mut attempts: u32 = 0;

    loop {
        check_live(&request)?;
        attempts = attempts.saturating_add(1);

        let err = match next(request.clone()).await {
            Ok(response) => return Ok(response),
            Err(err) if err.is_rate_limited() => err,
            Err(err) => return Err(err),
        };

        let step = backoff.next_step();
        if step.done {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                procedure = %request.procedure,
                attempts,
                error = %err,
                "giving up on rate-limited call"
            );
            return Err(ClientError::RetriesExhausted {
                attempts,
                last: Box::new(err),
            });
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            procedure = %request.procedure,
            error = %err,
            attempt = attempts,
            delay_ms = step.delay.as_millis(),
            "backing off after rate limit"
        );

        pause(sleep.as_ref(), step.delay, &request).await?;
    }
}

fn check_live(request: &UnaryRequest) -> Result<(), ClientError> {
    if request.cancellation.is_cancelled() {
        return Err(ClientError::canceled("call canceled"));
    }
    if request.remaining() == Some(Duration::ZERO) {
        return Err(ClientError::deadline_exceeded("deadline exceeded"));
    }
    Ok(())
}

/// Sleep for `delay` unless the request is canceled or its deadline passes
/// first.
async fn pause(sleep: &dyn Sleep, delay: Duration, request: &UnaryRequest) -> Result<(), ClientError> {
    let deadline = async {
        match request.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        _ = request.cancellation.cancelled() => {
            Err(ClientError::canceled("call canceled during backoff"))
        }
        _ = deadline => {
            Err(ClientError::deadline_exceeded("deadline exceeded during backoff"))
        }
        _ = sleep.sleep(delay) => Ok(()),
    }
}
