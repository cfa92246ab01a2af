//! Call-path policies: rate limiting, backoff retry and their composition
//! with caller-supplied interceptors.

mod compose;
mod ratelimit;
mod retry;

pub use compose::{UnaryPolicies, compose_stream, compose_unary};
pub use ratelimit::{RateLimitInterceptor, TokenBucket};
pub use retry::{RetryInterceptor, Sleep, TokioSleep};
