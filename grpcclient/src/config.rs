//! Client configuration.
//!
//! - [`ClientConfig`]: validated settings and dial-option assembly
//! - [`BackoffPolicy`]: backoff between rate-limited attempts
//! - [`CallOptions`], [`KeepaliveParams`], [`DialOptions`]: assembled bundles

mod backoff;
mod client;
mod options;

pub use backoff::{Backoff, BackoffPolicy, BackoffStep};
pub use client::ClientConfig;
pub use options::{CallOptions, DialOptions, KeepaliveParams};

/// Default configuration values.
pub mod defaults {
    /// Default maximum response message size (100 MiB).
    pub const MAX_RECV_MSG_SIZE: usize = 100 << 20;

    /// Default maximum request message size (16 MiB).
    pub const MAX_SEND_MSG_SIZE: usize = 16 << 20;

    pub use super::backoff::defaults::{
        JITTER as BACKOFF_JITTER, MAX_DELAY as BACKOFF_MAX_DELAY,
        MAX_RETRIES as BACKOFF_MAX_RETRIES, MIN_DELAY as BACKOFF_MIN_DELAY,
    };
}
