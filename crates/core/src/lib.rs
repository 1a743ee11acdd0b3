//! Shared building blocks for levelwatch.
//!
//! - [`error`]: the core error type and `Result` alias
//! - [`config`]: `ControllerConfig`, loaded from TOML
//! - [`backoff`]: capped exponential backoff used by the queue and the informer

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod backoff;
pub mod config;
pub mod error;

pub use backoff::{Backoff, BackoffSequence};
pub use config::{ControllerConfig, RateLimitConfig, ReconnectConfig};
pub use error::{Error, Result};
