//! Core types, configuration, and utilities for the outbox dispatcher.

mod config;
mod error;
mod limits;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_API_BASE_URL, DEFAULT_BATCH_SIZE, DEFAULT_DISPATCH_INTERVAL_SECS,
    DEFAULT_LOG_LEVEL, DEFAULT_REQUEST_TIMEOUT_SECS,
};
pub use error::{CoreError, CoreResult};
pub use limits::{RateLimitTable, RatePolicy};
pub use logging::init_logging;
pub use paths::Paths;
