//! Store-and-forward dispatch engine for queued side-effect deliveries.
//!
//! This crate provides:
//! - The `Dispatcher` and its batch dispatch cycle
//! - The outcome policy (backoff ladder, throttle windows, dead-letter)
//! - The `ProviderSender` contract and the HTTP gateway implementation
//!
//! All queue state lives in the store; the dispatcher is stateless and any
//! number of sequential cycles can run against the same records. Overlapping
//! cycles are the scheduler's responsibility to prevent.

mod cycle;
mod error;
mod policy;
mod sender;

pub use cycle::{CycleOptions, CycleSummary, Dispatcher};
pub use error::{OutboxError, OutboxResult};
pub use policy::{retry_backoff, DEFAULT_RETRY_AFTER_SECS, MAX_ATTEMPTS, MAX_RETRY_AFTER_SECS};
pub use sender::{HttpSender, ProviderSender, SendError, SenderConfig};
