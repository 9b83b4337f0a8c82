//! SQLite persistence layer for the outbox dispatcher.
//!
//! This crate provides:
//! - Async SQLite executor with dedicated thread
//! - Database migrations
//! - The `outbox_items` model types
//! - The `OutboxStore` trait the dispatch cycle runs against
//! - Query helpers for selection and status transitions
//!
//! # Architecture
//!
//! The `Database` uses a single dedicated thread for all SQLite operations.
//! Queries are sent through a channel and executed in FIFO order.
//!
//! ```ignore
//! let db = Database::open(path).await?;
//! let due = db.due_items(50, Utc::now()).await?;
//! ```
//!
//! **Important**: Only SQL operations should run inside `db.call()`.
//! Provider HTTP calls and heavy computation must happen outside.

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;
mod store;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::Database;
pub use migrations::run_migrations;
pub use models::*;
pub use store::{OutboxStore, StoreHandle};
