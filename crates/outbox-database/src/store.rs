//! Dispatcher-facing store contract.
//!
//! The dispatch cycle talks to persistence exclusively through [`OutboxStore`]
//! so tests can substitute an in-memory implementation. [`Database`] is the
//! production implementation, delegating to the query functions on the
//! executor thread.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{queries, Database, DatabaseResult, NewOutboxItem, OutboxItem, StatusCounts};

/// Shared handle to an outbox store.
pub type StoreHandle = Arc<dyn OutboxStore>;

/// Persistence operations required by the dispatch cycle.
///
/// Every update is a single-row write. `requeue_*` methods guard on the
/// current status and report whether the row actually transitioned, so a
/// concurrent transition loses cleanly instead of double-counting.
#[async_trait::async_trait]
pub trait OutboxStore: Send + Sync {
    /// Insert a new item in status `queued` with an elapsed admission gate.
    async fn insert_item(&self, item: NewOutboxItem) -> DatabaseResult<OutboxItem>;

    /// Fetch a single item by ID.
    async fn get_item(&self, id: &str) -> DatabaseResult<Option<OutboxItem>>;

    /// Items admissible for dispatch: status `queued` or `failed` with
    /// `next_attempt_at <= now`, most recently created first.
    async fn due_items(&self, limit: i64, now: DateTime<Utc>) -> DatabaseResult<Vec<OutboxItem>>;

    /// Throttled items whose retry-after window has elapsed, most recently
    /// rate-limited first.
    async fn due_throttled(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Vec<OutboxItem>>;

    /// Dead-letter items flagged for backfill, most recently updated first.
    async fn backfill_candidates(&self, limit: i64) -> DatabaseResult<Vec<OutboxItem>>;

    /// Return a throttled item to the admission pool.
    async fn requeue_throttled(&self, id: &str, now: DateTime<Utc>) -> DatabaseResult<bool>;

    /// Return a dead-letter item to the admission pool with a fresh attempt
    /// budget.
    async fn requeue_dead_letter(&self, id: &str, now: DateTime<Utc>) -> DatabaseResult<bool>;

    /// Record a successful delivery.
    async fn mark_sent(
        &self,
        id: &str,
        attempt_count: i32,
        provider_response_json: &str,
    ) -> DatabaseResult<bool>;

    /// Park an item until the provider's retry-after window elapses.
    async fn mark_throttled(
        &self,
        id: &str,
        attempt_count: i32,
        retry_after_seconds: i64,
        retry_after_until: DateTime<Utc>,
        rate_limited_at: DateTime<Utc>,
    ) -> DatabaseResult<bool>;

    /// Record a retryable failure and schedule the next attempt.
    async fn mark_failed(
        &self,
        id: &str,
        attempt_count: i32,
        last_error: &str,
        next_attempt_at: DateTime<Utc>,
        critical_error: bool,
    ) -> DatabaseResult<bool>;

    /// Retire an item that exhausted its retries.
    async fn mark_dead_letter(
        &self,
        id: &str,
        attempt_count: i32,
        last_error: &str,
        critical_error: bool,
        backfill_eligible: bool,
    ) -> DatabaseResult<bool>;

    /// Dead-letter items for triage, most recently updated first.
    async fn list_dead_letters(&self, limit: i64) -> DatabaseResult<Vec<OutboxItem>>;

    /// Per-status item totals.
    async fn status_counts(&self) -> DatabaseResult<StatusCounts>;
}

#[async_trait::async_trait]
impl OutboxStore for Database {
    async fn insert_item(&self, item: NewOutboxItem) -> DatabaseResult<OutboxItem> {
        self.call(move |conn| queries::insert_outbox_item(conn, &item)).await
    }

    async fn get_item(&self, id: &str) -> DatabaseResult<Option<OutboxItem>> {
        let id = id.to_string();
        self.call(move |conn| queries::get_outbox_item(conn, &id)).await
    }

    async fn due_items(&self, limit: i64, now: DateTime<Utc>) -> DatabaseResult<Vec<OutboxItem>> {
        self.call(move |conn| queries::due_outbox_items(conn, limit, now)).await
    }

    async fn due_throttled(
        &self,
        limit: i64,
        now: DateTime<Utc>,
    ) -> DatabaseResult<Vec<OutboxItem>> {
        self.call(move |conn| queries::due_throttled_items(conn, limit, now)).await
    }

    async fn backfill_candidates(&self, limit: i64) -> DatabaseResult<Vec<OutboxItem>> {
        self.call(move |conn| queries::backfill_candidates(conn, limit)).await
    }

    async fn requeue_throttled(&self, id: &str, now: DateTime<Utc>) -> DatabaseResult<bool> {
        let id = id.to_string();
        self.call(move |conn| queries::requeue_throttled(conn, &id, now)).await
    }

    async fn requeue_dead_letter(&self, id: &str, now: DateTime<Utc>) -> DatabaseResult<bool> {
        let id = id.to_string();
        self.call(move |conn| queries::requeue_dead_letter(conn, &id, now)).await
    }

    async fn mark_sent(
        &self,
        id: &str,
        attempt_count: i32,
        provider_response_json: &str,
    ) -> DatabaseResult<bool> {
        let id = id.to_string();
        let response = provider_response_json.to_string();
        self.call(move |conn| queries::mark_sent(conn, &id, attempt_count, &response)).await
    }

    async fn mark_throttled(
        &self,
        id: &str,
        attempt_count: i32,
        retry_after_seconds: i64,
        retry_after_until: DateTime<Utc>,
        rate_limited_at: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let id = id.to_string();
        self.call(move |conn| {
            queries::mark_throttled(
                conn,
                &id,
                attempt_count,
                retry_after_seconds,
                retry_after_until,
                rate_limited_at,
            )
        })
        .await
    }

    async fn mark_failed(
        &self,
        id: &str,
        attempt_count: i32,
        last_error: &str,
        next_attempt_at: DateTime<Utc>,
        critical_error: bool,
    ) -> DatabaseResult<bool> {
        let id = id.to_string();
        let last_error = last_error.to_string();
        self.call(move |conn| {
            queries::mark_failed(conn, &id, attempt_count, &last_error, next_attempt_at, critical_error)
        })
        .await
    }

    async fn mark_dead_letter(
        &self,
        id: &str,
        attempt_count: i32,
        last_error: &str,
        critical_error: bool,
        backfill_eligible: bool,
    ) -> DatabaseResult<bool> {
        let id = id.to_string();
        let last_error = last_error.to_string();
        self.call(move |conn| {
            queries::mark_dead_letter(
                conn,
                &id,
                attempt_count,
                &last_error,
                critical_error,
                backfill_eligible,
            )
        })
        .await
    }

    async fn list_dead_letters(&self, limit: i64) -> DatabaseResult<Vec<OutboxItem>> {
        self.call(move |conn| queries::list_dead_letter_items(conn, limit)).await
    }

    async fn status_counts(&self) -> DatabaseResult<StatusCounts> {
        self.call(queries::status_counts).await
    }
}
