//! Standalone query functions that work with any Connection.
//!
//! These functions are designed to run inside the async executor's `call`
//! closure. Each function takes a `&Connection` as its first parameter.
//!
//! Timestamps are bound as RFC3339 strings produced by `to_rfc3339`, so the
//! TEXT comparisons in the WHERE clauses below order chronologically.

use crate::{DatabaseError, DatabaseResult, NewOutboxItem, OutboxItem, OutboxStatus, StatusCounts};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

const ITEM_COLUMNS: &str = "id, integration_id, operation, payload, status, attempt_count, \
     next_attempt_at, retry_after_until, retry_after_seconds, rate_limited_at, last_error, \
     critical_error, backfill_eligible, provider_response_json, created_at, updated_at";

fn map_item_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxItem> {
    Ok(OutboxItem {
        id: row.get(0)?,
        integration_id: row.get(1)?,
        operation: row.get(2)?,
        payload: row.get(3)?,
        status: OutboxStatus::from_str(&row.get::<_, String>(4)?),
        attempt_count: row.get(5)?,
        next_attempt_at: parse_datetime(row.get::<_, String>(6)?),
        retry_after_until: row.get::<_, Option<String>>(7)?.map(parse_datetime),
        retry_after_seconds: row.get(8)?,
        rate_limited_at: row.get::<_, Option<String>>(9)?.map(parse_datetime),
        last_error: row.get(10)?,
        critical_error: row.get(11)?,
        backfill_eligible: row.get(12)?,
        provider_response_json: row.get(13)?,
        created_at: parse_datetime(row.get::<_, String>(14)?),
        updated_at: parse_datetime(row.get::<_, String>(15)?),
    })
}

// ==========================================
// Outbox items
// ==========================================

/// Insert a new outbox item in status `queued` with an elapsed admission gate.
pub fn insert_outbox_item(conn: &Connection, item: &NewOutboxItem) -> DatabaseResult<OutboxItem> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO outbox_items (id, integration_id, operation, payload, status, attempt_count, next_attempt_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'queued', 0, ?5, ?5, ?5)",
        params![item.id, item.integration_id, item.operation, item.payload, now],
    )?;
    get_outbox_item(conn, &item.id)?
        .ok_or_else(|| DatabaseError::NotFound("Outbox item not found after insert".to_string()))
}

/// Get an outbox item by ID.
pub fn get_outbox_item(conn: &Connection, id: &str) -> DatabaseResult<Option<OutboxItem>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {ITEM_COLUMNS} FROM outbox_items WHERE id = ?1"
    ))?;

    let result = stmt.query_row(params![id], map_item_row);

    match result {
        Ok(item) => Ok(Some(item)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ==========================================
// Dispatch selection
// ==========================================

/// Items admissible for dispatch: status `queued` or `failed` with an elapsed
/// admission gate, most recently created first.
pub fn due_outbox_items(
    conn: &Connection,
    limit: i64,
    now: DateTime<Utc>,
) -> DatabaseResult<Vec<OutboxItem>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {ITEM_COLUMNS} FROM outbox_items
         WHERE status IN ('queued', 'failed') AND next_attempt_at <= ?1
         ORDER BY created_at DESC
         LIMIT ?2"
    ))?;

    let items = stmt
        .query_map(params![now.to_rfc3339(), limit], map_item_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(items)
}

/// Throttled items whose retry-after window has elapsed, most recently
/// rate-limited first.
pub fn due_throttled_items(
    conn: &Connection,
    limit: i64,
    now: DateTime<Utc>,
) -> DatabaseResult<Vec<OutboxItem>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {ITEM_COLUMNS} FROM outbox_items
         WHERE status = 'throttled' AND retry_after_until <= ?1
         ORDER BY rate_limited_at DESC
         LIMIT ?2"
    ))?;

    let items = stmt
        .query_map(params![now.to_rfc3339(), limit], map_item_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(items)
}

/// Dead-letter items flagged for backfill, most recently updated first.
pub fn backfill_candidates(conn: &Connection, limit: i64) -> DatabaseResult<Vec<OutboxItem>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {ITEM_COLUMNS} FROM outbox_items
         WHERE status = 'dead_letter' AND backfill_eligible = 1
         ORDER BY updated_at DESC
         LIMIT ?1"
    ))?;

    let items = stmt
        .query_map(params![limit], map_item_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(items)
}

// ==========================================
// Status transitions
// ==========================================

/// Return a throttled item to the admission pool with an elapsed gate.
///
/// Guarded on the current status so a concurrent transition loses cleanly;
/// returns false when no row changed.
pub fn requeue_throttled(conn: &Connection, id: &str, now: DateTime<Utc>) -> DatabaseResult<bool> {
    let now = now.to_rfc3339();
    let count = conn.execute(
        "UPDATE outbox_items
         SET status = 'queued', next_attempt_at = ?1, updated_at = ?1
         WHERE id = ?2 AND status = 'throttled'",
        params![now, id],
    )?;
    Ok(count > 0)
}

/// Return a dead-letter item to the admission pool with a fresh attempt
/// budget. Clears the failure message and the backfill flag.
pub fn requeue_dead_letter(
    conn: &Connection,
    id: &str,
    now: DateTime<Utc>,
) -> DatabaseResult<bool> {
    let now = now.to_rfc3339();
    let count = conn.execute(
        "UPDATE outbox_items
         SET status = 'queued', attempt_count = 0, next_attempt_at = ?1,
             last_error = NULL, backfill_eligible = 0, updated_at = ?1
         WHERE id = ?2 AND status = 'dead_letter'",
        params![now, id],
    )?;
    Ok(count > 0)
}

/// Record a successful delivery.
pub fn mark_sent(
    conn: &Connection,
    id: &str,
    attempt_count: i32,
    provider_response_json: &str,
) -> DatabaseResult<bool> {
    let now = Utc::now().to_rfc3339();
    let count = conn.execute(
        "UPDATE outbox_items
         SET status = 'sent', attempt_count = ?1, provider_response_json = ?2, updated_at = ?3
         WHERE id = ?4",
        params![attempt_count, provider_response_json, now, id],
    )?;
    Ok(count > 0)
}

/// Park an item until the provider's retry-after window elapses.
pub fn mark_throttled(
    conn: &Connection,
    id: &str,
    attempt_count: i32,
    retry_after_seconds: i64,
    retry_after_until: DateTime<Utc>,
    rate_limited_at: DateTime<Utc>,
) -> DatabaseResult<bool> {
    let now = Utc::now().to_rfc3339();
    let count = conn.execute(
        "UPDATE outbox_items
         SET status = 'throttled', attempt_count = ?1, retry_after_seconds = ?2,
             retry_after_until = ?3, rate_limited_at = ?4, updated_at = ?5
         WHERE id = ?6",
        params![
            attempt_count,
            retry_after_seconds,
            retry_after_until.to_rfc3339(),
            rate_limited_at.to_rfc3339(),
            now,
            id,
        ],
    )?;
    Ok(count > 0)
}

/// Record a retryable failure and schedule the next attempt.
pub fn mark_failed(
    conn: &Connection,
    id: &str,
    attempt_count: i32,
    last_error: &str,
    next_attempt_at: DateTime<Utc>,
    critical_error: bool,
) -> DatabaseResult<bool> {
    let now = Utc::now().to_rfc3339();
    let count = conn.execute(
        "UPDATE outbox_items
         SET status = 'failed', attempt_count = ?1, last_error = ?2,
             next_attempt_at = ?3, critical_error = ?4, updated_at = ?5
         WHERE id = ?6",
        params![
            attempt_count,
            last_error,
            next_attempt_at.to_rfc3339(),
            critical_error,
            now,
            id,
        ],
    )?;
    Ok(count > 0)
}

/// Retire an item that exhausted its retries.
pub fn mark_dead_letter(
    conn: &Connection,
    id: &str,
    attempt_count: i32,
    last_error: &str,
    critical_error: bool,
    backfill_eligible: bool,
) -> DatabaseResult<bool> {
    let now = Utc::now().to_rfc3339();
    let count = conn.execute(
        "UPDATE outbox_items
         SET status = 'dead_letter', attempt_count = ?1, last_error = ?2,
             critical_error = ?3, backfill_eligible = ?4, updated_at = ?5
         WHERE id = ?6",
        params![attempt_count, last_error, critical_error, backfill_eligible, now, id],
    )?;
    Ok(count > 0)
}

// ==========================================
// Monitoring
// ==========================================

/// Dead-letter items, most recently updated first.
pub fn list_dead_letter_items(conn: &Connection, limit: i64) -> DatabaseResult<Vec<OutboxItem>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {ITEM_COLUMNS} FROM outbox_items
         WHERE status = 'dead_letter'
         ORDER BY updated_at DESC
         LIMIT ?1"
    ))?;

    let items = stmt
        .query_map(params![limit], map_item_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(items)
}

/// Per-status item totals.
pub fn status_counts(conn: &Connection) -> DatabaseResult<StatusCounts> {
    let mut stmt =
        conn.prepare_cached("SELECT status, COUNT(*) FROM outbox_items GROUP BY status")?;

    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut counts = StatusCounts::default();
    for (status, count) in rows {
        match OutboxStatus::from_str(&status) {
            OutboxStatus::Queued => counts.queued = count,
            OutboxStatus::Throttled => counts.throttled = count,
            OutboxStatus::Failed => counts.failed = count,
            OutboxStatus::Sent => counts.sent = count,
            OutboxStatus::DeadLetter => counts.dead_letter = count,
        }
    }

    Ok(counts)
}

// ==========================================
// Helpers
// ==========================================

/// Parse an RFC3339 datetime string, falling back to current time on error.
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations;
    use chrono::Duration;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrations::run_migrations(&conn).unwrap();
        conn
    }

    fn insert_test_item(conn: &Connection, id: &str) -> OutboxItem {
        insert_outbox_item(
            conn,
            &NewOutboxItem {
                id: id.to_string(),
                integration_id: "slack".to_string(),
                operation: "send_message".to_string(),
                payload: r##"{"channel":"#alerts","text":"hi"}"##.to_string(),
            },
        )
        .unwrap()
    }

    fn set_created_at(conn: &Connection, id: &str, rfc3339: &str) {
        conn.execute(
            "UPDATE outbox_items SET created_at = ?1 WHERE id = ?2",
            params![rfc3339, id],
        )
        .unwrap();
    }

    #[test]
    fn test_insert_and_get() {
        let conn = test_conn();

        let item = insert_test_item(&conn, "item-1");
        assert_eq!(item.id, "item-1");
        assert_eq!(item.status, OutboxStatus::Queued);
        assert_eq!(item.attempt_count, 0);
        assert!(item.last_error.is_none());
        assert!(!item.critical_error);
        assert!(!item.backfill_eligible);
        assert!(item.retry_after_until.is_none());

        let fetched = get_outbox_item(&conn, "item-1").unwrap().unwrap();
        assert_eq!(fetched.integration_id, "slack");
        assert_eq!(fetched.operation, "send_message");
        // Payload is opaque; hash signs and all, it survives verbatim
        assert_eq!(fetched.payload, r##"{"channel":"#alerts","text":"hi"}"##);

        assert!(get_outbox_item(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_due_items_newest_first_and_limited() {
        let conn = test_conn();

        insert_test_item(&conn, "old");
        insert_test_item(&conn, "mid");
        insert_test_item(&conn, "new");
        set_created_at(&conn, "old", "2026-01-01T10:00:00+00:00");
        set_created_at(&conn, "mid", "2026-01-02T10:00:00+00:00");
        set_created_at(&conn, "new", "2026-01-03T10:00:00+00:00");

        let due = due_outbox_items(&conn, 10, Utc::now()).unwrap();
        let ids: Vec<&str> = due.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);

        let due = due_outbox_items(&conn, 2, Utc::now()).unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].id, "new");
        assert_eq!(due[1].id, "mid");
    }

    #[test]
    fn test_due_items_respects_gate_and_status() {
        let conn = test_conn();

        insert_test_item(&conn, "ready");
        insert_test_item(&conn, "future");
        insert_test_item(&conn, "failed-ready");
        insert_test_item(&conn, "sent");
        insert_test_item(&conn, "parked");

        // Captured after the inserts so insert-stamped gates count as elapsed
        let now = Utc::now();

        // Push one item's gate into the future
        conn.execute(
            "UPDATE outbox_items SET next_attempt_at = ?1 WHERE id = 'future'",
            params![(now + Duration::hours(1)).to_rfc3339()],
        )
        .unwrap();
        // Failed items with an elapsed gate are admissible
        mark_failed(&conn, "failed-ready", 1, "boom", now - Duration::seconds(1), false).unwrap();
        mark_sent(&conn, "sent", 1, "{}").unwrap();
        mark_throttled(&conn, "parked", 1, 60, now + Duration::seconds(60), now).unwrap();

        let due = due_outbox_items(&conn, 10, now).unwrap();
        let mut ids: Vec<&str> = due.iter().map(|i| i.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["failed-ready", "ready"]);
    }

    #[test]
    fn test_due_throttled_items() {
        let conn = test_conn();
        let now = Utc::now();

        insert_test_item(&conn, "expired-early");
        insert_test_item(&conn, "expired-late");
        insert_test_item(&conn, "still-throttled");
        insert_test_item(&conn, "queued");

        mark_throttled(
            &conn,
            "expired-early",
            1,
            30,
            now - Duration::seconds(30),
            now - Duration::minutes(10),
        )
        .unwrap();
        mark_throttled(
            &conn,
            "expired-late",
            1,
            30,
            now - Duration::seconds(10),
            now - Duration::minutes(1),
        )
        .unwrap();
        mark_throttled(
            &conn,
            "still-throttled",
            1,
            300,
            now + Duration::seconds(300),
            now,
        )
        .unwrap();

        let due = due_throttled_items(&conn, 10, now).unwrap();
        let ids: Vec<&str> = due.iter().map(|i| i.id.as_str()).collect();
        // Most recently rate-limited first, unexpired windows excluded
        assert_eq!(ids, vec!["expired-late", "expired-early"]);
    }

    #[test]
    fn test_backfill_candidates_only_eligible() {
        let conn = test_conn();

        insert_test_item(&conn, "critical");
        insert_test_item(&conn, "rejected");
        insert_test_item(&conn, "queued");

        mark_dead_letter(&conn, "critical", 5, "503 from provider", true, true).unwrap();
        mark_dead_letter(&conn, "rejected", 5, "422 from provider", false, false).unwrap();

        let candidates = backfill_candidates(&conn, 10).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, "critical");
        assert!(candidates[0].backfill_eligible);
    }

    #[test]
    fn test_requeue_throttled() {
        let conn = test_conn();
        let now = Utc::now();

        insert_test_item(&conn, "item-1");
        mark_throttled(&conn, "item-1", 2, 60, now + Duration::seconds(60), now).unwrap();

        assert!(requeue_throttled(&conn, "item-1", now).unwrap());

        let item = get_outbox_item(&conn, "item-1").unwrap().unwrap();
        assert_eq!(item.status, OutboxStatus::Queued);
        assert_eq!(item.attempt_count, 2);
        assert!(item.next_attempt_at <= Utc::now());

        // Already requeued, guard fails
        assert!(!requeue_throttled(&conn, "item-1", now).unwrap());
    }

    #[test]
    fn test_requeue_dead_letter_resets_attempts() {
        let conn = test_conn();
        let now = Utc::now();

        insert_test_item(&conn, "item-1");
        mark_dead_letter(&conn, "item-1", 5, "connection refused", true, true).unwrap();

        assert!(requeue_dead_letter(&conn, "item-1", now).unwrap());

        let item = get_outbox_item(&conn, "item-1").unwrap().unwrap();
        assert_eq!(item.status, OutboxStatus::Queued);
        assert_eq!(item.attempt_count, 0);
        assert!(item.last_error.is_none());
        assert!(!item.backfill_eligible);

        // Not dead-lettered anymore, guard fails
        assert!(!requeue_dead_letter(&conn, "item-1", now).unwrap());
    }

    #[test]
    fn test_mark_sent_records_response() {
        let conn = test_conn();

        insert_test_item(&conn, "item-1");
        assert!(mark_sent(&conn, "item-1", 1, r#"{"message_ts":"123.456"}"#).unwrap());

        let item = get_outbox_item(&conn, "item-1").unwrap().unwrap();
        assert_eq!(item.status, OutboxStatus::Sent);
        assert_eq!(item.attempt_count, 1);
        assert_eq!(
            item.provider_response_json.as_deref(),
            Some(r#"{"message_ts":"123.456"}"#)
        );

        assert!(!mark_sent(&conn, "missing", 1, "{}").unwrap());
    }

    #[test]
    fn test_mark_failed_schedules_retry() {
        let conn = test_conn();
        let next = Utc::now() + Duration::seconds(10);

        insert_test_item(&conn, "item-1");
        assert!(mark_failed(&conn, "item-1", 1, "HTTP 500: upstream error", next, true).unwrap());

        let item = get_outbox_item(&conn, "item-1").unwrap().unwrap();
        assert_eq!(item.status, OutboxStatus::Failed);
        assert_eq!(item.attempt_count, 1);
        assert_eq!(item.last_error.as_deref(), Some("HTTP 500: upstream error"));
        assert!(item.critical_error);
        assert!(item.next_attempt_at > Utc::now());
    }

    #[test]
    fn test_mark_throttled_sets_window() {
        let conn = test_conn();
        let now = Utc::now();
        let until = now + Duration::seconds(45);

        insert_test_item(&conn, "item-1");
        assert!(mark_throttled(&conn, "item-1", 1, 45, until, now).unwrap());

        let item = get_outbox_item(&conn, "item-1").unwrap().unwrap();
        assert_eq!(item.status, OutboxStatus::Throttled);
        assert_eq!(item.retry_after_seconds, Some(45));
        assert!(item.retry_after_until.is_some());
        assert!(item.rate_limited_at.is_some());
    }

    #[test]
    fn test_status_counts() {
        let conn = test_conn();
        let now = Utc::now();

        insert_test_item(&conn, "q1");
        insert_test_item(&conn, "q2");
        insert_test_item(&conn, "s1");
        insert_test_item(&conn, "t1");
        insert_test_item(&conn, "d1");

        mark_sent(&conn, "s1", 1, "{}").unwrap();
        mark_throttled(&conn, "t1", 1, 60, now + Duration::seconds(60), now).unwrap();
        mark_dead_letter(&conn, "d1", 5, "gone", false, false).unwrap();

        let counts = status_counts(&conn).unwrap();
        assert_eq!(counts.queued, 2);
        assert_eq!(counts.sent, 1);
        assert_eq!(counts.throttled, 1);
        assert_eq!(counts.dead_letter, 1);
        assert_eq!(counts.failed, 0);
        assert_eq!(counts.total(), 5);
    }

    #[test]
    fn test_list_dead_letter_items() {
        let conn = test_conn();

        insert_test_item(&conn, "d1");
        insert_test_item(&conn, "d2");
        mark_dead_letter(&conn, "d1", 5, "first", true, true).unwrap();
        mark_dead_letter(&conn, "d2", 5, "second", false, false).unwrap();

        conn.execute(
            "UPDATE outbox_items SET updated_at = ?1 WHERE id = 'd1'",
            params!["2026-01-01T10:00:00+00:00"],
        )
        .unwrap();
        conn.execute(
            "UPDATE outbox_items SET updated_at = ?1 WHERE id = 'd2'",
            params!["2026-01-02T10:00:00+00:00"],
        )
        .unwrap();

        let items = list_dead_letter_items(&conn, 10).unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["d2", "d1"]);

        let items = list_dead_letter_items(&conn, 1).unwrap();
        assert_eq!(items.len(), 1);
    }
}
