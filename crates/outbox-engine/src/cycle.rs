//! The dispatch cycle: admit, unthrottle, backfill, process, summarize.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use outbox_core::RateLimitTable;
use outbox_database::{OutboxItem, OutboxStore, StoreHandle};

use crate::policy::{self, Disposition};
use crate::sender::ProviderSender;
use crate::OutboxResult;

/// Tuning for one dispatch cycle.
#[derive(Debug, Clone)]
pub struct CycleOptions {
    /// Maximum items admitted for delivery in one cycle.
    pub batch_size: usize,
    /// Whether to run the unthrottle and dead-letter backfill steps.
    pub include_backfill: bool,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            batch_size: outbox_core::DEFAULT_BATCH_SIZE,
            include_backfill: true,
        }
    }
}

/// Counts returned by one dispatch cycle.
///
/// `failed` covers both backoff-scheduled retries and dead-letter
/// retirements; `processed` counts only items actually dispatched this
/// cycle (unthrottled/backfilled items re-enter the pool for a later one).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub processed: usize,
    pub unthrottled: usize,
    pub backfilled: usize,
    pub sent: usize,
    pub failed: usize,
    pub throttled: usize,
}

enum Outcome {
    Sent,
    Failed,
    Throttled,
}

/// Stateless batch dispatcher.
///
/// Holds no queue state of its own: every cycle re-reads eligibility from
/// the store, so a crashed or interrupted cycle resumes naturally on the
/// next run. A single dispatcher instance is expected to be the only writer;
/// overlapping cycles over the same records are not supported.
pub struct Dispatcher {
    store: StoreHandle,
    sender: Arc<dyn ProviderSender>,
    limits: RateLimitTable,
}

impl Dispatcher {
    /// Create a dispatcher over a store, a sender, and rate limit policies.
    pub fn new(
        store: StoreHandle,
        sender: Arc<dyn ProviderSender>,
        limits: RateLimitTable,
    ) -> Self {
        Self {
            store,
            sender,
            limits,
        }
    }

    /// Run one dispatch cycle.
    ///
    /// Steps: admit due items, return expired throttled items to the pool,
    /// backfill eligible dead-letter items, deliver the admitted batch, and
    /// report the counts. Per-item failures are absorbed into item status;
    /// only store failures propagate.
    pub async fn run_cycle(&self, options: &CycleOptions) -> OutboxResult<CycleSummary> {
        let now = Utc::now();
        let mut summary = CycleSummary::default();

        // Step 1: snapshot the admitted batch before any requeue below can
        // grow the pool; requeued items wait for the next cycle.
        let admitted = self.store.due_items(options.batch_size as i64, now).await?;
        self.report_integration_load(&admitted);

        // Step 2: expired throttle windows back to the pool
        if options.include_backfill {
            let expired = self
                .store
                .due_throttled((options.batch_size / 2) as i64, now)
                .await?;
            for item in &expired {
                if self.store.requeue_throttled(&item.id, now).await? {
                    summary.unthrottled += 1;
                    debug!(id = %item.id, integration = %item.integration_id, "Throttle window elapsed, item requeued");
                }
            }
        }

        // Step 3: eligible dead-letter items back to the pool
        if options.include_backfill {
            let candidates = self
                .store
                .backfill_candidates((options.batch_size / 4) as i64)
                .await?;
            for item in &candidates {
                if self.store.requeue_dead_letter(&item.id, now).await? {
                    summary.backfilled += 1;
                    info!(id = %item.id, integration = %item.integration_id, "Dead-letter item backfilled");
                }
            }
        }

        // Step 4: deliver the admitted batch sequentially
        for item in &admitted {
            summary.processed += 1;
            match self.process_item(item).await? {
                Outcome::Sent => summary.sent += 1,
                Outcome::Failed => summary.failed += 1,
                Outcome::Throttled => summary.throttled += 1,
            }
        }

        if summary == CycleSummary::default() {
            debug!("Dispatch cycle idle");
        } else {
            info!(
                processed = summary.processed,
                unthrottled = summary.unthrottled,
                backfilled = summary.backfilled,
                sent = summary.sent,
                failed = summary.failed,
                throttled = summary.throttled,
                "Dispatch cycle complete"
            );
        }

        Ok(summary)
    }

    /// Deliver one item and store the outcome.
    ///
    /// The attempt counts whether it succeeds or not; `attempts` is the
    /// post-increment value every policy threshold is defined against.
    async fn process_item(&self, item: &OutboxItem) -> OutboxResult<Outcome> {
        let attempts = item.attempt_count + 1;
        let result = self
            .sender
            .send(&item.integration_id, &item.operation, &item.payload)
            .await;
        let now = Utc::now();

        match result {
            Ok(response) => {
                self.store
                    .mark_sent(&item.id, attempts, &response.to_string())
                    .await?;
                debug!(id = %item.id, integration = %item.integration_id, attempts, "Delivered");
                Ok(Outcome::Sent)
            }
            Err(error) => match policy::decide(&error, attempts, now) {
                Disposition::Throttle {
                    retry_after_seconds,
                    retry_after_until,
                } => {
                    self.store
                        .mark_throttled(
                            &item.id,
                            attempts,
                            retry_after_seconds,
                            retry_after_until,
                            now,
                        )
                        .await?;
                    info!(
                        id = %item.id,
                        integration = %item.integration_id,
                        retry_after_seconds,
                        "Provider rate limited, item parked"
                    );
                    Ok(Outcome::Throttled)
                }
                Disposition::Retry {
                    next_attempt_at,
                    critical_error,
                } => {
                    self.store
                        .mark_failed(
                            &item.id,
                            attempts,
                            &error.to_string(),
                            next_attempt_at,
                            critical_error,
                        )
                        .await?;
                    warn!(
                        id = %item.id,
                        integration = %item.integration_id,
                        attempts,
                        error = %error,
                        "Delivery failed, retry scheduled"
                    );
                    Ok(Outcome::Failed)
                }
                Disposition::DeadLetter {
                    critical_error,
                    backfill_eligible,
                } => {
                    self.store
                        .mark_dead_letter(
                            &item.id,
                            attempts,
                            &error.to_string(),
                            critical_error,
                            backfill_eligible,
                        )
                        .await?;
                    warn!(
                        id = %item.id,
                        integration = %item.integration_id,
                        attempts,
                        backfill_eligible,
                        error = %error,
                        "Retries exhausted, item dead-lettered"
                    );
                    Ok(Outcome::Failed)
                }
            },
        }
    }

    /// Log the admitted batch's per-integration load against its policy.
    fn report_integration_load(&self, admitted: &[OutboxItem]) {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for item in admitted {
            *counts.entry(item.integration_id.as_str()).or_default() += 1;
        }

        for (integration_id, count) in counts {
            let policy = self.limits.policy_for(integration_id);
            debug!(
                integration = integration_id,
                admitted = count,
                requests_per_second = policy.requests_per_second,
                max_concurrent = policy.max_concurrent,
                "Admitted batch load"
            );
        }
    }
}
