//! Command bodies: dispatcher wiring, the run loop, and the operator commands.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use outbox_core::{Config, Paths};
use outbox_database::{Database, NewOutboxItem, OutboxStore, StoreHandle};
use outbox_engine::{CycleOptions, Dispatcher, HttpSender, SenderConfig};

/// Open the database and assemble a dispatcher from configuration.
async fn build_dispatcher(config: &Config, paths: &Paths) -> Result<Dispatcher, Box<dyn std::error::Error>> {
    // Reject a malformed gateway URL before any delivery is attempted
    config.api_base_url()?;
    paths.ensure_dirs()?;

    let db = Database::open(&paths.database_file()).await?;
    db.health_check().await?;
    let store: StoreHandle = Arc::new(db);

    let sender = HttpSender::new(SenderConfig {
        api_base_url: config.api_base_url.clone(),
        api_token: config.api_token.clone(),
        timeout_secs: config.request_timeout_secs,
    })?;

    Ok(Dispatcher::new(store, Arc::new(sender), config.rate_limits.clone()))
}

/// Run dispatch cycles until interrupted, or a single cycle with `once`.
pub async fn run_dispatcher(
    config: Config,
    paths: Paths,
    once: bool,
    batch_size: Option<usize>,
    no_backfill: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let dispatcher = build_dispatcher(&config, &paths).await?;

    let options = CycleOptions {
        batch_size: batch_size.unwrap_or(config.batch_size),
        include_backfill: !no_backfill && config.include_backfill,
    };

    if once {
        let summary = dispatcher.run_cycle(&options).await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    info!(
        interval_secs = config.dispatch_interval_secs,
        batch_size = options.batch_size,
        include_backfill = options.include_backfill,
        "Dispatcher started"
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(config.dispatch_interval_secs));

    // A single pinned signal future so a ctrl-c arriving mid-cycle is not lost
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping dispatcher");
                break;
            }
            _ = ticker.tick() => {
                // A failed cycle is retried on the next tick
                if let Err(e) = dispatcher.run_cycle(&options).await {
                    error!(error = %e, "Dispatch cycle failed");
                }
            }
        }
    }

    Ok(())
}

/// Validate and insert a queued item, then print its generated id.
pub async fn enqueue_item(
    paths: &Paths,
    integration: &str,
    operation: &str,
    payload: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    serde_json::from_str::<serde_json::Value>(payload)
        .map_err(|e| format!("payload is not valid JSON: {e}"))?;

    paths.ensure_dirs()?;
    let db = Database::open(&paths.database_file()).await?;
    let store: StoreHandle = Arc::new(db);

    let item = store
        .insert_item(NewOutboxItem {
            id: uuid::Uuid::new_v4().to_string(),
            integration_id: integration.to_string(),
            operation: operation.to_string(),
            payload: payload.to_string(),
        })
        .await?;

    println!("Enqueued item {}", item.id);
    println!("  Integration: {}", item.integration_id);
    println!("  Operation:   {}", item.operation);
    println!("  Status:      {}", item.status.as_str());

    Ok(())
}

/// Print per-status counts and the most recent dead-letter items.
pub async fn show_status(paths: &Paths) -> Result<(), Box<dyn std::error::Error>> {
    let db_path = paths.database_file();
    if !db_path.exists() {
        println!("No outbox database found at {}", db_path.display());
        return Ok(());
    }

    let db = Database::open(&db_path).await?;
    let store: StoreHandle = Arc::new(db);

    let counts = store.status_counts().await?;
    println!("Outbox status");
    println!("  Queued:      {}", counts.queued);
    println!("  Throttled:   {}", counts.throttled);
    println!("  Failed:      {}", counts.failed);
    println!("  Sent:        {}", counts.sent);
    println!("  Dead letter: {}", counts.dead_letter);
    println!("  Total:       {}", counts.total());

    let dead_letters = store.list_dead_letters(10).await?;
    if !dead_letters.is_empty() {
        println!();
        println!("Recent dead-letter items:");
        for item in dead_letters {
            println!(
                "  {} [{}/{}] attempts={} backfill_eligible={} last_error={}",
                item.id,
                item.integration_id,
                item.operation,
                item.attempt_count,
                item.backfill_eligible,
                item.last_error.as_deref().unwrap_or("-"),
            );
        }
    }

    Ok(())
}
