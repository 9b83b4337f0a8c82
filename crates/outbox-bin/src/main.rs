//! outboxd - store-and-forward dispatcher for queued provider deliveries.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use outbox_core::{init_logging, Config, Paths};

#[derive(Parser)]
#[command(name = "outboxd")]
#[command(about = "Outbox dispatcher for queued webhook, email, and SMS deliveries")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error); overrides the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for the database and config (defaults to ~/.outboxd)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run dispatch cycles on an interval (default when no command is given)
    Run {
        /// Run a single cycle, print its summary as JSON, and exit
        #[arg(long)]
        once: bool,

        /// Maximum items admitted per cycle (defaults to the configured value)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Skip the unthrottle and dead-letter backfill steps
        #[arg(long)]
        no_backfill: bool,
    },
    /// Add an item to the outbox queue
    Enqueue {
        /// Integration to deliver through (e.g. slack, sendgrid, twilio)
        #[arg(short, long)]
        integration: String,

        /// Provider operation to invoke (e.g. send_message)
        #[arg(short, long)]
        operation: String,

        /// JSON payload forwarded to the provider
        #[arg(short, long)]
        payload: String,
    },
    /// Show queue counts and recent dead-letter items
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let config = Config::load(&paths)?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(level);

    match cli.command {
        Some(Commands::Run {
            once,
            batch_size,
            no_backfill,
        }) => {
            app::run_dispatcher(config, paths, once, batch_size, no_backfill).await?;
        }
        Some(Commands::Enqueue {
            integration,
            operation,
            payload,
        }) => {
            app::enqueue_item(&paths, &integration, &operation, &payload).await?;
        }
        Some(Commands::Status) => {
            app::show_status(&paths).await?;
        }
        None => {
            app::run_dispatcher(config, paths, false, None, false).await?;
        }
    }

    Ok(())
}
