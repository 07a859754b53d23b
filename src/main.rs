//! # Reminders Entry Point
//!
//! Command-line front end for the matcher, the delivery worker and the
//! operational helpers around them.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use reminders::clock::LocalClock;
use reminders::config::{AppConfig, ConfigLoader};
use reminders::consumer::DeliveryWorker;
use reminders::db::init_pool;
use reminders::diagnostics::NotificationDiagnostics;
use reminders::gateway::{SerwerSmsClient, SmsGateway};
use reminders::matcher::NotificationMatcher;
use reminders::migration::{Migrator, MigratorTrait};
use reminders::notification::MessageTemplates;
use reminders::phone::to_wire_format;
use reminders::queue::{DbQueue, DeliveryQueue, InMemoryQueue};
use reminders::repositories::NotificationLogRepository;
use reminders::telemetry::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "reminders")]
#[command(version, about = "Waste collection SMS reminder pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending database migrations.
    Migrate,
    /// Run the matcher loop until interrupted.
    Matcher,
    /// Run the delivery worker loop until interrupted.
    Worker,
    /// Run matcher and worker together until interrupted.
    Run,
    /// Evaluate a single matcher time slot.
    Tick {
        /// Instant to evaluate (RFC 3339); defaults to now.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        /// Print the jobs instead of enqueueing them.
        #[arg(long)]
        dry_run: bool,
    },
    /// Send one message through the configured gateway.
    SendTestSms {
        #[arg(long)]
        phone: String,
        #[arg(long, default_value = "Test SMS from the waste collection reminder service.")]
        message: String,
    },
    /// Explain whether a user would be notified.
    Diagnose {
        #[arg(long)]
        user: String,
        /// Instant to evaluate (RFC 3339); defaults to now.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;
    init_tracing(&config)?;

    if let Ok(redacted) = config.redacted_json() {
        info!(profile = %config.profile, config = %redacted, "Configuration loaded");
    }

    let db = init_pool(&config).await?;

    match cli.command {
        Command::Migrate => {
            Migrator::up(&db, None).await.context("migration failed")?;
            info!("Migrations applied");
        }
        Command::Matcher => {
            let shutdown = shutdown_on_ctrl_c();
            matcher(&config, db.clone(), queue(&config, &db))
                .run(shutdown)
                .await?;
        }
        Command::Worker => {
            let shutdown = shutdown_on_ctrl_c();
            worker(&config, db.clone(), queue(&config, &db))?
                .run(shutdown)
                .await?;
        }
        Command::Run => {
            let shutdown = shutdown_on_ctrl_c();
            let queue = queue(&config, &db);
            let matcher = matcher(&config, db.clone(), queue.clone());
            let worker = worker(&config, db, queue)?;

            let (matcher_result, worker_result) =
                tokio::join!(matcher.run(shutdown.clone()), worker.run(shutdown));
            matcher_result?;
            worker_result?;
        }
        Command::Tick { at, dry_run } => {
            let now = at.unwrap_or_else(Utc::now);
            if dry_run {
                let memory = Arc::new(InMemoryQueue::default());
                let summary = matcher(&config, db, memory.clone()).tick_at(now).await?;
                println!("{}", serde_json::to_string_pretty(&summary)?);
                println!("{}", serde_json::to_string_pretty(&memory.pending_jobs().await)?);
            } else {
                let summary = matcher(&config, db.clone(), queue(&config, &db))
                    .tick_at(now)
                    .await?;
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
        }
        Command::SendTestSms { phone, message } => {
            let phone = to_wire_format(&phone).context("invalid phone number")?;
            let gateway = SerwerSmsClient::from_config(&config.gateway)?;
            match gateway.send_sms(&phone, &message).await {
                Ok(receipt) => println!(
                    "sent: message_id={} parts={} status={}",
                    receipt.message_id, receipt.parts, receipt.status
                ),
                Err(failure) => {
                    warn!(error = %failure, "Test SMS failed");
                    anyhow::bail!("test SMS failed: {failure}");
                }
            }
        }
        Command::Diagnose { user, at } => {
            let diagnostics =
                NotificationDiagnostics::new(db, LocalClock::from_mode(config.matcher.clock));
            let report = diagnostics
                .diagnose(&user, at.unwrap_or_else(Utc::now))
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn queue(config: &AppConfig, db: &sea_orm::DatabaseConnection) -> Arc<dyn DeliveryQueue> {
    Arc::new(DbQueue::from_config(db.clone(), &config.queue))
}

fn matcher(
    config: &AppConfig,
    db: sea_orm::DatabaseConnection,
    queue: Arc<dyn DeliveryQueue>,
) -> NotificationMatcher {
    NotificationMatcher::new(db, queue, &config.matcher)
}

fn worker(
    config: &AppConfig,
    db: sea_orm::DatabaseConnection,
    queue: Arc<dyn DeliveryQueue>,
) -> Result<DeliveryWorker> {
    let gateway: Arc<dyn SmsGateway> = Arc::new(SerwerSmsClient::from_config(&config.gateway)?);
    Ok(DeliveryWorker::new(
        queue,
        gateway,
        NotificationLogRepository::new(db),
        MessageTemplates::for_locale(config.sms_locale),
        &config.worker,
    ))
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
        }
        trigger.cancel();
    });
    token
}
