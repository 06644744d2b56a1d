use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, Utc};
use redis::aio::ConnectionManager;

use assetmail_common::config::AppConfig;
use assetmail_common::db;
use assetmail_common::time::local_date;
use assetmail_engine::{MailQueue, NotificationPipeline, PgStore};
use assetmail_notifier::lease::{self, RunLease};
use assetmail_notifier::scheduler::delay_until_next_run;
use assetmail_notifier::{Dispatcher, SmtpMailer, TerminalPolicy};

/// Extra lease lifetime beyond the run timeout.
const LEASE_MARGIN: Duration = Duration::from_secs(30);

/// A day's scan claim outlives the day so late starters skip it.
const SCAN_CLAIM_TTL: Duration = Duration::from_secs(36 * 3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "assetmail_notifier=info,assetmail_engine=info".into()),
        )
        .json()
        .init();

    tracing::info!("AssetMail notifier starting...");

    let config = AppConfig::from_env()?;
    let zone = config.zone()?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::migrate(&pool).await?;

    let store = Arc::new(PgStore::new(pool));
    let transport = Arc::new(SmtpMailer::from_config(&config)?);
    let redis = lease::connect(&config.redis_url).await?;

    let dispatcher = Dispatcher::new(store.clone(), transport)
        .with_batch_size(config.mail_batch_size)
        .with_max_attempts(config.mail_max_attempts)
        .with_terminal_policy(TerminalPolicy::from_flag(config.mail_dead_letter));

    let pipeline = NotificationPipeline::new(
        store.clone(),
        store.clone(),
        MailQueue::new(store, zone),
        config.admin_email.clone(),
        zone,
        config.reminder_lookahead_days,
    );

    let run_timeout = Duration::from_secs(config.mail_run_timeout_secs);
    let worker_lease = RunLease::new(redis.clone(), "mail-worker", run_timeout + LEASE_MARGIN);

    tracing::info!(
        poll_interval_secs = config.mail_poll_interval_secs,
        batch_size = config.mail_batch_size,
        max_attempts = config.mail_max_attempts,
        dead_letter = config.mail_dead_letter,
        reminder_hour = config.reminder_hour,
        lookahead_days = config.reminder_lookahead_days,
        "Starting mail worker and reminder scheduler"
    );

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        _ = worker_loop(
            &dispatcher,
            &worker_lease,
            Duration::from_secs(config.mail_poll_interval_secs),
            run_timeout,
        ) => {}
        _ = reminder_loop(&pipeline, redis, config.reminder_hour, zone) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("AssetMail notifier stopped.");
    Ok(())
}

/// Drain the queue on a fixed interval, one leased run at a time.
///
/// A run cut off by `run_timeout` leaves unvisited jobs pending.
async fn worker_loop(
    dispatcher: &Dispatcher,
    lease: &RunLease,
    poll_interval: Duration,
    run_timeout: Duration,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let run = tokio::time::timeout(run_timeout, dispatcher.run_once());
        match lease.run_exclusive(run).await {
            Ok(Some(Ok(Ok(_summary)))) => {}
            Ok(Some(Ok(Err(e)))) => {
                tracing::error!(error = %format!("{:#}", e), "Mail worker run failed");
            }
            Ok(Some(Err(_))) => {
                tracing::warn!(
                    timeout_secs = run_timeout.as_secs(),
                    "Mail worker run hit its time limit, remaining jobs stay pending"
                );
            }
            Ok(None) => {
                tracing::debug!("Another worker holds the lease, skipping run");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to take worker lease, skipping run");
            }
        }
    }
}

/// Run the lookahead scan once a day at `hour` local time.
///
/// The claim is keyed by local date and never released, so each day is
/// scanned by exactly one process.
async fn reminder_loop(
    pipeline: &NotificationPipeline,
    redis: ConnectionManager,
    hour: u32,
    zone: FixedOffset,
) {
    loop {
        let delay = delay_until_next_run(Utc::now(), hour, &zone);
        tracing::info!(sleep_secs = delay.as_secs(), "Next lookahead scan scheduled");
        tokio::time::sleep(delay).await;

        let now = Utc::now();
        let claim = RunLease::new(
            redis.clone(),
            &format!("lookahead-scan:{}", local_date(now, &zone)),
            SCAN_CLAIM_TTL,
        );
        match claim.try_acquire().await {
            Ok(Some(_)) => {
                pipeline.run_lookahead(now).await;
            }
            Ok(None) => {
                tracing::info!("Lookahead scan already claimed for today");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to claim lookahead scan, skipping today");
            }
        }
    }
}
