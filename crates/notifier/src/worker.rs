//! Dispatch worker: drains the mail queue.
//!
//! One run reads the oldest pending jobs and visits them in sequence:
//! - `attempts >= max_attempts`: terminal, removed without another send
//! - send succeeds: job deleted
//! - send fails: `attempts + 1`, `lastError`, `lastTriedAt` written; the job
//!   stays pending for the next run
//!
//! A job that reaches the ceiling on this run is removed on the next one.
//! Store errors on one job are logged and the run moves on.

use std::sync::Arc;

use assetmail_common::types::MailJob;
use assetmail_engine::queue::JobStore;

use crate::transport::MailTransport;

/// Default jobs per run.
pub const DEFAULT_BATCH_SIZE: i64 = 25;
/// Default attempt ceiling.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// What happens to a job that has exhausted its attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminalPolicy {
    /// Delete the job; it is gone for good.
    #[default]
    Drop,
    /// Move the job to the dead-letter namespace.
    DeadLetter,
}

impl TerminalPolicy {
    pub fn from_flag(dead_letter: bool) -> Self {
        if dead_letter {
            TerminalPolicy::DeadLetter
        } else {
            TerminalPolicy::Drop
        }
    }
}

/// Counts for one worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub fetched: usize,
    pub sent: usize,
    pub failed: usize,
    pub dropped: usize,
    pub dead_lettered: usize,
    /// Jobs whose store write failed.
    pub store_errors: usize,
}

pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    transport: Arc<dyn MailTransport>,
    batch_size: i64,
    max_attempts: i32,
    policy: TerminalPolicy,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn JobStore>, transport: Arc<dyn MailTransport>) -> Self {
        Self {
            store,
            transport,
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            policy: TerminalPolicy::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_terminal_policy(mut self, policy: TerminalPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Process one batch. Fails only if the batch cannot be read.
    pub async fn run_once(&self) -> anyhow::Result<RunSummary> {
        let jobs = self.store.oldest_jobs(self.batch_size).await?;
        let mut summary = RunSummary {
            fetched: jobs.len(),
            ..Default::default()
        };

        if jobs.is_empty() {
            tracing::debug!("Mail queue empty");
            return Ok(summary);
        }

        for job in &jobs {
            if let Err(e) = self.process(job, &mut summary).await {
                summary.store_errors += 1;
                tracing::error!(
                    job_id = %job.id,
                    attempts = job.attempts,
                    error = %format!("{:#}", e),
                    "Failed to update mail job, continuing with batch"
                );
            }
        }

        tracing::info!(
            fetched = summary.fetched,
            sent = summary.sent,
            failed = summary.failed,
            dropped = summary.dropped,
            dead_lettered = summary.dead_lettered,
            store_errors = summary.store_errors,
            "Mail worker run complete"
        );
        Ok(summary)
    }

    async fn process(&self, job: &MailJob, summary: &mut RunSummary) -> anyhow::Result<()> {
        if job.attempts >= self.max_attempts {
            return self.retire(job, summary).await;
        }

        match self.transport.send(&job.message).await {
            Ok(()) => {
                self.store.delete_job(&job.id).await?;
                summary.sent += 1;
                tracing::info!(
                    job_id = %job.id,
                    to = %job.message.to,
                    attempts = job.attempts,
                    "Mail delivered"
                );
            }
            Err(e) => {
                let attempts = job.attempts + 1;
                let reason = e.to_string();
                self.store.record_failure(&job.id, attempts, &reason).await?;
                summary.failed += 1;
                tracing::warn!(
                    job_id = %job.id,
                    attempts,
                    error = %reason,
                    "Mail delivery failed, will retry"
                );
            }
        }
        Ok(())
    }

    async fn retire(&self, job: &MailJob, summary: &mut RunSummary) -> anyhow::Result<()> {
        match self.policy {
            TerminalPolicy::Drop => {
                self.store.delete_job(&job.id).await?;
                summary.dropped += 1;
                tracing::warn!(
                    job_id = %job.id,
                    attempts = job.attempts,
                    last_error = job.last_error.as_deref().unwrap_or(""),
                    "Mail job exhausted its attempts, dropped"
                );
            }
            TerminalPolicy::DeadLetter => {
                self.store.dead_letter_job(job).await?;
                summary.dead_lettered += 1;
                tracing::warn!(
                    job_id = %job.id,
                    attempts = job.attempts,
                    last_error = job.last_error.as_deref().unwrap_or(""),
                    "Mail job exhausted its attempts, moved to dead letters"
                );
            }
        }
        Ok(())
    }
}
