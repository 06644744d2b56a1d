use std::str::FromStr;

use chrono::FixedOffset;
use serde::Deserialize;

use crate::time::zone_from_hours;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Redis connection string, used for the single-runner lease
    pub redis_url: String,

    /// Audit address copied on every notification
    pub admin_email: String,

    /// SMTP relay host (default: smtp.gmail.com)
    pub smtp_host: String,

    /// SMTP relay port (default: 587, STARTTLS)
    pub smtp_port: u16,

    pub smtp_user: Option<String>,

    pub smtp_password: Option<String>,

    /// Sender address; falls back to `smtp_user`
    pub smtp_from: Option<String>,

    /// Per-delivery transport timeout in seconds (default: 30)
    pub smtp_timeout_secs: u64,

    /// Interval between dispatch worker runs in seconds (default: 60)
    pub mail_poll_interval_secs: u64,

    /// Jobs read per worker run (default: 25)
    pub mail_batch_size: i64,

    /// Attempt ceiling before a job is discarded (default: 5)
    pub mail_max_attempts: i32,

    /// Hard wall-clock ceiling for a single worker run in seconds (default: 300)
    pub mail_run_timeout_secs: u64,

    /// Move exhausted jobs to `mail_jobs_dead` instead of deleting them
    pub mail_dead_letter: bool,

    /// Days ahead the reminder scan looks (default: 15)
    pub reminder_lookahead_days: i64,

    /// Local hour at which the daily reminder scan runs (default: 9)
    pub reminder_hour: u32,

    /// Fixed civil time zone offset in hours (default: 7, Asia/Bangkok)
    pub utc_offset_hours: i32,

    /// Port the HTTP API listens on (default: 3000)
    pub api_port: u16,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 20)?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            admin_email: std::env::var("ADMIN_EMAIL")
                .map_err(|_| anyhow::anyhow!("ADMIN_EMAIL environment variable is required"))?
                .trim()
                .to_string(),
            smtp_host: std::env::var("SMTP_HOST").unwrap_or_else(|_| "smtp.gmail.com".to_string()),
            smtp_port: parse_var("SMTP_PORT", 587)?,
            smtp_user: non_empty_var("SMTP_USER"),
            smtp_password: non_empty_var("SMTP_PASSWORD"),
            smtp_from: non_empty_var("SMTP_FROM"),
            smtp_timeout_secs: parse_var("SMTP_TIMEOUT_SECS", 30)?,
            mail_poll_interval_secs: parse_var("MAIL_POLL_INTERVAL_SECS", 60)?,
            mail_batch_size: parse_var("MAIL_BATCH_SIZE", 25)?,
            mail_max_attempts: parse_var("MAIL_MAX_ATTEMPTS", 5)?,
            mail_run_timeout_secs: parse_var("MAIL_RUN_TIMEOUT_SECS", 300)?,
            mail_dead_letter: parse_var("MAIL_DEAD_LETTER", false)?,
            reminder_lookahead_days: parse_var("REMINDER_LOOKAHEAD_DAYS", 15)?,
            reminder_hour: parse_var("REMINDER_HOUR", 9)?,
            utc_offset_hours: parse_var("UTC_OFFSET_HOURS", 7)?,
            api_port: parse_var("API_PORT", 3000)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.admin_email.is_empty() {
            anyhow::bail!("ADMIN_EMAIL must not be blank");
        }
        if self.mail_batch_size <= 0 {
            anyhow::bail!("MAIL_BATCH_SIZE must be positive");
        }
        if self.mail_max_attempts <= 0 {
            anyhow::bail!("MAIL_MAX_ATTEMPTS must be positive");
        }
        if self.reminder_hour > 23 {
            anyhow::bail!("REMINDER_HOUR must be between 0 and 23");
        }
        self.zone()?;
        Ok(())
    }

    /// The fixed civil zone all dates are computed and displayed in.
    pub fn zone(&self) -> anyhow::Result<FixedOffset> {
        zone_from_hours(self.utc_offset_hours)
            .ok_or_else(|| anyhow::anyhow!("UTC_OFFSET_HOURS must be between -23 and 23"))
    }

    /// Sender address for outgoing mail, if one is configured.
    pub fn sender(&self) -> Option<&str> {
        self.smtp_from.as_deref().or(self.smtp_user.as_deref())
    }
}

/// Read an optional variable, treating blank values as unset.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read and parse a variable, using `default` when it is unset.
fn parse_var<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> anyhow::Result<T> {
    raw.trim().parse().map_err(|_| {
        anyhow::anyhow!(
            "{} must be a valid {}",
            name,
            std::any::type_name::<T>()
        )
    })
}
