//! Redis-backed single-runner lease.
//!
//! Worker runs and lookahead scans must never overlap, even with several
//! notifier processes running. Each run takes a lease first with
//! `SET key token NX PX ttl`; a run that cannot take it is skipped. The TTL
//! bounds how long a crashed holder blocks others. Release deletes the key
//! only if it still holds our token, so an expired lease taken over by
//! another process is never released by us.

use std::time::Duration;

use rand::Rng;
use redis::aio::ConnectionManager;

const KEY_PREFIX: &str = "assetmail:lease";

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Connect to Redis with an auto-reconnecting connection manager.
pub async fn connect(redis_url: &str) -> anyhow::Result<ConnectionManager> {
    let client = redis::Client::open(redis_url)?;
    let manager = ConnectionManager::new(client).await?;
    tracing::info!("Connected to Redis");
    Ok(manager)
}

/// A named lease on one kind of run.
#[derive(Clone)]
pub struct RunLease {
    redis: ConnectionManager,
    key: String,
    ttl: Duration,
}

/// Proof of holding a lease; pass back to [`RunLease::release`].
#[derive(Debug)]
pub struct LeaseToken(String);

impl RunLease {
    pub fn new(redis: ConnectionManager, name: &str, ttl: Duration) -> Self {
        Self {
            redis,
            key: lease_key(name),
            ttl,
        }
    }

    /// Try to take the lease. `None` when another runner holds it.
    pub async fn try_acquire(&self) -> anyhow::Result<Option<LeaseToken>> {
        let token = new_token();
        let mut conn = self.redis.clone();

        let result: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        if result.is_none() {
            tracing::debug!(key = %self.key, "Lease held elsewhere");
            return Ok(None);
        }
        Ok(Some(LeaseToken(token)))
    }

    /// Release the lease if we still hold it.
    pub async fn release(&self, token: LeaseToken) -> anyhow::Result<()> {
        let mut conn = self.redis.clone();
        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&token.0)
            .invoke_async(&mut conn)
            .await?;

        if deleted == 0 {
            tracing::warn!(key = %self.key, "Lease expired before release");
        }
        Ok(())
    }

    /// Run `task` under the lease. Returns `None` if the lease was not
    /// available and the task did not run.
    pub async fn run_exclusive<F, T>(&self, task: F) -> anyhow::Result<Option<T>>
    where
        F: Future<Output = T>,
    {
        let Some(token) = self.try_acquire().await? else {
            return Ok(None);
        };

        let output = task.await;

        if let Err(e) = self.release(token).await {
            tracing::warn!(key = %self.key, error = %e, "Failed to release lease");
        }
        Ok(Some(output))
    }
}

fn lease_key(name: &str) -> String {
    format!("{}:{}", KEY_PREFIX, name)
}

fn new_token() -> String {
    let bytes: [u8; 16] = rand::thread_rng().r#gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_key() {
        assert_eq!(lease_key("mail-worker"), "assetmail:lease:mail-worker");
    }

    #[test]
    fn test_tokens_are_random_hex() {
        let a = new_token();
        let b = new_token();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    /// Requires a running Redis at `REDIS_URL` (default localhost).
    #[tokio::test]
    #[ignore]
    async fn test_lease_excludes_second_holder() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
        let redis = connect(&url).await.unwrap();
        let name = format!("test-{}", new_token());
        let lease = RunLease::new(redis, &name, Duration::from_secs(10));

        let token = lease.try_acquire().await.unwrap().expect("first acquire");
        assert!(lease.try_acquire().await.unwrap().is_none());

        lease.release(token).await.unwrap();
        let again = lease.try_acquire().await.unwrap().expect("reacquire after release");
        lease.release(again).await.unwrap();
    }
}
