use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::database::{OptionStore, StoreError};

const LOCK_KEY: &str = "run_lock";

/// A crashed run blocks new ones for at most this long.
pub const LOCK_DURATION_SECS: i64 = 300;

/// Process-wide (and cross-process) guard over check runs.
///
/// Backed by a single option record so every process sharing the database
/// sees the same lock.
#[derive(Clone)]
pub struct RunLock {
    options: Arc<dyn OptionStore>,
    duration: Duration,
}

impl RunLock {
    pub fn new(options: Arc<dyn OptionStore>) -> Self {
        Self::with_duration(options, Duration::seconds(LOCK_DURATION_SECS))
    }

    pub fn with_duration(options: Arc<dyn OptionStore>, duration: Duration) -> Self {
        Self { options, duration }
    }

    /// Try to take the lock; `false` means another run holds it.
    pub async fn acquire(&self) -> Result<bool, StoreError> {
        let now = Utc::now();
        let expires_at = now + self.duration;
        let value = now.timestamp().to_string();

        if self.options.insert_if_absent(LOCK_KEY, &value, Some(expires_at)).await? {
            debug!("Run lock acquired");
            return Ok(true);
        }

        let Some(current) = self.options.get_record(LOCK_KEY).await? else {
            // released between our insert and read
            return self.options.insert_if_absent(LOCK_KEY, &value, Some(expires_at)).await;
        };

        if current.expires_at.is_some() && !current.is_expired(now) {
            return Ok(false);
        }

        let stolen = self
            .options
            .compare_and_set(LOCK_KEY, current.expires_at, &value, Some(expires_at))
            .await?;
        if stolen {
            info!("Took over expired run lock");
        }
        Ok(stolen)
    }

    /// Drop the lock unconditionally
    pub async fn release(&self) -> Result<(), StoreError> {
        self.options.delete(LOCK_KEY).await?;
        debug!("Run lock released");
        Ok(())
    }

    /// Whether a live lock exists right now
    pub async fn is_held(&self) -> Result<bool, StoreError> {
        Ok(self.options.get(LOCK_KEY).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::create_test_store;
    use anyhow::Result;

    #[tokio::test]
    async fn test_lock_is_exclusive_until_released() -> Result<()> {
        let (store, _dir) = create_test_store().await?;
        let lock = RunLock::new(Arc::new(store));

        assert!(lock.acquire().await?);
        assert!(lock.is_held().await?);
        assert!(!lock.acquire().await?);

        lock.release().await?;
        assert!(!lock.is_held().await?);
        assert!(lock.acquire().await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_acquire_has_one_winner() -> Result<()> {
        let (store, _dir) = create_test_store().await?;
        let store: Arc<dyn OptionStore> = Arc::new(store);
        let first = RunLock::new(store.clone());
        let second = RunLock::new(store);

        let (a, b) = tokio::join!(first.acquire(), second.acquire());

        assert!(a? ^ b?);
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_lock_is_stolen() -> Result<()> {
        let (store, _dir) = create_test_store().await?;
        let store: Arc<dyn OptionStore> = Arc::new(store);

        let crashed = RunLock::with_duration(store.clone(), Duration::seconds(-1));
        assert!(crashed.acquire().await?);
        assert!(!crashed.is_held().await?);

        let next = RunLock::new(store);
        assert!(next.acquire().await?);
        assert!(next.is_held().await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_release_without_lock_is_harmless() -> Result<()> {
        let (store, _dir) = create_test_store().await?;
        let lock = RunLock::new(Arc::new(store));

        lock.release().await?;
        assert!(lock.acquire().await?);
        Ok(())
    }
}
