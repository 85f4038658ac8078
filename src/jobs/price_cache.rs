//! Recurring refresh of the per-network USD price cache.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{JobId, JobHandler, JobOutcome, JobPayload, JobQueue, active_jobs, send_job};
use crate::common::error::{GoalSyncError, Result};
use crate::services::PriceSource;
use crate::storage::StorageBackend;
use crate::types::Network;
use crate::utils::logging::{self, LogLevel};

pub const MAX_RETRIES: u32 = 3;
pub const BASE_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Networks with a price. Localnet tokens have no market.
pub const SUPPORTED_NETWORKS: [Network; 3] = [Network::Mainnet, Network::Devnet, Network::Testnet];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceCacheJob {
    /// Epoch milliseconds at enqueue time.
    pub timestamp: i64,
}

impl JobPayload for PriceCacheJob {
    const QUEUE: &'static str = "price-checker";
}

pub struct PriceRefresher {
    storage: Arc<dyn StorageBackend>,
    source: Arc<dyn PriceSource>,
}

impl PriceRefresher {
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, source: Arc<dyn PriceSource>) -> Self {
        Self { storage, source }
    }

    /// Fetches `network`'s price, retrying with exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns the last error once [`MAX_RETRIES`] attempts have failed, or
    /// [`GoalSyncError::UnsupportedNetwork`] for a network without a price.
    pub async fn fetch_with_retry(&self, network: Network) -> Result<f64> {
        let asset = network
            .price_asset_id()
            .ok_or_else(|| GoalSyncError::UnsupportedNetwork(network.to_string()))?;

        let mut attempt = 0;
        loop {
            match self.source.usd_price(asset).await {
                Ok(price) => return Ok(price),
                Err(e) => {
                    attempt += 1;
                    if attempt >= MAX_RETRIES {
                        return Err(e);
                    }
                    let delay = BASE_RETRY_DELAY * 2u32.pow(attempt);
                    logging::log(
                        LogLevel::Warning,
                        &format!(
                            "Price for {network} failed (attempt {attempt}/{MAX_RETRIES}): {e}; retrying in {delay:?}"
                        ),
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Refreshes every supported network. Returns how many were updated.
    pub async fn refresh_all(&self) -> usize {
        let mut updated = 0;
        for network in SUPPORTED_NETWORKS {
            let price = match self.fetch_with_retry(network).await {
                Ok(price) => price,
                Err(e) => {
                    logging::log_error(&format!("Giving up on {network} price"), &e);
                    continue;
                }
            };

            match self.storage.upsert_price(network, price, Utc::now()).await {
                Ok(()) => {
                    updated += 1;
                    logging::log(
                        LogLevel::Debug,
                        &format!("{network} price cached at ${price}"),
                    );
                }
                Err(e) => logging::log_error(&format!("Caching {network} price failed"), &e),
            }
        }
        updated
    }
}

#[async_trait]
impl JobHandler<PriceCacheJob> for PriceRefresher {
    async fn handle(&self, _job_id: JobId, _payload: PriceCacheJob) -> Result<JobOutcome> {
        let updated = self.refresh_all().await;
        logging::log(
            LogLevel::Info,
            &format!(
                "Price cache refreshed for {updated}/{} networks",
                SUPPORTED_NETWORKS.len()
            ),
        );
        Ok(JobOutcome::Reschedule(REFRESH_INTERVAL))
    }
}

/// Enqueues the recurring price job unless one is already scheduled.
///
/// # Errors
///
/// Propagates queue failures.
pub async fn schedule_price_refresh(queue: &dyn JobQueue) -> Result<Option<JobId>> {
    queue.create_queue(PriceCacheJob::QUEUE).await?;
    if !active_jobs::<PriceCacheJob>(queue).await?.is_empty() {
        return Ok(None);
    }

    let payload = PriceCacheJob {
        timestamp: Utc::now().timestamp_millis(),
    };
    let job_id = send_job(queue, &payload, None).await?;
    logging::log(LogLevel::Info, &format!("Scheduled price refresh (job {job_id})"));
    Ok(Some(job_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::MemoryJobQueue;
    use crate::storage::MemoryStorage;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Fails the first `failures` calls, then answers 150.0.
    struct FlakySource {
        failures: usize,
        calls: Mutex<Vec<Instant>>,
    }

    impl FlakySource {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PriceSource for FlakySource {
        async fn usd_price(&self, _asset_id: &str) -> Result<f64> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Instant::now());
            if calls.len() <= self.failures {
                return Err(GoalSyncError::RpcError("rate limited".to_string()));
            }
            Ok(150.0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backs_off_exponentially() {
        let source = Arc::new(FlakySource::new(2));
        let refresher = PriceRefresher::new(Arc::new(MemoryStorage::new()), source.clone());

        let price = refresher.fetch_with_retry(Network::Mainnet).await.unwrap();
        assert_eq!(price, 150.0);

        let calls = source.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        let first_gap = calls[1] - calls[0];
        let second_gap = calls[2] - calls[1];
        assert!(first_gap >= Duration::from_secs(2) && first_gap < Duration::from_secs(3));
        assert!(second_gap >= Duration::from_secs(4) && second_gap < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_still_reschedule() {
        let source = Arc::new(FlakySource::new(usize::MAX));
        let storage = Arc::new(MemoryStorage::new());
        let refresher = PriceRefresher::new(storage.clone(), source.clone());

        let outcome = refresher.handle(1, PriceCacheJob { timestamp: 0 }).await.unwrap();
        assert_eq!(outcome, JobOutcome::Reschedule(REFRESH_INTERVAL));
        assert_eq!(source.call_count(), SUPPORTED_NETWORKS.len() * MAX_RETRIES as usize);
        assert!(storage.get_price(Network::Mainnet).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failing_network_does_not_block_others() {
        // Mainnet is refreshed first and uses up every failing call.
        let source = Arc::new(FlakySource::new(MAX_RETRIES as usize));
        let storage = Arc::new(MemoryStorage::new());
        let refresher = PriceRefresher::new(storage.clone(), source.clone());

        assert_eq!(refresher.refresh_all().await, 2);
        assert!(storage.get_price(Network::Mainnet).await.unwrap().is_none());
        assert!(storage.get_price(Network::Devnet).await.unwrap().is_some());
        assert!(storage.get_price(Network::Testnet).await.unwrap().is_some());
        assert_eq!(source.call_count(), MAX_RETRIES as usize + 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prices_are_cached_for_supported_networks() {
        let storage = Arc::new(MemoryStorage::new());
        let refresher = PriceRefresher::new(storage.clone(), Arc::new(FlakySource::new(0)));

        assert_eq!(refresher.refresh_all().await, 3);
        for network in SUPPORTED_NETWORKS {
            assert_eq!(storage.get_price(network).await.unwrap().unwrap().price, 150.0);
        }
        assert!(storage.get_price(Network::Localnet).await.unwrap().is_none());
        assert!(matches!(
            refresher.fetch_with_retry(Network::Localnet).await,
            Err(GoalSyncError::UnsupportedNetwork(_))
        ));
    }

    #[tokio::test]
    async fn test_schedule_is_idempotent() {
        let queue = MemoryJobQueue::new();
        assert!(schedule_price_refresh(&queue).await.unwrap().is_some());
        assert!(schedule_price_refresh(&queue).await.unwrap().is_none());
        assert_eq!(queue.list_active(PriceCacheJob::QUEUE).await.unwrap().len(), 1);
    }
}
