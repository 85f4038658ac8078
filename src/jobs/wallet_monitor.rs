//! Short-lived balance polling for a freshly funded wallet.
//!
//! A monitor job re-runs every [`TICK`] until [`WINDOW`] has passed since it
//! was started, comparing the live balance with the stored one.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{JobId, JobHandler, JobOutcome, JobPayload, JobQueue, active_jobs, send_job};
use crate::common::error::Result;
use crate::services::Notifier;
use crate::sources::ChainClients;
use crate::storage::StorageBackend;
use crate::types::Wallet;
use crate::utils::amount::{format_lamports, parse_amount};
use crate::utils::logging::{self, LogLevel};

pub const WINDOW: Duration = Duration::from_secs(30 * 60);
pub const TICK: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletMonitorJob {
    pub wallet_id: i64,
    pub goal_id: i64,
    /// Epoch milliseconds.
    pub start_time: i64,
}

impl JobPayload for WalletMonitorJob {
    const QUEUE: &'static str = "wallet-monitor";
}

/// Time left in the window after `elapsed`, or `None` once it has closed.
fn remaining(elapsed: Duration) -> Option<Duration> {
    WINDOW.checked_sub(elapsed).filter(|left| !left.is_zero())
}

pub struct WalletMonitorHandler {
    storage: Arc<dyn StorageBackend>,
    clients: ChainClients,
    notifier: Notifier,
}

impl WalletMonitorHandler {
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, clients: ChainClients, notifier: Notifier) -> Self {
        Self {
            storage,
            clients,
            notifier,
        }
    }

    async fn check_balance(&self, wallet: &Wallet) -> Result<()> {
        let client = self.clients.get(wallet.network)?;
        let lamports = client.balance(&wallet.public_key).await?;
        if parse_amount(&wallet.last_balance).is_ok_and(|stored| stored == lamports) {
            return Ok(());
        }
        let balance = format_lamports(lamports);

        self.storage
            .update_wallet_balance(wallet.id, &balance, Utc::now())
            .await?;
        logging::log(
            LogLevel::Info,
            &format!(
                "Wallet {} balance {} -> {balance} SOL",
                wallet.id, wallet.last_balance
            ),
        );
        self.notifier.balance_changed(wallet.id, balance);
        Ok(())
    }
}

#[async_trait]
impl JobHandler<WalletMonitorJob> for WalletMonitorHandler {
    async fn handle(&self, job_id: JobId, payload: WalletMonitorJob) -> Result<JobOutcome> {
        let elapsed_ms = Utc::now().timestamp_millis().saturating_sub(payload.start_time);
        let elapsed = Duration::from_millis(u64::try_from(elapsed_ms).unwrap_or(0));

        let Some(left) = remaining(elapsed) else {
            logging::log(
                LogLevel::Debug,
                &format!("Monitor {job_id} for wallet {} expired", payload.wallet_id),
            );
            return Ok(JobOutcome::Complete);
        };

        let Some(wallet) = self.storage.get_wallet(payload.wallet_id).await? else {
            logging::log(
                LogLevel::Warning,
                &format!("Monitored wallet {} no longer exists", payload.wallet_id),
            );
            return Ok(JobOutcome::Complete);
        };

        if let Err(e) = self.check_balance(&wallet).await {
            logging::log_error(&format!("Balance check for wallet {} failed", wallet.id), &e);
        }

        if left > TICK {
            Ok(JobOutcome::Reschedule(TICK))
        } else {
            Ok(JobOutcome::Complete)
        }
    }
}

/// Starts monitoring `wallet_id`, replacing any monitor already running for
/// the same wallet and goal.
///
/// # Errors
///
/// Propagates queue failures.
pub async fn start_wallet_monitoring(
    queue: &dyn JobQueue,
    wallet_id: i64,
    goal_id: i64,
) -> Result<JobId> {
    queue.create_queue(WalletMonitorJob::QUEUE).await?;
    for (job_id, existing) in active_jobs::<WalletMonitorJob>(queue).await? {
        if existing.wallet_id == wallet_id && existing.goal_id == goal_id {
            queue.complete(job_id).await?;
        }
    }

    let payload = WalletMonitorJob {
        wallet_id,
        goal_id,
        start_time: Utc::now().timestamp_millis(),
    };
    let job_id = send_job(queue, &payload, None).await?;
    logging::log(
        LogLevel::Info,
        &format!("Monitoring wallet {wallet_id} for goal {goal_id} (job {job_id})"),
    );
    Ok(job_id)
}
