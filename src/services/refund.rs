//! Refund payouts.
//!
//! Every wallet of a goal that carries a refund address is emptied into that
//! address. Wallets are processed concurrently and independently: one failed
//! transfer never blocks or rolls back another.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;

use super::notifier::Notifier;
use crate::common::error::{GoalSyncError, Result};
use crate::sources::ChainClients;
use crate::storage::StorageBackend;
use crate::types::{GoalStatus, Network, Wallet};
use crate::utils::amount::{DUST_THRESHOLD_LAMPORTS, format_lamports};
use crate::utils::logging::{self, LogLevel};

pub const REASON_ZERO_BALANCE: &str = "zero balance";
pub const REASON_TOO_SMALL: &str = "balance too small";

/// Result of refunding one wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RefundOutcome {
    Sent { signature: String, amount: String },
    Skipped { reason: String, amount: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRefund {
    pub wallet_id: i64,
    pub network: Network,
    pub refund_address: String,
    #[serde(flatten)]
    pub outcome: RefundOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundSummary {
    pub goal_id: i64,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub results: Vec<WalletRefund>,
    pub completed_at: DateTime<Utc>,
}

impl RefundSummary {
    fn from_results(goal_id: i64, results: Vec<WalletRefund>) -> Self {
        let count = |pred: fn(&RefundOutcome) -> bool| {
            results.iter().filter(|r| pred(&r.outcome)).count()
        };
        Self {
            goal_id,
            total: results.len(),
            successful: count(|o| matches!(o, RefundOutcome::Sent { .. })),
            failed: count(|o| matches!(o, RefundOutcome::Failed { .. })),
            skipped: count(|o| matches!(o, RefundOutcome::Skipped { .. })),
            results,
            completed_at: Utc::now(),
        }
    }
}

/// Read-only estimate for one wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletEstimate {
    pub wallet_id: i64,
    pub network: Network,
    pub balance: String,
    pub estimated_fee: String,
    pub sendable: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundEligibility {
    pub goal_id: i64,
    pub goal_status: GoalStatus,
    pub eligible: bool,
    pub wallets: Vec<WalletEstimate>,
}

pub struct RefundEngine {
    storage: Arc<dyn StorageBackend>,
    clients: ChainClients,
    notifier: Notifier,
}

impl RefundEngine {
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, clients: ChainClients, notifier: Notifier) -> Self {
        Self {
            storage,
            clients,
            notifier,
        }
    }

    /// Refunds every eligible wallet of `goal_id`.
    ///
    /// Running this twice for the same goal is safe only because emptied
    /// wallets are skipped as zero balance; callers serialize runs.
    ///
    /// # Errors
    ///
    /// Returns [`GoalSyncError::NotFound`] for an unknown goal that still has
    /// refundable wallets, and storage errors. A goal without refundable
    /// wallets yields an empty summary without being looked up. Per-wallet
    /// failures are reported in the summary instead.
    pub async fn process_refunds(&self, goal_id: i64) -> Result<RefundSummary> {
        let wallets = self.storage.refundable_wallets(goal_id).await?;
        if wallets.is_empty() {
            logging::log(
                LogLevel::Info,
                &format!("Goal {goal_id} has no wallets with a refund address"),
            );
            return Ok(RefundSummary::from_results(goal_id, Vec::new()));
        }

        let goal = self
            .storage
            .get_goal(goal_id)
            .await?
            .ok_or_else(|| GoalSyncError::NotFound(format!("goal {goal_id}")))?;

        logging::log(
            LogLevel::Info,
            &format!("Refunding {} wallet(s) for goal {goal_id}", wallets.len()),
        );

        let results = join_all(wallets.iter().map(|wallet| self.refund_wallet(wallet))).await;
        let summary = RefundSummary::from_results(goal_id, results);

        logging::log(
            if summary.failed == 0 {
                LogLevel::Success
            } else {
                LogLevel::Warning
            },
            &format!(
                "Refunds for goal {goal_id}: {} sent, {} skipped, {} failed of {}",
                summary.successful, summary.skipped, summary.failed, summary.total
            ),
        );

        if let Err(e) = self.storage.touch_goal(goal_id).await {
            logging::log_error(&format!("Touching goal {goal_id} after refunds failed"), &e);
        }
        self.notifier
            .refund_completed(goal.user_id, goal_id, summary.clone());

        Ok(summary)
    }

    async fn refund_wallet(&self, wallet: &Wallet) -> WalletRefund {
        let refund_address = wallet.refund_address.clone().unwrap_or_default();
        let outcome = match self.try_refund(wallet, &refund_address).await {
            Ok(outcome) => outcome,
            Err(e) => {
                logging::log_error(&format!("Refund of wallet {} failed", wallet.id), &e);
                RefundOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        WalletRefund {
            wallet_id: wallet.id,
            network: wallet.network,
            refund_address,
            outcome,
        }
    }

    async fn try_refund(&self, wallet: &Wallet, refund_address: &str) -> Result<RefundOutcome> {
        let client = self.clients.get(wallet.network)?;
        let balance = client.balance(&wallet.public_key).await?;

        if balance == 0 {
            return Ok(RefundOutcome::Skipped {
                reason: REASON_ZERO_BALANCE.to_string(),
                amount: "0".to_string(),
            });
        }
        if balance < DUST_THRESHOLD_LAMPORTS {
            return Ok(RefundOutcome::Skipped {
                reason: REASON_TOO_SMALL.to_string(),
                amount: format_lamports(balance),
            });
        }

        let fee = client
            .estimate_transfer_fee(&wallet.public_key, refund_address, balance)
            .await?;
        if fee >= balance {
            return Err(GoalSyncError::TransactionError(format!(
                "fee {} SOL exceeds balance {} SOL",
                format_lamports(fee),
                format_lamports(balance)
            )));
        }

        let amount = balance - fee;
        let signature = client
            .send_transfer(&wallet.public_key, &wallet.secret_key, refund_address, amount)
            .await?;

        let now = Utc::now();
        if let Err(e) = self.storage.update_wallet_balance(wallet.id, "0", now).await {
            logging::log_error(
                &format!("Refund {signature} sent but wallet {} balance not saved", wallet.id),
                &e,
            );
        }
        self.notifier.balance_changed(wallet.id, "0");

        logging::log(
            LogLevel::Success,
            &format!(
                "Refunded {} SOL from wallet {} to {refund_address} ({signature})",
                format_lamports(amount),
                wallet.id
            ),
        );

        Ok(RefundOutcome::Sent {
            signature,
            amount: format_lamports(amount),
        })
    }

    /// Estimates what a refund run would do without sending anything.
    ///
    /// # Errors
    ///
    /// Returns [`GoalSyncError::NotFound`] for an unknown goal and storage
    /// errors from loading wallets.
    pub async fn refund_eligibility(&self, goal_id: i64) -> Result<RefundEligibility> {
        let goal = self
            .storage
            .get_goal(goal_id)
            .await?
            .ok_or_else(|| GoalSyncError::NotFound(format!("goal {goal_id}")))?;
        let wallets = self.storage.refundable_wallets(goal_id).await?;

        let estimates = join_all(wallets.iter().map(|wallet| self.estimate(wallet))).await;

        Ok(RefundEligibility {
            goal_id,
            goal_status: goal.status,
            eligible: goal.status == GoalStatus::Completed && !wallets.is_empty(),
            wallets: estimates,
        })
    }

    async fn estimate(&self, wallet: &Wallet) -> WalletEstimate {
        let mut estimate = WalletEstimate {
            wallet_id: wallet.id,
            network: wallet.network,
            balance: "0".to_string(),
            estimated_fee: "0".to_string(),
            sendable: "0".to_string(),
            error: None,
        };

        let refund_address = wallet.refund_address.as_deref().unwrap_or_default();
        let result = async {
            let client = self.clients.get(wallet.network)?;
            let balance = client.balance(&wallet.public_key).await?;
            let fee = client
                .estimate_transfer_fee(&wallet.public_key, refund_address, balance)
                .await?;
            Ok::<_, GoalSyncError>((balance, fee))
        }
        .await;

        match result {
            Ok((balance, fee)) => {
                estimate.balance = format_lamports(balance);
                estimate.estimated_fee = format_lamports(fee);
                estimate.sendable = format_lamports(balance.saturating_sub(fee));
            }
            Err(e) => estimate.error = Some(e.to_string()),
        }
        estimate
    }
}
