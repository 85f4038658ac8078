//! In-process chain used by tests and local dry runs.

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::ChainClient;
use crate::common::error::{GoalSyncError, Result};
use crate::core::goal_hash::GoalKey;
use crate::types::{ContractEvent, OnChainGoal, ProgramLog};

/// A transfer submitted through [`MockChainClient::send_transfer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTransfer {
    pub from: String,
    pub to: String,
    pub lamports: u64,
    pub signature: String,
}

#[derive(Default)]
struct MockState {
    height: u64,
    logs: HashMap<u64, Vec<ProgramLog>>,
    failing_heights: HashSet<u64>,
    goals: HashMap<GoalKey, OnChainGoal>,
    balances: HashMap<String, u64>,
    failing_balances: HashSet<String>,
    transfer_fee: u64,
    failing_transfers: HashSet<String>,
    sent: Vec<SentTransfer>,
    balance_queries: usize,
    log_queries: Vec<u64>,
}

/// Scriptable [`ChainClient`].
///
/// Blocks, goal records and balances are set up front; transfers move
/// lamports between the in-memory balances and are recorded.
#[derive(Default)]
pub struct MockChainClient {
    state: Mutex<MockState>,
}

impl MockChainClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_height(&self, height: u64) {
        self.state().height = height;
    }

    /// Appends an encoded event to the block at `height`.
    ///
    /// # Errors
    ///
    /// Propagates event encoding failures.
    pub fn push_event(&self, height: u64, signature: &str, event: &ContractEvent) -> Result<()> {
        let data = event.encode()?;
        self.push_raw_log(height, signature, data);
        Ok(())
    }

    pub fn push_raw_log(&self, height: u64, signature: &str, data: Vec<u8>) {
        self.state().logs.entry(height).or_default().push(ProgramLog {
            slot: height,
            signature: signature.to_string(),
            data,
        });
    }

    /// Makes `program_logs` fail for `height` until cleared.
    pub fn fail_height(&self, height: u64, failing: bool) {
        let mut state = self.state();
        if failing {
            state.failing_heights.insert(height);
        } else {
            state.failing_heights.remove(&height);
        }
    }

    pub fn set_goal_record(&self, key: GoalKey, record: OnChainGoal) {
        self.state().goals.insert(key, record);
    }

    pub fn set_balance(&self, address: &str, lamports: u64) {
        self.state().balances.insert(address.to_string(), lamports);
    }

    pub fn fail_balance(&self, address: &str) {
        self.state().failing_balances.insert(address.to_string());
    }

    pub fn set_transfer_fee(&self, lamports: u64) {
        self.state().transfer_fee = lamports;
    }

    /// Makes transfers from `address` fail at submission.
    pub fn fail_transfers_from(&self, address: &str) {
        self.state().failing_transfers.insert(address.to_string());
    }

    #[must_use]
    pub fn sent_transfers(&self) -> Vec<SentTransfer> {
        self.state().sent.clone()
    }

    #[must_use]
    pub fn balance_queries(&self) -> usize {
        self.state().balance_queries
    }

    /// Heights passed to `program_logs`, in call order.
    #[must_use]
    pub fn log_queries(&self) -> Vec<u64> {
        self.state().log_queries.clone()
    }

    #[must_use]
    pub fn balance_of(&self, address: &str) -> u64 {
        self.state().balances.get(address).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn current_height(&self) -> Result<u64> {
        Ok(self.state().height)
    }

    async fn program_logs(&self, _program_id: &Pubkey, height: u64) -> Result<Vec<ProgramLog>> {
        let mut state = self.state();
        state.log_queries.push(height);
        if state.failing_heights.contains(&height) {
            return Err(GoalSyncError::RpcError(format!("block {height} unavailable")));
        }
        Ok(state.logs.get(&height).cloned().unwrap_or_default())
    }

    async fn goal_record(&self, _program_id: &Pubkey, key: &GoalKey) -> Result<OnChainGoal> {
        Ok(self.state().goals.get(key).copied().unwrap_or_default())
    }

    async fn balance(&self, address: &str) -> Result<u64> {
        let mut state = self.state();
        state.balance_queries += 1;
        if state.failing_balances.contains(address) {
            return Err(GoalSyncError::RpcError(format!("balance of {address} unavailable")));
        }
        Ok(state.balances.get(address).copied().unwrap_or(0))
    }

    async fn estimate_transfer_fee(&self, _from: &str, _to: &str, _lamports: u64) -> Result<u64> {
        Ok(self.state().transfer_fee)
    }

    async fn send_transfer(
        &self,
        from: &str,
        _secret_key: &str,
        to: &str,
        lamports: u64,
    ) -> Result<String> {
        let mut state = self.state();
        if state.failing_transfers.contains(from) {
            return Err(GoalSyncError::TransactionError(format!(
                "transfer from {from} rejected"
            )));
        }

        let fee = state.transfer_fee;
        let available = state.balances.get(from).copied().unwrap_or(0);
        let debit = lamports.saturating_add(fee);
        if debit > available {
            return Err(GoalSyncError::TransactionError(format!(
                "insufficient funds: {available} < {debit}"
            )));
        }

        state.balances.insert(from.to_string(), available - debit);
        *state.balances.entry(to.to_string()).or_default() += lamports;

        let signature = format!("mock-sig-{}", state.sent.len() + 1);
        state.sent.push(SentTransfer {
            from: from.to_string(),
            to: to.to_string(),
            lamports,
            signature: signature.clone(),
        });
        Ok(signature)
    }

    fn source_name(&self) -> &'static str {
        "Mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transfer_moves_funds_and_charges_fee() {
        let chain = MockChainClient::new();
        chain.set_balance("a", 1_000);
        chain.set_transfer_fee(10);

        let sig = chain.send_transfer("a", "secret", "b", 990).await.unwrap();
        assert_eq!(sig, "mock-sig-1");
        assert_eq!(chain.balance_of("a"), 0);
        assert_eq!(chain.balance_of("b"), 990);

        assert!(chain.send_transfer("a", "secret", "b", 1).await.is_err());
    }
}
