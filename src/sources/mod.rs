//! Chain access: the [`ChainClient`] seam and its transports.
//!
//! `rpc` talks request/response JSON-RPC, `websocket` holds the persistent
//! `logsSubscribe` channel, `mock` is an in-process chain for tests and local
//! runs, and `clients` maps each network to its client.

pub mod clients;
pub mod mock;
pub mod rpc;
pub mod websocket;

use crate::common::error::Result;
use crate::core::goal_hash::GoalKey;
use crate::types::{OnChainGoal, ProgramLog};
use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;

pub use clients::ChainClients;
pub use mock::MockChainClient;
pub use rpc::RpcChainClient;
pub use websocket::{LogNotification, LogSubscription};

/// Seed prefix of the escrow program's goal accounts.
pub const GOAL_SEED: &[u8] = b"goal";

/// Address of the account holding `key`'s on-chain record.
#[must_use]
pub fn goal_address(program_id: &Pubkey, key: &GoalKey) -> Pubkey {
    Pubkey::find_program_address(&[GOAL_SEED, key.as_ref()], program_id).0
}

/// Everything this crate needs from a ledger node.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current confirmed slot.
    async fn current_height(&self) -> Result<u64>;

    /// Event payloads emitted by `program_id` in the block at `height`.
    /// A skipped slot yields an empty list.
    async fn program_logs(&self, program_id: &Pubkey, height: u64) -> Result<Vec<ProgramLog>>;

    /// Reads the escrow program's record for `key`.
    async fn goal_record(&self, program_id: &Pubkey, key: &GoalKey) -> Result<OnChainGoal>;

    /// Balance of `address` in lamports.
    async fn balance(&self, address: &str) -> Result<u64>;

    /// Network fee for a transfer of `lamports` from `from` to `to`.
    async fn estimate_transfer_fee(&self, from: &str, to: &str, lamports: u64) -> Result<u64>;

    /// Signs with `secret_key`, submits the transfer and returns its signature.
    async fn send_transfer(
        &self,
        from: &str,
        secret_key: &str,
        to: &str,
        lamports: u64,
    ) -> Result<String>;

    /// Short label used in log lines.
    fn source_name(&self) -> &'static str;
}
