//! Persistence seam.
//!
//! [`StorageBackend`] covers every row this crate reads or writes: the
//! indexer cursor, goals, wallets and the price cache. [`Storage`] is the
//! Postgres implementation; [`MemoryStorage`] keeps everything in process.

pub mod memory;
pub mod postgres;

use crate::common::error::Result;
use crate::types::{Difficulty, Goal, GoalStatus, Network, Wallet};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryStorage;
pub use postgres::Storage;

/// Last fully processed slot for a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub contract_address: String,
    pub last_processed_block: u64,
    pub updated_at: DateTime<Utc>,
}

/// Cached native-token price for a network.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceEntry {
    pub network: Network,
    pub price: f64,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Creates any missing tables.
    async fn initialize(&self) -> Result<()>;

    async fn load_cursor(&self, contract_address: &str) -> Result<Option<Cursor>>;

    /// Creates or advances the cursor. A height below the stored one is ignored,
    /// so the cursor never moves backwards.
    async fn save_cursor(&self, contract_address: &str, block: u64) -> Result<()>;

    async fn get_goal(&self, goal_id: i64) -> Result<Option<Goal>>;

    /// Goals whose difficulty is at or above `min_difficulty`.
    async fn goals_at_or_above(&self, min_difficulty: Difficulty) -> Result<Vec<Goal>>;

    /// Moves `goal_id` from `expected` to `status`. Returns `false`, writing
    /// nothing, when the stored status is no longer `expected`.
    async fn set_goal_status(
        &self,
        goal_id: i64,
        expected: GoalStatus,
        status: GoalStatus,
    ) -> Result<bool>;

    /// Bumps the goal's `updated_at` without changing anything else.
    async fn touch_goal(&self, goal_id: i64) -> Result<()>;

    async fn get_wallet(&self, wallet_id: i64) -> Result<Option<Wallet>>;

    /// Wallets of `goal_id` that carry a refund address.
    async fn refundable_wallets(&self, goal_id: i64) -> Result<Vec<Wallet>>;

    async fn update_wallet_balance(
        &self,
        wallet_id: i64,
        balance: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn upsert_price(&self, network: Network, price: f64, at: DateTime<Utc>) -> Result<()>;

    async fn get_price(&self, network: Network) -> Result<Option<PriceEntry>>;
}
