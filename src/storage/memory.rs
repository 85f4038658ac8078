//! In-process storage for embedding and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

use super::{Cursor, PriceEntry, StorageBackend};
use crate::common::error::Result;
use crate::types::{Difficulty, Goal, GoalStatus, Network, Wallet};

#[derive(Default)]
struct Tables {
    cursors: HashMap<String, Cursor>,
    goals: BTreeMap<i64, Goal>,
    wallets: BTreeMap<i64, Wallet>,
    prices: HashMap<Network, PriceEntry>,
}

/// [`StorageBackend`] holding every table in memory.
#[derive(Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_goal(&self, goal: Goal) {
        self.tables.lock().await.goals.insert(goal.id, goal);
    }

    pub async fn insert_wallet(&self, wallet: Wallet) {
        self.tables.lock().await.wallets.insert(wallet.id, wallet);
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn load_cursor(&self, contract_address: &str) -> Result<Option<Cursor>> {
        Ok(self.tables.lock().await.cursors.get(contract_address).cloned())
    }

    async fn save_cursor(&self, contract_address: &str, block: u64) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let cursor = tables
            .cursors
            .entry(contract_address.to_string())
            .or_insert_with(|| Cursor {
                contract_address: contract_address.to_string(),
                last_processed_block: block,
                updated_at: now,
            });
        cursor.last_processed_block = cursor.last_processed_block.max(block);
        cursor.updated_at = now;
        Ok(())
    }

    async fn get_goal(&self, goal_id: i64) -> Result<Option<Goal>> {
        Ok(self.tables.lock().await.goals.get(&goal_id).cloned())
    }

    async fn goals_at_or_above(&self, min_difficulty: Difficulty) -> Result<Vec<Goal>> {
        Ok(self
            .tables
            .lock()
            .await
            .goals
            .values()
            .filter(|goal| goal.difficulty >= min_difficulty)
            .cloned()
            .collect())
    }

    async fn set_goal_status(
        &self,
        goal_id: i64,
        expected: GoalStatus,
        status: GoalStatus,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.goals.get_mut(&goal_id) {
            Some(goal) if goal.status == expected => {
                goal.status = status;
                goal.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch_goal(&self, goal_id: i64) -> Result<()> {
        if let Some(goal) = self.tables.lock().await.goals.get_mut(&goal_id) {
            goal.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get_wallet(&self, wallet_id: i64) -> Result<Option<Wallet>> {
        Ok(self.tables.lock().await.wallets.get(&wallet_id).cloned())
    }

    async fn refundable_wallets(&self, goal_id: i64) -> Result<Vec<Wallet>> {
        Ok(self
            .tables
            .lock()
            .await
            .wallets
            .values()
            .filter(|wallet| wallet.goal_id == goal_id && wallet.refund_address.is_some())
            .cloned()
            .collect())
    }

    async fn update_wallet_balance(
        &self,
        wallet_id: i64,
        balance: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(wallet) = self.tables.lock().await.wallets.get_mut(&wallet_id) {
            wallet.last_balance = balance.to_string();
            wallet.last_balance_update = Some(at);
        }
        Ok(())
    }

    async fn upsert_price(&self, network: Network, price: f64, at: DateTime<Utc>) -> Result<()> {
        self.tables.lock().await.prices.insert(
            network,
            PriceEntry {
                network,
                price,
                updated_at: at,
            },
        );
        Ok(())
    }

    async fn get_price(&self, network: Network) -> Result<Option<PriceEntry>> {
        Ok(self.tables.lock().await.prices.get(&network).cloned())
    }
}
