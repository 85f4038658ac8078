//! Postgres storage backed by `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::{Cursor, PriceEntry, StorageBackend};
use crate::common::error::{GoalSyncError, Result};
use crate::types::{Difficulty, Goal, GoalStatus, Network, Wallet};

/// Postgres-backed [`StorageBackend`].
///
/// The `goals` and `wallets` tables belong to the application; they are only
/// created here when missing so a fresh database is usable. The `_goal_sync_*`
/// tables are owned by this crate.
pub struct Storage {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct CursorRow {
    contract_address: String,
    last_processed_block: i64,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct GoalRow {
    id: i64,
    user_id: i64,
    status: String,
    difficulty: String,
    deadline: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<GoalRow> for Goal {
    type Error = GoalSyncError;

    fn try_from(row: GoalRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            status: row.status.parse()?,
            difficulty: row.difficulty.parse()?,
            deadline: row.deadline,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct WalletRow {
    id: i64,
    goal_id: i64,
    network: String,
    public_key: String,
    secret_key: String,
    last_balance: String,
    last_balance_update: Option<DateTime<Utc>>,
    refund_address: Option<String>,
}

impl TryFrom<WalletRow> for Wallet {
    type Error = GoalSyncError;

    fn try_from(row: WalletRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            goal_id: row.goal_id,
            network: row.network.parse()?,
            public_key: row.public_key,
            secret_key: row.secret_key,
            last_balance: row.last_balance,
            last_balance_update: row.last_balance_update,
            refund_address: row.refund_address,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PriceRow {
    network: String,
    price: f64,
    updated_at: DateTime<Utc>,
}

fn to_i64(block: u64) -> Result<i64> {
    i64::try_from(block)
        .map_err(|_| GoalSyncError::InternalError(format!("block {block} exceeds i64")))
}

fn to_u64(block: i64) -> Result<u64> {
    u64::try_from(block)
        .map_err(|_| GoalSyncError::DecodingError(format!("negative block height {block}")))
}

const WALLET_COLUMNS: &str = "id, goal_id, network, public_key, secret_key, last_balance, \
                              last_balance_update, refund_address";
const GOAL_COLUMNS: &str = "id, user_id, status, difficulty, deadline, updated_at";

impl Storage {
    /// Connects to Postgres.
    ///
    /// # Errors
    ///
    /// Returns [`GoalSyncError::DatabaseError`] if the pool cannot connect.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StorageBackend for Storage {
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS goals (
                id BIGINT PRIMARY KEY,
                user_id BIGINT NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING',
                difficulty TEXT NOT NULL,
                deadline TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS wallets (
                id BIGINT PRIMARY KEY,
                goal_id BIGINT NOT NULL,
                network TEXT NOT NULL,
                public_key TEXT NOT NULL,
                secret_key TEXT NOT NULL,
                last_balance TEXT NOT NULL DEFAULT '0',
                last_balance_update TIMESTAMPTZ,
                refund_address TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS wallets_goal_id_idx ON wallets (goal_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS _goal_sync_cursors (
                contract_address TEXT PRIMARY KEY,
                last_processed_block BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS _goal_sync_prices (
                network TEXT PRIMARY KEY,
                price DOUBLE PRECISION NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_cursor(&self, contract_address: &str) -> Result<Option<Cursor>> {
        let row = sqlx::query_as::<_, CursorRow>(
            "SELECT contract_address, last_processed_block, updated_at
             FROM _goal_sync_cursors WHERE contract_address = $1",
        )
        .bind(contract_address)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(Cursor {
                contract_address: row.contract_address,
                last_processed_block: to_u64(row.last_processed_block)?,
                updated_at: row.updated_at,
            })
        })
        .transpose()
    }

    async fn save_cursor(&self, contract_address: &str, block: u64) -> Result<()> {
        sqlx::query(
            "INSERT INTO _goal_sync_cursors (contract_address, last_processed_block, updated_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT (contract_address) DO UPDATE
             SET last_processed_block = GREATEST(_goal_sync_cursors.last_processed_block,
                                                 EXCLUDED.last_processed_block),
                 updated_at = NOW()",
        )
        .bind(contract_address)
        .bind(to_i64(block)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_goal(&self, goal_id: i64) -> Result<Option<Goal>> {
        let row = sqlx::query_as::<_, GoalRow>(&format!(
            "SELECT {GOAL_COLUMNS} FROM goals WHERE id = $1"
        ))
        .bind(goal_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Goal::try_from).transpose()
    }

    async fn goals_at_or_above(&self, min_difficulty: Difficulty) -> Result<Vec<Goal>> {
        let tiers: Vec<&str> = Difficulty::at_or_above(min_difficulty)
            .into_iter()
            .map(Difficulty::as_str)
            .collect();

        let rows = sqlx::query_as::<_, GoalRow>(&format!(
            "SELECT {GOAL_COLUMNS} FROM goals WHERE difficulty = ANY($1) ORDER BY id"
        ))
        .bind(&tiers)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Goal::try_from).collect()
    }

    async fn set_goal_status(
        &self,
        goal_id: i64,
        expected: GoalStatus,
        status: GoalStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE goals SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2",
        )
        .bind(goal_id)
        .bind(expected.as_str())
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn touch_goal(&self, goal_id: i64) -> Result<()> {
        sqlx::query("UPDATE goals SET updated_at = NOW() WHERE id = $1")
            .bind(goal_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_wallet(&self, wallet_id: i64) -> Result<Option<Wallet>> {
        let row = sqlx::query_as::<_, WalletRow>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE id = $1"
        ))
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Wallet::try_from).transpose()
    }

    async fn refundable_wallets(&self, goal_id: i64) -> Result<Vec<Wallet>> {
        let rows = sqlx::query_as::<_, WalletRow>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets
             WHERE goal_id = $1 AND refund_address IS NOT NULL ORDER BY id"
        ))
        .bind(goal_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Wallet::try_from).collect()
    }

    async fn update_wallet_balance(
        &self,
        wallet_id: i64,
        balance: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE wallets SET last_balance = $2, last_balance_update = $3 WHERE id = $1")
            .bind(wallet_id)
            .bind(balance)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_price(&self, network: Network, price: f64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO _goal_sync_prices (network, price, updated_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (network) DO UPDATE SET price = EXCLUDED.price, updated_at = EXCLUDED.updated_at",
        )
        .bind(network.as_str())
        .bind(price)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_price(&self, network: Network) -> Result<Option<PriceEntry>> {
        let row = sqlx::query_as::<_, PriceRow>(
            "SELECT network, price, updated_at FROM _goal_sync_prices WHERE network = $1",
        )
        .bind(network.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(PriceEntry {
                network: row.network.parse()?,
                price: row.price,
                updated_at: row.updated_at,
            })
        })
        .transpose()
    }
}
