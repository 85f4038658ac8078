//! # goal-sync
//!
//! Keeps off-chain goal records consistent with an on-chain Solana escrow
//! program and runs the background work that depends on them.
//!
//! - [`GoalIndexer`] follows the escrow program, by polling slots or through a
//!   `logsSubscribe` stream, and dispatches decoded events to handlers.
//! - [`GoalReconciler`] maps events to goal rows and advances their status.
//! - [`jobs`] is a durable at-least-once queue with the wallet monitor and
//!   price cache jobs built on it.
//! - [`RefundEngine`] empties a goal's wallets into their refund addresses.
//!
//! # Example
//!
//! ```no_run
//! use goal_sync::{
//!     ChainClients, GoalIndexer, GoalReconciler, GoalSyncConfigBuilder, HandlerRegistry,
//!     EventKind, Storage, StorageBackend,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GoalSyncConfigBuilder::new()
//!     .with_rpc("http://127.0.0.1:8899")
//!     .with_database("postgresql://localhost/goals")
//!     .program_id("11111111111111111111111111111111")
//!     .build()?;
//!
//! let storage: Arc<dyn StorageBackend> = Arc::new(Storage::new(&config.database_url).await?);
//! storage.initialize().await?;
//! let chain = ChainClients::from_config(&config).get(config.escrow_network)?;
//!
//! let reconciler = Arc::new(GoalReconciler::new(storage.clone(), chain.clone(), config.program_id));
//! let mut registry = HandlerRegistry::new();
//! registry.register(EventKind::GoalCompleted, reconciler);
//!
//! let indexer = GoalIndexer::from_config(&config, storage, chain, registry);
//! indexer.start().await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod common;
pub mod config;
pub mod core;
pub mod jobs;
pub mod services;
pub mod sources;
pub mod storage;
pub mod types;
pub mod utils;

pub use common::error::{GoalSyncError, Result};
pub use config::{GoalSyncConfig, GoalSyncConfigBuilder, SourceConfig};
pub use crate::core::{
    EventHandler, GoalIndexer, GoalKey, GoalReconciler, HandlerRegistry, IndexerMode,
    OwnershipLogger, goal_key,
};
pub use jobs::{
    JobHandler, JobOutcome, JobPayload, JobQueue, JobWorker, MemoryJobQueue, PgJobQueue,
};
pub use services::{
    CoinGeckoPriceSource, Notification, Notifier, PriceSource, RefundEngine, RefundSummary,
};
pub use sources::{ChainClient, ChainClients, MockChainClient, RpcChainClient};
pub use storage::{MemoryStorage, Storage, StorageBackend};
pub use types::{
    ContractEvent, Difficulty, EventKind, Goal, GoalStatus, Network, OnChainGoal, Wallet,
};
