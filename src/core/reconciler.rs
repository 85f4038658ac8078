//! Goal reconciliation against the escrow program.
//!
//! Events only carry the hashed goal key, so matching a database goal means
//! hashing every on-chain-eligible goal and comparing. The status written is
//! always derived from a fresh read of the goal account, never from the event
//! payload, which keeps replays harmless.

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;

use super::goal_hash::{GoalKey, goal_key};
use super::registry::EventHandler;
use crate::common::error::{GoalSyncError, Result};
use crate::sources::ChainClient;
use crate::storage::StorageBackend;
use crate::types::{ContractEvent, Difficulty, EventContext, Goal, GoalStatus, OnChainGoal};
use crate::utils::amount::format_lamports;
use crate::utils::logging::{self, LogLevel};

/// Compare-and-set attempts before yielding to concurrent writers.
const MAX_STATUS_WRITES: usize = 3;

/// Target status for a goal given its on-chain record, or `None` when
/// nothing should change.
#[must_use]
pub fn derive_status(current: GoalStatus, on_chain: &OnChainGoal) -> Option<GoalStatus> {
    if !on_chain.exists {
        return None;
    }

    let mut target = current;
    if on_chain.amount > 0 && current == GoalStatus::Pending {
        target = GoalStatus::Funded;
    }
    if (on_chain.completed || on_chain.claimed) && current != GoalStatus::Completed {
        target = GoalStatus::Completed;
    }

    (target != current).then_some(target)
}

/// Keeps goal rows in step with the escrow program.
pub struct GoalReconciler {
    storage: Arc<dyn StorageBackend>,
    chain: Arc<dyn ChainClient>,
    program_id: Pubkey,
}

impl GoalReconciler {
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        chain: Arc<dyn ChainClient>,
        program_id: Pubkey,
    ) -> Self {
        Self {
            storage,
            chain,
            program_id,
        }
    }

    /// Finds the eligible goal whose key equals `key`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn find_goal_by_key(&self, key: &GoalKey) -> Result<Option<Goal>> {
        let goals = self
            .storage
            .goals_at_or_above(Difficulty::ON_CHAIN_THRESHOLD)
            .await?;
        Ok(goals
            .into_iter()
            .find(|goal| goal_key(goal.user_id, goal.id) == *key))
    }

    /// Re-reads the on-chain record for `goal_id` and writes the derived
    /// status. Returns the new status, or `None` if nothing changed.
    ///
    /// # Errors
    ///
    /// Returns [`GoalSyncError::NotFound`] for an unknown goal and propagates
    /// chain and storage failures.
    pub async fn update_goal_status_from_chain(&self, goal_id: i64) -> Result<Option<GoalStatus>> {
        let goal = self
            .storage
            .get_goal(goal_id)
            .await?
            .ok_or_else(|| GoalSyncError::NotFound(format!("goal {goal_id}")))?;

        if !goal.difficulty.is_on_chain() {
            logging::log(
                LogLevel::Debug,
                &format!("Goal {goal_id} is {} and has no escrow record", goal.difficulty),
            );
            return Ok(None);
        }
        self.reconcile(&goal).await
    }

    /// Writes the status derived from a fresh on-chain read.
    ///
    /// The write is a compare-and-set on the status it was derived from. When
    /// another task got there first, the target is re-derived from the stored
    /// status, so a stale snapshot never moves a goal backwards.
    async fn reconcile(&self, goal: &Goal) -> Result<Option<GoalStatus>> {
        let key = goal_key(goal.user_id, goal.id);
        let on_chain = self.chain.goal_record(&self.program_id, &key).await?;

        let mut current = goal.status;
        for _ in 0..MAX_STATUS_WRITES {
            let Some(target) = derive_status(current, &on_chain) else {
                logging::log(
                    LogLevel::Debug,
                    &format!("Goal {} unchanged at {current}", goal.id),
                );
                return Ok(None);
            };

            if self.storage.set_goal_status(goal.id, current, target).await? {
                logging::log(
                    LogLevel::Success,
                    &format!(
                        "Goal {} {current} -> {target} (escrowed {} SOL)",
                        goal.id,
                        format_lamports(on_chain.amount)
                    ),
                );
                return Ok(Some(target));
            }

            let Some(latest) = self.storage.get_goal(goal.id).await? else {
                return Ok(None);
            };
            current = latest.status;
        }

        logging::log(
            LogLevel::Warning,
            &format!("Goal {} kept changing underneath; left at {current}", goal.id),
        );
        Ok(None)
    }
}

#[async_trait]
impl EventHandler for GoalReconciler {
    async fn handle(&self, event: &ContractEvent, context: &EventContext) -> Result<()> {
        let Some(key) = event.goal_key() else {
            return Ok(());
        };

        let Some(goal) = self.find_goal_by_key(&key).await? else {
            logging::log(
                LogLevel::Warning,
                &format!(
                    "{} for unknown goal {key} (slot {}, tx {})",
                    event.kind(),
                    context.slot,
                    context.signature
                ),
            );
            return Ok(());
        };

        logging::log(
            LogLevel::Info,
            &format!("{} for goal {} at slot {}", event.kind(), goal.id, context.slot),
        );
        self.reconcile(&goal).await.map(|_| ())
    }
}

/// Logs program ownership changes. Nothing is persisted.
pub struct OwnershipLogger;

#[async_trait]
impl EventHandler for OwnershipLogger {
    async fn handle(&self, event: &ContractEvent, context: &EventContext) -> Result<()> {
        if let ContractEvent::OwnershipTransferred(e) = event {
            logging::log(
                LogLevel::Warning,
                &format!(
                    "Escrow ownership transferred {} -> {} (slot {})",
                    e.previous_owner, e.new_owner, context.slot
                ),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MockChainClient;
    use crate::storage::MemoryStorage;
    use crate::types::ProgramLog;
    use crate::types::events::{GoalCommitted, GoalCompleted};
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Answers `goal_record` calls in arrival order, each after its own delay.
    struct SequencedChain {
        snapshots: Mutex<VecDeque<(Duration, OnChainGoal)>>,
    }

    #[async_trait]
    impl ChainClient for SequencedChain {
        async fn current_height(&self) -> Result<u64> {
            Ok(0)
        }

        async fn program_logs(&self, _program_id: &Pubkey, _height: u64) -> Result<Vec<ProgramLog>> {
            Ok(Vec::new())
        }

        async fn goal_record(&self, _program_id: &Pubkey, _key: &GoalKey) -> Result<OnChainGoal> {
            let (delay, snapshot) = self.snapshots.lock().unwrap().pop_front().unwrap_or_default();
            tokio::time::sleep(delay).await;
            Ok(snapshot)
        }

        async fn balance(&self, _address: &str) -> Result<u64> {
            Ok(0)
        }

        async fn estimate_transfer_fee(&self, _from: &str, _to: &str, _lamports: u64) -> Result<u64> {
            Ok(0)
        }

        async fn send_transfer(
            &self,
            _from: &str,
            _secret_key: &str,
            _to: &str,
            _lamports: u64,
        ) -> Result<String> {
            Err(GoalSyncError::TransactionError("read-only chain".to_string()))
        }

        fn source_name(&self) -> &'static str {
            "Sequenced"
        }
    }

    fn record(amount: u64, completed: bool, claimed: bool) -> OnChainGoal {
        OnChainGoal {
            exists: true,
            amount,
            completed,
            claimed,
            deadline: 0,
        }
    }

    #[test]
    fn test_derive_status_rules() {
        assert_eq!(
            derive_status(GoalStatus::Pending, &record(5, false, false)),
            Some(GoalStatus::Funded)
        );
        assert_eq!(derive_status(GoalStatus::Pending, &record(0, false, false)), None);
        assert_eq!(
            derive_status(GoalStatus::Funded, &record(5, true, false)),
            Some(GoalStatus::Completed)
        );
        assert_eq!(
            derive_status(GoalStatus::Pending, &record(5, false, true)),
            Some(GoalStatus::Completed)
        );
        assert_eq!(derive_status(GoalStatus::Completed, &record(5, true, true)), None);
        assert_eq!(derive_status(GoalStatus::Funded, &record(5, false, false)), None);
        assert_eq!(derive_status(GoalStatus::Pending, &OnChainGoal::missing()), None);
    }

    async fn setup(difficulty: Difficulty) -> (Arc<MemoryStorage>, Arc<MockChainClient>, GoalReconciler) {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .insert_goal(Goal {
                id: 42,
                user_id: 7,
                status: GoalStatus::Pending,
                difficulty,
                deadline: Utc::now(),
                updated_at: Utc::now(),
            })
            .await;
        let chain = Arc::new(MockChainClient::new());
        let reconciler = GoalReconciler::new(storage.clone(), chain.clone(), Pubkey::new_unique());
        (storage, chain, reconciler)
    }

    async fn sequenced_setup(
        snapshots: Vec<(Duration, OnChainGoal)>,
    ) -> (Arc<MemoryStorage>, GoalReconciler) {
        let (storage, _, _) = setup(Difficulty::Medium).await;
        let chain = Arc::new(SequencedChain {
            snapshots: Mutex::new(snapshots.into()),
        });
        let reconciler = GoalReconciler::new(storage.clone(), chain, Pubkey::new_unique());
        (storage, reconciler)
    }

    fn context() -> EventContext {
        EventContext {
            slot: 10,
            signature: "sig".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_funded_snapshot_never_regresses_completed() {
        let (storage, reconciler) = sequenced_setup(vec![
            (Duration::from_millis(50), record(5, false, false)),
            (Duration::ZERO, record(5, true, false)),
        ])
        .await;

        let committed = ContractEvent::GoalCommitted(GoalCommitted {
            goal_id: goal_key(7, 42),
            user: Pubkey::new_unique(),
            amount: 5,
            deadline: 0,
            recipient: Pubkey::new_unique(),
        });
        let completed = ContractEvent::GoalCompleted(GoalCompleted {
            goal_id: goal_key(7, 42),
            validated_by_ai: true,
        });

        let ctx = context();
        let (a, b) = tokio::join!(
            reconciler.handle(&committed, &ctx),
            reconciler.handle(&completed, &ctx)
        );
        a.unwrap();
        b.unwrap();

        let goal = storage.get_goal(42).await.unwrap().unwrap();
        assert_eq!(goal.status, GoalStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_write_is_rederived_from_latest_status() {
        let (storage, reconciler) = sequenced_setup(vec![
            (Duration::from_millis(50), record(5, true, false)),
            (Duration::ZERO, record(5, false, false)),
        ])
        .await;

        let (slow, fast) = tokio::join!(
            reconciler.update_goal_status_from_chain(42),
            reconciler.update_goal_status_from_chain(42)
        );

        assert_eq!(fast.unwrap(), Some(GoalStatus::Funded));
        assert_eq!(slow.unwrap(), Some(GoalStatus::Completed));
        let goal = storage.get_goal(42).await.unwrap().unwrap();
        assert_eq!(goal.status, GoalStatus::Completed);
    }

    #[tokio::test]
    async fn test_find_goal_by_key_skips_easy_goals() {
        let (storage, chain, reconciler) = setup(Difficulty::Easy).await;
        assert!(reconciler.find_goal_by_key(&goal_key(7, 42)).await.unwrap().is_none());

        chain.set_goal_record(goal_key(7, 42), record(5, true, false));
        assert_eq!(reconciler.update_goal_status_from_chain(42).await.unwrap(), None);
        assert_eq!(
            storage.get_goal(42).await.unwrap().unwrap().status,
            GoalStatus::Pending
        );

        let (_, _, reconciler) = setup(Difficulty::Hard).await;
        let found = reconciler.find_goal_by_key(&goal_key(7, 42)).await.unwrap();
        assert_eq!(found.map(|g| g.id), Some(42));
    }

    #[tokio::test]
    async fn test_replayed_event_is_idempotent() {
        let (storage, chain, reconciler) = setup(Difficulty::Medium).await;
        chain.set_goal_record(goal_key(7, 42), record(1_000_000_000, true, false));

        let event = ContractEvent::GoalCompleted(GoalCompleted {
            goal_id: goal_key(7, 42),
            validated_by_ai: true,
        });
        let context = EventContext {
            slot: 10,
            signature: "sig".to_string(),
        };

        reconciler.handle(&event, &context).await.unwrap();
        reconciler.handle(&event, &context).await.unwrap();

        let goal = storage.get_goal(42).await.unwrap().unwrap();
        assert_eq!(goal.status, GoalStatus::Completed);
        assert_eq!(reconciler.update_goal_status_from_chain(42).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_goal_id_is_not_found() {
        let (_, _, reconciler) = setup(Difficulty::Medium).await;
        assert!(matches!(
            reconciler.update_goal_status_from_chain(99).await,
            Err(GoalSyncError::NotFound(_))
        ));
    }
}
