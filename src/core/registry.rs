//! Event handler registry.
//!
//! One optional handler slot per [`EventKind`]. Lookups are an exhaustive
//! match, so adding an event kind forces a slot to be added here.

use crate::common::error::Result;
use crate::types::{ContractEvent, EventContext, EventKind, ProgramLog};
use crate::utils::logging::{self, LogLevel};
use async_trait::async_trait;
use std::sync::Arc;

/// Reacts to one decoded program event.
///
/// Handlers must be idempotent: after a restart the indexer may replay the
/// events of a block that was processed but not yet checkpointed.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &ContractEvent, context: &EventContext) -> Result<()>;
}

/// Maps each event kind to at most one handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    goal_committed: Option<Arc<dyn EventHandler>>,
    goal_completed: Option<Arc<dyn EventHandler>>,
    goal_claimed: Option<Arc<dyn EventHandler>>,
    ownership_transferred: Option<Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_mut(&mut self, kind: EventKind) -> &mut Option<Arc<dyn EventHandler>> {
        match kind {
            EventKind::GoalCommitted => &mut self.goal_committed,
            EventKind::GoalCompleted => &mut self.goal_completed,
            EventKind::GoalClaimed => &mut self.goal_claimed,
            EventKind::OwnershipTransferred => &mut self.ownership_transferred,
        }
    }

    /// Registers `handler` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        *self.slot_mut(kind) = Some(handler);
    }

    /// Registers the same handler for several kinds.
    pub fn register_all(&mut self, kinds: &[EventKind], handler: &Arc<dyn EventHandler>) {
        for kind in kinds {
            self.register(*kind, Arc::clone(handler));
        }
    }

    #[must_use]
    pub fn handler(&self, kind: EventKind) -> Option<Arc<dyn EventHandler>> {
        match kind {
            EventKind::GoalCommitted => self.goal_committed.clone(),
            EventKind::GoalCompleted => self.goal_completed.clone(),
            EventKind::GoalClaimed => self.goal_claimed.clone(),
            EventKind::OwnershipTransferred => self.ownership_transferred.clone(),
        }
    }

    #[must_use]
    pub fn registered_kinds(&self) -> Vec<EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(|kind| self.handler(*kind).is_some())
            .collect()
    }

    /// Decodes a raw log into an event that has a handler.
    ///
    /// Unknown or malformed payloads are logged and dropped; known events
    /// without a handler are dropped silently.
    #[must_use]
    pub fn decode(&self, log: &ProgramLog) -> Option<(ContractEvent, Arc<dyn EventHandler>)> {
        let event = match ContractEvent::decode(&log.data) {
            Ok(event) => event,
            Err(e) => {
                logging::log(
                    LogLevel::Warning,
                    &format!("Skipping log in {} (slot {}): {e}", log.signature, log.slot),
                );
                return None;
            }
        };
        let handler = self.handler(event.kind())?;
        Some((event, handler))
    }

    /// Decodes `log` and runs its handler. Handler errors are logged, never
    /// returned.
    pub async fn dispatch(&self, log: &ProgramLog) {
        if let Some((event, handler)) = self.decode(log) {
            run_handler(handler.as_ref(), &event, &EventContext::from(log)).await;
        }
    }
}

/// Runs one handler, logging a failure instead of propagating it.
pub async fn run_handler(handler: &dyn EventHandler, event: &ContractEvent, context: &EventContext) {
    if let Err(e) = handler.handle(event, context).await {
        logging::log_error(
            &format!(
                "Handler for {} failed (slot {}, tx {})",
                event.kind(),
                context.slot,
                context.signature
            ),
            &e,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::GoalSyncError;
    use crate::core::goal_hash::goal_key;
    use crate::types::events::{GoalCompleted, OwnershipTransferred};
    use solana_sdk::pubkey::Pubkey;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<EventKind>>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &ContractEvent, _context: &EventContext) -> Result<()> {
            self.seen.lock().unwrap().push(event.kind());
            if self.fail {
                return Err(GoalSyncError::InternalError("boom".to_string()));
            }
            Ok(())
        }
    }

    fn log_of(event: &ContractEvent) -> ProgramLog {
        ProgramLog {
            slot: 5,
            signature: "sig".to_string(),
            data: event.encode().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_kind() {
        let recorder = Arc::new(Recorder::default());
        let mut registry = HandlerRegistry::new();
        registry.register(EventKind::GoalCompleted, recorder.clone());

        let completed = ContractEvent::GoalCompleted(GoalCompleted {
            goal_id: goal_key(1, 2),
            validated_by_ai: true,
        });
        let transferred = ContractEvent::OwnershipTransferred(OwnershipTransferred {
            previous_owner: Pubkey::new_unique(),
            new_owner: Pubkey::new_unique(),
        });

        registry.dispatch(&log_of(&completed)).await;
        registry.dispatch(&log_of(&transferred)).await;

        assert_eq!(*recorder.seen.lock().unwrap(), vec![EventKind::GoalCompleted]);
        assert_eq!(registry.registered_kinds(), vec![EventKind::GoalCompleted]);
    }

    #[tokio::test]
    async fn test_unknown_payload_is_skipped() {
        let recorder = Arc::new(Recorder::default());
        let mut registry = HandlerRegistry::new();
        let handler: Arc<dyn EventHandler> = recorder.clone();
        registry.register_all(&EventKind::ALL, &handler);

        let log = ProgramLog {
            slot: 1,
            signature: "sig".to_string(),
            data: vec![0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0, 1, 2, 3],
        };
        assert!(registry.decode(&log).is_none());
        registry.dispatch(&log).await;
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_panic() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let mut registry = HandlerRegistry::new();
        registry.register(EventKind::GoalCompleted, recorder.clone());

        let event = ContractEvent::GoalCompleted(GoalCompleted {
            goal_id: goal_key(3, 4),
            validated_by_ai: false,
        });
        registry.dispatch(&log_of(&event)).await;
        registry.dispatch(&log_of(&event)).await;
        assert_eq!(recorder.seen.lock().unwrap().len(), 2);
    }
}
