//! Chain indexer.
//!
//! In pull mode the indexer walks every slot after the stored cursor,
//! dispatches the escrow program's events in order and checkpoints after each
//! slot. In subscribe mode it consumes a `logsSubscribe` stream and hands each
//! event to its own task; no cursor is kept.

use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::decoder;
use super::registry::{HandlerRegistry, run_handler};
use crate::common::error::Result;
use crate::config::{DEFAULT_POLL_INTERVAL_SECS, GoalSyncConfig, SourceConfig};
use crate::sources::{ChainClient, LogNotification, LogSubscription};
use crate::storage::StorageBackend;
use crate::types::EventContext;
use crate::utils::logging::{self, LogLevel};

/// How new program activity is discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexerMode {
    Pull,
    Subscribe { ws_url: String },
}

impl From<&SourceConfig> for IndexerMode {
    fn from(source: &SourceConfig) -> Self {
        match source {
            SourceConfig::Rpc { .. } => Self::Pull,
            SourceConfig::WebSocket { ws_url, .. } => Self::Subscribe {
                ws_url: ws_url.clone(),
            },
        }
    }
}

struct Pipeline {
    program_id: Pubkey,
    storage: Arc<dyn StorageBackend>,
    chain: Arc<dyn ChainClient>,
    registry: Arc<HandlerRegistry>,
}

impl Pipeline {
    fn cursor_key(&self) -> String {
        self.program_id.to_string()
    }

    /// Processes every slot between the cursor and the chain head.
    async fn process_new_blocks(&self, cancel: Option<&CancellationToken>) -> Result<u64> {
        let key = self.cursor_key();

        let Some(cursor) = self.storage.load_cursor(&key).await? else {
            let head = self.chain.current_height().await?;
            self.storage.save_cursor(&key, head).await?;
            logging::log(
                LogLevel::Info,
                &format!("No cursor for {key}; starting from slot {head}"),
            );
            return Ok(head);
        };

        let from = cursor.last_processed_block;
        let head = self.chain.current_height().await?;
        if head <= from {
            return Ok(from);
        }

        logging::log(
            LogLevel::Debug,
            &format!("Processing slots {}..={head}", from + 1),
        );

        let mut reached = from;
        for slot in (from + 1)..=head {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                break;
            }

            let logs = match self.chain.program_logs(&self.program_id, slot).await {
                Ok(logs) => logs,
                Err(e) => {
                    logging::log_error(
                        &format!(
                            "Fetching slot {slot} from {} failed; resuming after {reached} next poll",
                            self.chain.source_name()
                        ),
                        &e,
                    );
                    break;
                }
            };

            for log in &logs {
                self.registry.dispatch(log).await;
            }

            self.storage.save_cursor(&key, slot).await?;
            reached = slot;
        }

        Ok(reached)
    }

    /// Decodes one subscription notification and spawns a task per event.
    fn dispatch_notification(&self, notification: LogNotification) {
        if notification.failed {
            return;
        }

        let logs = decoder::program_logs(
            &self.program_id.to_string(),
            notification.slot,
            &notification.signature,
            &notification.logs,
        );

        for log in logs {
            let Some((event, handler)) = self.registry.decode(&log) else {
                continue;
            };
            let context = EventContext::from(&log);
            tokio::spawn(async move {
                run_handler(handler.as_ref(), &event, &context).await;
            });
        }
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Keeps the cursor store and the registered handlers current with the
/// escrow program.
pub struct GoalIndexer {
    mode: IndexerMode,
    poll_interval: Duration,
    pipeline: Arc<Pipeline>,
    active: Arc<AtomicBool>,
    running: Mutex<Option<Running>>,
}

impl GoalIndexer {
    #[must_use]
    pub fn new(
        mode: IndexerMode,
        program_id: Pubkey,
        storage: Arc<dyn StorageBackend>,
        chain: Arc<dyn ChainClient>,
        registry: HandlerRegistry,
    ) -> Self {
        Self {
            mode,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            pipeline: Arc::new(Pipeline {
                program_id,
                storage,
                chain,
                registry: Arc::new(registry),
            }),
            active: Arc::new(AtomicBool::new(false)),
            running: Mutex::new(None),
        }
    }

    /// Builds an indexer for the configured program and transport.
    #[must_use]
    pub fn from_config(
        config: &GoalSyncConfig,
        storage: Arc<dyn StorageBackend>,
        chain: Arc<dyn ChainClient>,
        registry: HandlerRegistry,
    ) -> Self {
        Self::new(
            IndexerMode::from(&config.source),
            config.program_id,
            storage,
            chain,
            registry,
        )
        .with_poll_interval(config.poll_interval())
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn mode(&self) -> &IndexerMode {
        &self.mode
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Runs one pull iteration and returns the slot the cursor reached.
    ///
    /// # Errors
    ///
    /// Returns chain errors from reading the head and storage errors from
    /// the cursor. A failure fetching one slot's logs is logged and ends the
    /// batch early instead.
    pub async fn process_new_blocks(&self) -> Result<u64> {
        self.pipeline.process_new_blocks(None).await
    }

    /// Starts the background loop. Does nothing if already running.
    ///
    /// # Errors
    ///
    /// In pull mode, fails if the initial cursor cannot be established. In
    /// subscribe mode, fails if the subscription cannot be opened.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if self.is_active() {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let task = match &self.mode {
            IndexerMode::Pull => {
                let cursor = self.pipeline.process_new_blocks(None).await?;
                logging::log(
                    LogLevel::Success,
                    &format!(
                        "Indexer polling {} via {} every {:?} from slot {cursor}",
                        self.pipeline.program_id,
                        self.pipeline.chain.source_name(),
                        self.poll_interval
                    ),
                );
                self.active.store(true, Ordering::SeqCst);
                tokio::spawn(pull_loop(
                    Arc::clone(&self.pipeline),
                    self.poll_interval,
                    cancel.clone(),
                    Arc::clone(&self.active),
                ))
            }
            IndexerMode::Subscribe { ws_url } => {
                let mut subscription =
                    LogSubscription::new(ws_url.clone(), self.pipeline.program_id);
                subscription.connect().await?;
                self.active.store(true, Ordering::SeqCst);
                tokio::spawn(subscribe_loop(
                    Arc::clone(&self.pipeline),
                    subscription,
                    cancel.clone(),
                    Arc::clone(&self.active),
                ))
            }
        };

        *running = Some(Running { cancel, task });
        Ok(())
    }

    /// Stops the background loop. In subscribe mode this unsubscribes;
    /// handler tasks already spawned keep running.
    pub async fn stop(&self) {
        let Some(Running { cancel, task }) = self.running.lock().await.take() else {
            return;
        };
        cancel.cancel();
        if let Err(e) = task.await {
            logging::log_error("Indexer task ended abnormally", &e);
        }
        self.active.store(false, Ordering::SeqCst);
        logging::log(LogLevel::Info, "Indexer stopped");
    }
}

async fn pull_loop(
    pipeline: Arc<Pipeline>,
    poll_interval: Duration,
    cancel: CancellationToken,
    active: Arc<AtomicBool>,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(poll_interval) => {}
        }

        if let Err(e) = pipeline.process_new_blocks(Some(&cancel)).await {
            logging::log_error("Indexer poll failed", &e);
        }
    }
    active.store(false, Ordering::SeqCst);
}

async fn subscribe_loop(
    pipeline: Arc<Pipeline>,
    mut subscription: LogSubscription,
    cancel: CancellationToken,
    active: Arc<AtomicBool>,
) {
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => None,
            notification = subscription.next() => Some(notification),
        };

        match next {
            None => {
                if let Err(e) = subscription.unsubscribe().await {
                    logging::log_error("Unsubscribe failed", &e);
                }
                break;
            }
            Some(None) => {
                logging::log(
                    LogLevel::Error,
                    "Log subscription closed by the node; indexer is now inactive",
                );
                break;
            }
            Some(Some(notification)) => pipeline.dispatch_notification(notification),
        }
    }
    active.store(false, Ordering::SeqCst);
}
