//! goal-sync service.
//!
//! With no subcommand, runs the indexer and both job workers until Ctrl-C.
//! The subcommands are one-shot operations against the same configuration.

#![warn(clippy::all, clippy::pedantic)]

use clap::{Parser, Subcommand};
use goal_sync::jobs::price_cache::{PriceCacheJob, PriceRefresher, schedule_price_refresh};
use goal_sync::jobs::wallet_monitor::{
    WalletMonitorHandler, WalletMonitorJob, start_wallet_monitoring,
};
use goal_sync::utils::logging::{self, LogLevel};
use goal_sync::{
    ChainClients, CoinGeckoPriceSource, EventHandler, EventKind, GoalIndexer, GoalReconciler,
    GoalSyncConfig, GoalSyncError, HandlerRegistry, JobQueue, JobWorker, Notifier,
    OwnershipLogger, PgJobQueue, RefundEngine, Storage, StorageBackend,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "goal-sync", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Pay out every refundable wallet of a goal.
    Refund { goal_id: i64 },
    /// Print a refund estimate without sending anything.
    Eligibility { goal_id: i64 },
    /// Start (or restart) the balance monitor for a wallet.
    Monitor { wallet_id: i64, goal_id: i64 },
    /// Re-read one goal from chain and update its status.
    Reconcile { goal_id: i64 },
}

struct App {
    config: GoalSyncConfig,
    storage: Arc<dyn StorageBackend>,
    queue: Arc<dyn JobQueue>,
    clients: ChainClients,
    notifier: Notifier,
}

impl App {
    async fn connect(config: GoalSyncConfig) -> goal_sync::Result<Self> {
        let storage = Storage::new(&config.database_url).await?;
        storage.initialize().await?;
        let queue = PgJobQueue::new(storage.pool().clone());
        queue.initialize().await?;

        let clients = ChainClients::from_config(&config);
        logging::log(
            LogLevel::Info,
            &format!("Chain clients configured for {:?}", clients.networks()),
        );

        Ok(Self {
            config,
            storage: Arc::new(storage),
            queue: Arc::new(queue),
            clients,
            notifier: Notifier::new(),
        })
    }

    fn reconciler(&self) -> goal_sync::Result<GoalReconciler> {
        Ok(GoalReconciler::new(
            self.storage.clone(),
            self.clients.get(self.config.escrow_network)?,
            self.config.program_id,
        ))
    }

    fn refund_engine(&self) -> RefundEngine {
        RefundEngine::new(self.storage.clone(), self.clients.clone(), self.notifier.clone())
    }

    async fn serve(self) -> goal_sync::Result<()> {
        let reconciler: Arc<dyn EventHandler> = Arc::new(self.reconciler()?);
        let mut registry = HandlerRegistry::new();
        registry.register_all(
            &[
                EventKind::GoalCommitted,
                EventKind::GoalCompleted,
                EventKind::GoalClaimed,
            ],
            &reconciler,
        );
        registry.register(EventKind::OwnershipTransferred, Arc::new(OwnershipLogger));

        let indexer = GoalIndexer::from_config(
            &self.config,
            self.storage.clone(),
            self.clients.get(self.config.escrow_network)?,
            registry,
        );
        indexer.start().await?;

        let cancel = CancellationToken::new();

        let monitor = Arc::new(WalletMonitorHandler::new(
            self.storage.clone(),
            self.clients.clone(),
            self.notifier.clone(),
        ));
        let monitor_task = JobWorker::<WalletMonitorJob, _>::new(self.queue.clone(), monitor)
            .with_concurrency(self.config.worker_concurrency)
            .with_poll_interval(self.config.job_poll_interval())
            .spawn(cancel.clone())
            .await?;

        let prices = Arc::new(PriceRefresher::new(
            self.storage.clone(),
            Arc::new(CoinGeckoPriceSource::new(self.config.price_api_url.clone())?),
        ));
        let price_task = JobWorker::<PriceCacheJob, _>::new(self.queue.clone(), prices)
            .with_poll_interval(self.config.job_poll_interval())
            .spawn(cancel.clone())
            .await?;

        schedule_price_refresh(self.queue.as_ref()).await?;

        logging::log(LogLevel::Success, "goal-sync running; press Ctrl+C to stop");
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| GoalSyncError::InternalError(format!("signal handler: {e}")))?;

        logging::log(LogLevel::Info, "Shutting down");
        cancel.cancel();
        indexer.stop().await;
        for task in [monitor_task, price_task] {
            if let Err(e) = task.await {
                logging::log_error("Worker ended abnormally", &e);
            }
        }
        Ok(())
    }
}

async fn run(command: Option<Commands>) -> goal_sync::Result<()> {
    let config = GoalSyncConfig::from_env()?;
    logging::log(
        LogLevel::Info,
        &format!(
            "Program {} on {} via {}",
            config.program_id,
            config.escrow_network,
            config.source.rpc_url()
        ),
    );
    let app = App::connect(config).await?;

    match command {
        None => app.serve().await,
        Some(Commands::Refund { goal_id }) => {
            let summary = app.refund_engine().process_refunds(goal_id).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Some(Commands::Eligibility { goal_id }) => {
            let report = app.refund_engine().refund_eligibility(goal_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Some(Commands::Monitor { wallet_id, goal_id }) => {
            start_wallet_monitoring(app.queue.as_ref(), wallet_id, goal_id).await?;
            Ok(())
        }
        Some(Commands::Reconcile { goal_id }) => {
            match app.reconciler()?.update_goal_status_from_chain(goal_id).await? {
                Some(status) => println!("goal {goal_id} -> {status}"),
                None => println!("goal {goal_id} unchanged"),
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    logging::log_section("goal-sync");

    let cli = Cli::parse();
    if let Err(e) = run(cli.command).await {
        logging::log_error("goal-sync failed", &e);
        std::process::exit(1);
    }
}
