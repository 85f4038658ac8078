//! Configuration for goal-sync.
//!
//! Use [`GoalSyncConfigBuilder`] to assemble a configuration in code, or
//! [`GoalSyncConfig::from_env`] to read it from environment variables.

use crate::common::error::{GoalSyncError, Result};
use crate::types::Network;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Default seconds between slot-height checks in pull mode.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
/// Default number of jobs a worker runs at once.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 4;
/// Default milliseconds between job-queue polls.
pub const DEFAULT_JOB_POLL_INTERVAL_MS: u64 = 1_000;
/// Default price API base URL.
pub const DEFAULT_PRICE_API_URL: &str = "https://api.coingecko.com/api/v3";

/// How the indexer learns about new program activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    /// Request/response transport: poll slots and walk blocks.
    Rpc { rpc_url: String },
    /// Persistent subscription transport. `rpc_url` is still used for
    /// account reads and balances.
    WebSocket { ws_url: String, rpc_url: String },
}

impl SourceConfig {
    #[must_use]
    pub fn rpc_url(&self) -> &str {
        match self {
            Self::Rpc { rpc_url } | Self::WebSocket { rpc_url, .. } => rpc_url,
        }
    }
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct GoalSyncConfig {
    pub source: SourceConfig,
    pub database_url: String,
    /// Escrow program (the "contract address" the cursor is keyed by).
    pub program_id: Pubkey,
    /// Network the escrow program is deployed on.
    pub escrow_network: Network,
    /// RPC endpoint per wallet network. Always contains `escrow_network`.
    pub network_rpc_urls: HashMap<Network, String>,
    pub poll_interval_secs: u64,
    pub worker_concurrency: usize,
    pub job_poll_interval_ms: u64,
    pub price_api_url: String,
}

impl GoalSyncConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    #[must_use]
    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_millis(self.job_poll_interval_ms)
    }

    /// Reads configuration from the environment.
    ///
    /// Required: `RPC_URL`, `DATABASE_URL`, `PROGRAM_ID`. Optional: `WS_URL`
    /// (switches the indexer to subscribe mode), `ESCROW_NETWORK`,
    /// `POLL_INTERVAL_SECS`, `WORKER_CONCURRENCY`, `JOB_POLL_INTERVAL_MS`,
    /// `PRICE_API_URL`, and `<NETWORK>_RPC_URL` per wallet network.
    ///
    /// # Errors
    ///
    /// Returns [`GoalSyncError::ConfigError`] for missing or malformed values.
    pub fn from_env() -> Result<Self> {
        let rpc_url = required_env("RPC_URL")?;
        let mut builder = match std::env::var("WS_URL") {
            Ok(ws_url) => GoalSyncConfigBuilder::new().with_ws(ws_url, rpc_url),
            Err(_) => GoalSyncConfigBuilder::new().with_rpc(rpc_url),
        };

        builder = builder
            .with_database(required_env("DATABASE_URL")?)
            .program_id(required_env("PROGRAM_ID")?);

        if let Ok(network) = std::env::var("ESCROW_NETWORK") {
            builder = builder.with_escrow_network(network.parse()?);
        }
        if let Some(secs) = parsed_env::<u64>("POLL_INTERVAL_SECS")? {
            builder = builder.with_poll_interval(secs);
        }
        if let Some(workers) = parsed_env::<usize>("WORKER_CONCURRENCY")? {
            builder = builder.with_worker_concurrency(workers);
        }
        if let Some(ms) = parsed_env::<u64>("JOB_POLL_INTERVAL_MS")? {
            builder = builder.with_job_poll_interval_ms(ms);
        }
        if let Ok(url) = std::env::var("PRICE_API_URL") {
            builder = builder.with_price_api(url);
        }
        for network in Network::ALL {
            if let Ok(url) = std::env::var(format!("{}_RPC_URL", network.as_str())) {
                builder = builder.with_network_rpc(network, url);
            }
        }

        builder.build()
    }
}

fn required_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| GoalSyncError::ConfigError(format!("{name} must be set")))
}

fn parsed_env<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| GoalSyncError::ConfigError(format!("{name}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Builder for [`GoalSyncConfig`].
///
/// # Example
///
/// ```no_run
/// use goal_sync::GoalSyncConfigBuilder;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = GoalSyncConfigBuilder::new()
///     .with_rpc("http://127.0.0.1:8899")
///     .with_database("postgresql://localhost/goals")
///     .program_id("11111111111111111111111111111111")
///     .with_poll_interval(2)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct GoalSyncConfigBuilder {
    source: Option<SourceConfig>,
    database_url: Option<String>,
    program_id: Option<String>,
    escrow_network: Option<Network>,
    network_rpc_urls: HashMap<Network, String>,
    poll_interval_secs: Option<u64>,
    worker_concurrency: Option<usize>,
    job_poll_interval_ms: Option<u64>,
    price_api_url: Option<String>,
}

impl GoalSyncConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses polling over the given RPC endpoint.
    #[must_use]
    pub fn with_rpc(mut self, rpc_url: impl Into<String>) -> Self {
        self.source = Some(SourceConfig::Rpc {
            rpc_url: rpc_url.into(),
        });
        self
    }

    /// Uses a websocket subscription, with `rpc_url` for reads.
    #[must_use]
    pub fn with_ws(mut self, ws_url: impl Into<String>, rpc_url: impl Into<String>) -> Self {
        self.source = Some(SourceConfig::WebSocket {
            ws_url: ws_url.into(),
            rpc_url: rpc_url.into(),
        });
        self
    }

    #[must_use]
    pub fn with_database(mut self, database_url: impl Into<String>) -> Self {
        self.database_url = Some(database_url.into());
        self
    }

    #[must_use]
    pub fn program_id(mut self, program_id: impl Into<String>) -> Self {
        self.program_id = Some(program_id.into());
        self
    }

    #[must_use]
    pub fn with_escrow_network(mut self, network: Network) -> Self {
        self.escrow_network = Some(network);
        self
    }

    /// RPC endpoint for wallets on `network`.
    #[must_use]
    pub fn with_network_rpc(mut self, network: Network, rpc_url: impl Into<String>) -> Self {
        self.network_rpc_urls.insert(network, rpc_url.into());
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn with_worker_concurrency(mut self, workers: usize) -> Self {
        self.worker_concurrency = Some(workers);
        self
    }

    #[must_use]
    pub fn with_job_poll_interval_ms(mut self, ms: u64) -> Self {
        self.job_poll_interval_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_price_api(mut self, url: impl Into<String>) -> Self {
        self.price_api_url = Some(url.into());
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GoalSyncError::ConfigError`] if a required value is missing,
    /// the program id is not a valid public key, or an interval is zero.
    pub fn build(self) -> Result<GoalSyncConfig> {
        let source = self
            .source
            .ok_or_else(|| GoalSyncError::ConfigError("RPC URL is required".to_string()))?;
        let database_url = self
            .database_url
            .ok_or_else(|| GoalSyncError::ConfigError("Database URL is required".to_string()))?;
        let program_id_str = self
            .program_id
            .ok_or_else(|| GoalSyncError::ConfigError("Program ID is required".to_string()))?;
        let program_id = Pubkey::from_str(&program_id_str)
            .map_err(|e| GoalSyncError::ConfigError(format!("Invalid program ID: {e}")))?;

        if let SourceConfig::WebSocket { ws_url, .. } = &source {
            if !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://")) {
                return Err(GoalSyncError::ConfigError(format!(
                    "WebSocket URL must start with ws:// or wss://, got {ws_url}"
                )));
            }
        }

        let poll_interval_secs = self.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if poll_interval_secs == 0 {
            return Err(GoalSyncError::ConfigError(
                "Poll interval must be at least one second".to_string(),
            ));
        }
        let worker_concurrency = self.worker_concurrency.unwrap_or(DEFAULT_WORKER_CONCURRENCY);
        if worker_concurrency == 0 {
            return Err(GoalSyncError::ConfigError(
                "Worker concurrency must be at least one".to_string(),
            ));
        }

        let escrow_network = self.escrow_network.unwrap_or(Network::Devnet);
        let mut network_rpc_urls = self.network_rpc_urls;
        network_rpc_urls
            .entry(escrow_network)
            .or_insert_with(|| source.rpc_url().to_string());

        Ok(GoalSyncConfig {
            source,
            database_url,
            program_id,
            escrow_network,
            network_rpc_urls,
            poll_interval_secs,
            worker_concurrency,
            job_poll_interval_ms: self
                .job_poll_interval_ms
                .unwrap_or(DEFAULT_JOB_POLL_INTERVAL_MS),
            price_api_url: self
                .price_api_url
                .unwrap_or_else(|| DEFAULT_PRICE_API_URL.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRAM: &str = "11111111111111111111111111111111";

    #[test]
    fn test_builder_defaults() {
        let config = GoalSyncConfigBuilder::new()
            .with_rpc("http://127.0.0.1:8899")
            .with_database("postgresql://localhost/goals")
            .program_id(PROGRAM)
            .build()
            .unwrap();

        assert_eq!(config.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(config.escrow_network, Network::Devnet);
        assert_eq!(
            config.network_rpc_urls.get(&Network::Devnet).map(String::as_str),
            Some("http://127.0.0.1:8899")
        );
        assert!(matches!(config.source, SourceConfig::Rpc { .. }));
    }

    #[test]
    fn test_ws_source_keeps_rpc_for_reads() {
        let config = GoalSyncConfigBuilder::new()
            .with_ws("ws://127.0.0.1:8900", "http://127.0.0.1:8899")
            .with_database("postgresql://localhost/goals")
            .program_id(PROGRAM)
            .with_escrow_network(Network::Localnet)
            .build()
            .unwrap();

        assert_eq!(config.source.rpc_url(), "http://127.0.0.1:8899");
        assert!(config.network_rpc_urls.contains_key(&Network::Localnet));
    }

    #[test]
    fn test_builder_rejects_invalid_input() {
        let missing_db = GoalSyncConfigBuilder::new()
            .with_rpc("http://127.0.0.1:8899")
            .program_id(PROGRAM)
            .build();
        assert!(matches!(missing_db, Err(GoalSyncError::ConfigError(_))));

        let bad_program = GoalSyncConfigBuilder::new()
            .with_rpc("http://127.0.0.1:8899")
            .with_database("postgresql://localhost/goals")
            .program_id("not-a-key")
            .build();
        assert!(matches!(bad_program, Err(GoalSyncError::ConfigError(_))));

        let bad_ws = GoalSyncConfigBuilder::new()
            .with_ws("http://127.0.0.1:8900", "http://127.0.0.1:8899")
            .with_database("postgresql://localhost/goals")
            .program_id(PROGRAM)
            .build();
        assert!(matches!(bad_ws, Err(GoalSyncError::ConfigError(_))));

        let zero_poll = GoalSyncConfigBuilder::new()
            .with_rpc("http://127.0.0.1:8899")
            .with_database("postgresql://localhost/goals")
            .program_id(PROGRAM)
            .with_poll_interval(0)
            .build();
        assert!(matches!(zero_poll, Err(GoalSyncError::ConfigError(_))));
    }
}
