//! Per-network chain clients, built once at startup and shared.

use std::collections::HashMap;
use std::sync::Arc;

use super::{ChainClient, RpcChainClient};
use crate::common::error::{GoalSyncError, Result};
use crate::config::GoalSyncConfig;
use crate::types::Network;

/// One [`ChainClient`] per configured network.
#[derive(Clone, Default)]
pub struct ChainClients {
    clients: HashMap<Network, Arc<dyn ChainClient>>,
}

impl ChainClients {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an RPC client for every network that has an endpoint configured.
    #[must_use]
    pub fn from_config(config: &GoalSyncConfig) -> Self {
        let mut clients = Self::new();
        for (network, url) in &config.network_rpc_urls {
            clients.insert(*network, Arc::new(RpcChainClient::new(url.clone())));
        }
        clients
    }

    pub fn insert(&mut self, network: Network, client: Arc<dyn ChainClient>) {
        self.clients.insert(network, client);
    }

    #[must_use]
    pub fn with_client(mut self, network: Network, client: Arc<dyn ChainClient>) -> Self {
        self.insert(network, client);
        self
    }

    /// Client for `network`.
    ///
    /// # Errors
    ///
    /// Returns [`GoalSyncError::UnsupportedNetwork`] when no endpoint was configured.
    pub fn get(&self, network: Network) -> Result<Arc<dyn ChainClient>> {
        self.clients
            .get(&network)
            .cloned()
            .ok_or_else(|| GoalSyncError::UnsupportedNetwork(network.to_string()))
    }

    #[must_use]
    pub fn networks(&self) -> Vec<Network> {
        Network::ALL
            .into_iter()
            .filter(|network| self.clients.contains_key(network))
            .collect()
    }
}
