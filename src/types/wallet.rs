//! Wallets attached to goals and the networks they live on.

use crate::common::error::{GoalSyncError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Solana cluster a wallet or the escrow program lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Network {
    Mainnet,
    Devnet,
    Testnet,
    Localnet,
}

impl Network {
    pub const ALL: [Self; 4] = [Self::Mainnet, Self::Devnet, Self::Testnet, Self::Localnet];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mainnet => "MAINNET",
            Self::Devnet => "DEVNET",
            Self::Testnet => "TESTNET",
            Self::Localnet => "LOCALNET",
        }
    }

    /// Price-API asset id for the network's native token.
    ///
    /// Test clusters are priced as mainnet SOL; localnet has no price.
    #[must_use]
    pub const fn price_asset_id(self) -> Option<&'static str> {
        match self {
            Self::Mainnet | Self::Devnet | Self::Testnet => Some("solana"),
            Self::Localnet => None,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = GoalSyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "MAINNET" | "MAINNET-BETA" => Ok(Self::Mainnet),
            "DEVNET" => Ok(Self::Devnet),
            "TESTNET" => Ok(Self::Testnet),
            "LOCALNET" => Ok(Self::Localnet),
            other => Err(GoalSyncError::UnsupportedNetwork(other.to_string())),
        }
    }
}

/// A custodial wallet funded for a goal.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: i64,
    pub goal_id: i64,
    pub network: Network,
    pub public_key: String,
    /// Base58 keypair. Only read when signing a refund.
    #[serde(skip_serializing)]
    pub secret_key: String,
    /// Last observed balance as a decimal SOL string.
    pub last_balance: String,
    pub last_balance_update: Option<DateTime<Utc>>,
    pub refund_address: Option<String>,
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("id", &self.id)
            .field("goal_id", &self.goal_id)
            .field("network", &self.network)
            .field("public_key", &self.public_key)
            .field("last_balance", &self.last_balance)
            .field("last_balance_update", &self.last_balance_update)
            .field("refund_address", &self.refund_address)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parsing() {
        assert_eq!("devnet".parse::<Network>().unwrap(), Network::Devnet);
        assert_eq!("mainnet-beta".parse::<Network>().unwrap(), Network::Mainnet);
        assert!(matches!(
            "ethereum".parse::<Network>(),
            Err(GoalSyncError::UnsupportedNetwork(_))
        ));
    }

    #[test]
    fn test_debug_hides_secret() {
        let wallet = Wallet {
            id: 1,
            goal_id: 2,
            network: Network::Devnet,
            public_key: "pk".to_string(),
            secret_key: "super-secret".to_string(),
            last_balance: "0".to_string(),
            last_balance_update: None,
            refund_address: None,
        };
        assert!(!format!("{wallet:?}").contains("super-secret"));
    }
}
