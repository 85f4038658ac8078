//! Events emitted by the escrow program and the goal account it maintains.
//!
//! Both are Anchor-style payloads: an 8-byte discriminator derived from the
//! type name followed by the borsh-encoded body.

use crate::common::error::{GoalSyncError, Result};
use crate::core::goal_hash::GoalKey;
use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use std::fmt;

/// First 8 bytes of `sha256("event:<name>")`.
#[must_use]
pub fn event_discriminator(name: &str) -> [u8; 8] {
    discriminator("event", name)
}

/// First 8 bytes of `sha256("account:<name>")`.
#[must_use]
pub fn account_discriminator(name: &str) -> [u8; 8] {
    discriminator("account", name)
}

fn discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("{namespace}:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct GoalCommitted {
    pub goal_id: GoalKey,
    pub user: Pubkey,
    pub amount: u64,
    pub deadline: i64,
    pub recipient: Pubkey,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct GoalCompleted {
    pub goal_id: GoalKey,
    pub validated_by_ai: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct GoalClaimed {
    pub goal_id: GoalKey,
    pub recipient: Pubkey,
    pub amount: u64,
    pub was_user_goal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct OwnershipTransferred {
    pub previous_owner: Pubkey,
    pub new_owner: Pubkey,
}

/// Every event kind the escrow program emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    GoalCommitted,
    GoalCompleted,
    GoalClaimed,
    OwnershipTransferred,
}

impl EventKind {
    pub const ALL: [Self; 4] = [
        Self::GoalCommitted,
        Self::GoalCompleted,
        Self::GoalClaimed,
        Self::OwnershipTransferred,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::GoalCommitted => "GoalCommitted",
            Self::GoalCompleted => "GoalCompleted",
            Self::GoalClaimed => "GoalClaimed",
            Self::OwnershipTransferred => "OwnershipTransferred",
        }
    }

    #[must_use]
    pub fn discriminator(self) -> [u8; 8] {
        event_discriminator(self.name())
    }

    /// Looks up the kind whose discriminator matches `disc`.
    #[must_use]
    pub fn from_discriminator(disc: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.discriminator().as_slice() == disc)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded escrow program event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractEvent {
    GoalCommitted(GoalCommitted),
    GoalCompleted(GoalCompleted),
    GoalClaimed(GoalClaimed),
    OwnershipTransferred(OwnershipTransferred),
}

impl ContractEvent {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::GoalCommitted(_) => EventKind::GoalCommitted,
            Self::GoalCompleted(_) => EventKind::GoalCompleted,
            Self::GoalClaimed(_) => EventKind::GoalClaimed,
            Self::OwnershipTransferred(_) => EventKind::OwnershipTransferred,
        }
    }

    /// Goal identifier carried by the event, if any.
    #[must_use]
    pub const fn goal_key(&self) -> Option<GoalKey> {
        match self {
            Self::GoalCommitted(e) => Some(e.goal_id),
            Self::GoalCompleted(e) => Some(e.goal_id),
            Self::GoalClaimed(e) => Some(e.goal_id),
            Self::OwnershipTransferred(_) => None,
        }
    }

    /// Decodes a raw `Program data:` payload.
    ///
    /// # Errors
    ///
    /// Returns [`GoalSyncError::UnknownEvent`] for an unrecognised
    /// discriminator and [`GoalSyncError::DecodingError`] for a malformed body.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(GoalSyncError::DecodingError(format!(
                "event payload too short ({} bytes)",
                data.len()
            )));
        }

        let (disc, body) = data.split_at(8);
        let kind = EventKind::from_discriminator(disc)
            .ok_or_else(|| GoalSyncError::UnknownEvent(bs58::encode(disc).into_string()))?;

        let decoded = match kind {
            EventKind::GoalCommitted => borsh::from_slice(body).map(Self::GoalCommitted),
            EventKind::GoalCompleted => borsh::from_slice(body).map(Self::GoalCompleted),
            EventKind::GoalClaimed => borsh::from_slice(body).map(Self::GoalClaimed),
            EventKind::OwnershipTransferred => {
                borsh::from_slice(body).map(Self::OwnershipTransferred)
            }
        };

        decoded.map_err(|e| GoalSyncError::DecodingError(format!("{kind}: {e}")))
    }

    /// Encodes the event the way the program emits it.
    ///
    /// # Errors
    ///
    /// Returns [`GoalSyncError::InternalError`] if borsh serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = self.kind().discriminator().to_vec();
        let body = match self {
            Self::GoalCommitted(e) => borsh::to_vec(e),
            Self::GoalCompleted(e) => borsh::to_vec(e),
            Self::GoalClaimed(e) => borsh::to_vec(e),
            Self::OwnershipTransferred(e) => borsh::to_vec(e),
        }
        .map_err(|e| GoalSyncError::InternalError(e.to_string()))?;
        out.extend(body);
        Ok(out)
    }
}

/// Raw layout of the program's per-goal account.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct GoalAccount {
    pub user: Pubkey,
    pub amount: u64,
    pub deadline: i64,
    pub recipient: Pubkey,
    pub completed: bool,
    pub claimed: bool,
}

impl GoalAccount {
    pub const NAME: &'static str = "GoalRecord";

    /// Decodes discriminator-prefixed account data. Trailing bytes (account
    /// padding) are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`GoalSyncError::DecodingError`] on a wrong discriminator or a
    /// truncated body.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 8 || data[..8] != account_discriminator(Self::NAME) {
            return Err(GoalSyncError::DecodingError(
                "account is not a goal record".to_string(),
            ));
        }
        let mut body = &data[8..];
        Self::deserialize(&mut body).map_err(|e| GoalSyncError::DecodingError(e.to_string()))
    }

    /// Encodes the account with its discriminator.
    ///
    /// # Errors
    ///
    /// Returns [`GoalSyncError::InternalError`] if borsh serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = account_discriminator(Self::NAME).to_vec();
        out.extend(borsh::to_vec(self).map_err(|e| GoalSyncError::InternalError(e.to_string()))?);
        Ok(out)
    }
}

/// Snapshot of a goal as the escrow program currently sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OnChainGoal {
    pub exists: bool,
    pub amount: u64,
    pub completed: bool,
    pub claimed: bool,
    pub deadline: i64,
}

impl OnChainGoal {
    /// Snapshot for a goal the program has no account for.
    #[must_use]
    pub fn missing() -> Self {
        Self::default()
    }
}

impl From<&GoalAccount> for OnChainGoal {
    fn from(account: &GoalAccount) -> Self {
        Self {
            exists: true,
            amount: account.amount,
            completed: account.completed,
            claimed: account.claimed,
            deadline: account.deadline,
        }
    }
}
