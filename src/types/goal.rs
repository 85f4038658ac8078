//! Goal rows and their status / difficulty enums.

use crate::common::error::{GoalSyncError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a goal.
///
/// Transitions only move forward: `Pending -> Funded -> Completed` (or
/// `Failed`). A completed goal is never moved to any other status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GoalStatus {
    Pending,
    Funded,
    Active,
    Completed,
    Failed,
}

impl GoalStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Funded => "FUNDED",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GoalStatus {
    type Err = GoalSyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "FUNDED" => Ok(Self::Funded),
            "ACTIVE" => Ok(Self::Active),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(GoalSyncError::DecodingError(format!(
                "unknown goal status '{other}'"
            ))),
        }
    }
}

/// Difficulty tier. Ordering follows the declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Extreme,
}

impl Difficulty {
    /// Lowest tier whose goals are mirrored in the escrow program.
    pub const ON_CHAIN_THRESHOLD: Self = Self::Medium;

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "EASY",
            Self::Medium => "MEDIUM",
            Self::Hard => "HARD",
            Self::Extreme => "EXTREME",
        }
    }

    /// Tiers at or above `threshold`, in ascending order.
    #[must_use]
    pub fn at_or_above(threshold: Self) -> Vec<Self> {
        [Self::Easy, Self::Medium, Self::Hard, Self::Extreme]
            .into_iter()
            .filter(|tier| *tier >= threshold)
            .collect()
    }

    #[must_use]
    pub fn is_on_chain(self) -> bool {
        self >= Self::ON_CHAIN_THRESHOLD
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = GoalSyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "EASY" => Ok(Self::Easy),
            "MEDIUM" => Ok(Self::Medium),
            "HARD" => Ok(Self::Hard),
            "EXTREME" => Ok(Self::Extreme),
            other => Err(GoalSyncError::DecodingError(format!(
                "unknown difficulty '{other}'"
            ))),
        }
    }
}

/// A goal as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: i64,
    pub user_id: i64,
    pub status: GoalStatus,
    pub difficulty: Difficulty,
    pub deadline: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
