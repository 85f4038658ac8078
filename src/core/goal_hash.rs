//! Deterministic goal identifiers shared with the escrow program.
//!
//! The program never sees database ids. Each on-chain goal is keyed by a
//! SHA-256 digest of `(user_id, goal_id)`, so the same pair always maps to
//! the same key on every host and across restarts.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const DOMAIN_TAG: &[u8] = b"goal-sync:goal:";

/// 32-byte on-chain goal identifier.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
    Serialize, Deserialize,
)]
pub struct GoalKey(pub [u8; 32]);

impl GoalKey {
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl AsRef<[u8]> for GoalKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for GoalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for GoalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GoalKey({self})")
    }
}

/// Computes the on-chain key for a user's goal.
#[must_use]
pub fn goal_key(user_id: i64, goal_id: i64) -> GoalKey {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_TAG);
    hasher.update(user_id.to_be_bytes());
    hasher.update(goal_id.to_be_bytes());
    GoalKey(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_goal_key_is_deterministic() {
        assert_eq!(goal_key(7, 42), goal_key(7, 42));
        assert_eq!(goal_key(7, 42).to_string(), goal_key(7, 42).to_string());
    }

    #[test]
    fn test_goal_key_separates_inputs() {
        // Swapped arguments must not collide.
        assert_ne!(goal_key(7, 42), goal_key(42, 7));

        let mut seen = HashSet::new();
        for user in 0..20 {
            for goal in 0..20 {
                assert!(seen.insert(goal_key(user, goal)), "collision at ({user}, {goal})");
            }
        }
    }

    #[test]
    fn test_goal_key_handles_negative_ids() {
        assert_ne!(goal_key(-1, 1), goal_key(1, -1));
    }
}
