//! Domain types: goals, wallets, program events and notifications.

pub mod events;
pub mod goal;
pub mod metadata;
pub mod wallet;

pub use events::{ContractEvent, EventKind, GoalAccount, OnChainGoal};
pub use goal::{Difficulty, Goal, GoalStatus};
pub use metadata::{EventContext, ProgramLog};
pub use wallet::{Network, Wallet};
