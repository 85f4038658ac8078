pub mod decoder;
pub mod goal_hash;
pub mod indexer;
pub mod reconciler;
pub mod registry;

pub use goal_hash::{GoalKey, goal_key};
pub use indexer::{GoalIndexer, IndexerMode};
pub use reconciler::{GoalReconciler, OwnershipLogger, derive_status};
pub use registry::{EventHandler, HandlerRegistry};
