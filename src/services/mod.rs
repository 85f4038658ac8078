pub mod notifier;
pub mod pricing;
pub mod refund;

pub use notifier::{Notification, Notifier};
pub use pricing::{CoinGeckoPriceSource, PriceSource};
pub use refund::{RefundEligibility, RefundEngine, RefundOutcome, RefundSummary, WalletRefund};
