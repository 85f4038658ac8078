//! Best-effort notification fan-out.
//!
//! Backed by a `tokio::sync::broadcast` channel: subscribers that fall behind
//! lose the oldest messages, and publishing with no subscribers is a no-op.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use super::refund::RefundSummary;
use crate::utils::logging::{self, LogLevel};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Notification {
    #[serde(rename_all = "camelCase")]
    BalanceChange {
        wallet_id: i64,
        balance: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    RefundCompleted {
        user_id: i64,
        goal_id: i64,
        summary: RefundSummary,
        timestamp: DateTime<Utc>,
    },
}

impl Notification {
    /// Event name on the wire.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::BalanceChange { .. } => "balance-change",
            Self::RefundCompleted { .. } => "refund-completed",
        }
    }
}

#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Publishes to current subscribers. Never fails.
    pub fn notify(&self, notification: Notification) {
        let name = notification.name();
        if self.sender.send(notification).is_err() {
            logging::log(LogLevel::Debug, &format!("No subscribers for {name}"));
        }
    }

    pub fn balance_changed(&self, wallet_id: i64, balance: impl Into<String>) {
        self.notify(Notification::BalanceChange {
            wallet_id,
            balance: balance.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn refund_completed(&self, user_id: i64, goal_id: i64, summary: RefundSummary) {
        self.notify(Notification::RefundCompleted {
            user_id,
            goal_id,
            summary,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_balance_changes() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        notifier.balance_changed(3, "1.5");

        match rx.recv().await.unwrap() {
            Notification::BalanceChange {
                wallet_id, balance, ..
            } => {
                assert_eq!(wallet_id, 3);
                assert_eq!(balance, "1.5");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_notify_without_subscribers_is_silent() {
        let notifier = Notifier::new();
        notifier.balance_changed(1, "0");
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(Notification::BalanceChange {
            wallet_id: 9,
            balance: "0".to_string(),
            timestamp: Utc::now(),
        })
        .unwrap();
        assert_eq!(json["event"], "balance-change");
        assert_eq!(json["walletId"], 9);
    }
}
