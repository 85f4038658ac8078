//! WebSocket `logsSubscribe` transport for real-time indexing
//!
//! This module provides a WebSocket client that subscribes to log
//! notifications mentioning the escrow program and yields them as they arrive.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use crate::common::error::{GoalSyncError, Result};
use crate::utils::logging::{self, LogLevel};

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Log notification for one transaction that mentioned the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogNotification {
    pub slot: u64,
    pub signature: String,
    /// Whether the transaction failed. Events from failed transactions are void.
    pub failed: bool,
    pub logs: Vec<String>,
}

/// WebSocket log subscription
///
/// Connects to Solana's WebSocket RPC and subscribes to logs that mention the
/// program. There is no automatic reconnection: when the socket closes,
/// [`LogSubscription::next`] returns `None` and the owner decides what to do.
pub struct LogSubscription {
    /// WebSocket URL (ws:// or wss://)
    ws_url: String,
    /// Program ID to subscribe to
    program_id: Pubkey,
    /// Internal state
    state: SubscriptionState,
}

enum SubscriptionState {
    Disconnected,
    Connected {
        subscription_id: u64,
        writer: WsWriter,
        receiver: mpsc::UnboundedReceiver<LogNotification>,
    },
}

#[derive(Debug, Deserialize)]
struct LogsNotification {
    params: NotificationParams,
}

#[derive(Debug, Deserialize)]
struct NotificationParams {
    result: NotificationResult,
}

#[derive(Debug, Deserialize)]
struct NotificationResult {
    context: NotificationContext,
    value: NotificationValue,
}

#[derive(Debug, Deserialize)]
struct NotificationContext {
    slot: u64,
}

#[derive(Debug, Deserialize)]
struct NotificationValue {
    signature: String,
    err: Option<serde_json::Value>,
    logs: Vec<String>,
}

/// Subscription response from Solana
#[derive(Debug, Deserialize)]
struct SubscriptionResponse {
    result: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Parses a `logsNotification` frame.
fn parse_notification(text: &str) -> Option<LogNotification> {
    let notification = serde_json::from_str::<LogsNotification>(text).ok()?;
    let NotificationResult { context, value } = notification.params.result;
    Some(LogNotification {
        slot: context.slot,
        signature: value.signature,
        failed: value.err.is_some_and(|err| !err.is_null()),
        logs: value.logs,
    })
}

impl LogSubscription {
    /// Creates a new, disconnected subscription
    ///
    /// # Arguments
    ///
    /// * `ws_url` - WebSocket URL (e.g., "ws://127.0.0.1:8900")
    /// * `program_id` - Program whose logs should be delivered
    #[must_use]
    pub fn new(ws_url: impl Into<String>, program_id: Pubkey) -> Self {
        Self {
            ws_url: ws_url.into(),
            program_id,
            state: SubscriptionState::Disconnected,
        }
    }

    /// Connects to WebSocket and subscribes to program logs
    ///
    /// # Errors
    ///
    /// Returns [`GoalSyncError::RpcError`] if the socket cannot be opened or
    /// the node rejects the subscription.
    pub async fn connect(&mut self) -> Result<()> {
        logging::log(
            LogLevel::Info,
            &format!("Connecting to WebSocket: {}", self.ws_url),
        );

        let (ws_stream, _) = connect_async(&self.ws_url).await.map_err(|e| {
            GoalSyncError::RpcError(format!("WebSocket connection failed: {e}"))
        })?;

        let (mut write, mut read) = ws_stream.split();

        let subscribe_request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "logsSubscribe",
            "params": [
                { "mentions": [self.program_id.to_string()] },
                { "commitment": "confirmed" }
            ]
        });

        write
            .send(Message::Text(subscribe_request.to_string()))
            .await
            .map_err(|e| GoalSyncError::RpcError(format!("Failed to send subscription: {e}")))?;

        // Wait for subscription confirmation
        let subscription_id = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(response) = serde_json::from_str::<SubscriptionResponse>(&text) {
                        break response.result;
                    }
                    if let Ok(response) = serde_json::from_str::<ErrorResponse>(&text) {
                        return Err(GoalSyncError::RpcError(format!(
                            "Subscription rejected: {}",
                            response.error.message
                        )));
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(GoalSyncError::RpcError(
                        "WebSocket closed before subscription was confirmed".to_string(),
                    ));
                }
            }
        };

        logging::log(
            LogLevel::Success,
            &format!("WebSocket subscribed (ID: {subscription_id})"),
        );

        let (tx, rx) = mpsc::unbounded_channel();

        // Dropping `tx` when the socket ends closes the channel, which is how
        // the owner learns about transport failures.
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if let Some(notification) = parse_notification(&text) {
                            if tx.send(notification).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        logging::log_error("WebSocket read failed", &e);
                        break;
                    }
                }
            }
        });

        self.state = SubscriptionState::Connected {
            subscription_id,
            writer: write,
            receiver: rx,
        };

        Ok(())
    }

    /// Waits for the next notification. `None` means the transport is gone.
    pub async fn next(&mut self) -> Option<LogNotification> {
        match &mut self.state {
            SubscriptionState::Connected { receiver, .. } => receiver.recv().await,
            SubscriptionState::Disconnected => None,
        }
    }

    /// Sends `logsUnsubscribe` and closes the socket.
    ///
    /// # Errors
    ///
    /// Returns [`GoalSyncError::RpcError`] if the unsubscribe frame cannot be
    /// written; the subscription is considered closed either way.
    pub async fn unsubscribe(&mut self) -> Result<()> {
        let state = std::mem::replace(&mut self.state, SubscriptionState::Disconnected);
        let SubscriptionState::Connected {
            subscription_id,
            mut writer,
            ..
        } = state
        else {
            return Ok(());
        };

        let request = json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "logsUnsubscribe",
            "params": [subscription_id]
        });

        writer.send(Message::Text(request.to_string())).await?;
        writer.close().await?;

        logging::log(
            LogLevel::Info,
            &format!("WebSocket unsubscribed (ID: {subscription_id})"),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_subscription_creation() {
        let ws_url = "ws://127.0.0.1:8900";
        let program_id = Pubkey::new_unique();

        let subscription = LogSubscription::new(ws_url, program_id);

        assert_eq!(subscription.ws_url, ws_url);
        assert_eq!(subscription.program_id, program_id);
        assert!(matches!(subscription.state, SubscriptionState::Disconnected));
    }

    #[test]
    fn test_parse_notification() {
        let frame = json!({
            "jsonrpc": "2.0",
            "method": "logsNotification",
            "params": {
                "result": {
                    "context": { "slot": 5208469 },
                    "value": {
                        "signature": "5h6xBEauJ3PK6SWCZ1PGjBvj8vDdWG3KpwATGy1ARAXFSDwt8GFXM7W5Ncn16wmqokgpiKRLuS83KUxyZyv2sUYv",
                        "err": null,
                        "logs": ["Program 11111111111111111111111111111111 invoke [1]"]
                    }
                },
                "subscription": 24040
            }
        });

        let parsed = parse_notification(&frame.to_string()).unwrap();
        assert_eq!(parsed.slot, 5_208_469);
        assert!(!parsed.failed);
        assert_eq!(parsed.logs.len(), 1);
    }

    #[test]
    fn test_parse_notification_marks_failures() {
        let frame = json!({
            "params": {
                "result": {
                    "context": { "slot": 1 },
                    "value": {
                        "signature": "sig",
                        "err": { "InstructionError": [0, { "Custom": 1 }] },
                        "logs": []
                    }
                }
            }
        });

        assert!(parse_notification(&frame.to_string()).unwrap().failed);
    }

    #[test]
    fn test_subscription_ack_is_not_a_notification() {
        let ack = json!({ "jsonrpc": "2.0", "result": 23784, "id": 1 });
        assert!(parse_notification(&ack.to_string()).is_none());
    }

    #[tokio::test]
    async fn test_next_on_disconnected_returns_none() {
        let mut subscription = LogSubscription::new("ws://127.0.0.1:1", Pubkey::new_unique());
        assert!(subscription.next().await.is_none());
        assert!(subscription.unsubscribe().await.is_ok());
    }
}
