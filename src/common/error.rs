//! Error types for goal-sync.

use thiserror::Error;

/// Errors produced by the indexer, the job queue and the payout services.
#[derive(Debug, Error)]
pub enum GoalSyncError {
    /// Database query or connection failure.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// Remote RPC failure (HTTP or websocket).
    #[error("RPC error: {0}")]
    RpcError(String),

    /// Payload or account data could not be decoded.
    #[error("Decoding error: {0}")]
    DecodingError(String),

    /// A program log carried a discriminator that matches no known event.
    #[error("Unknown event discriminator: {0}")]
    UnknownEvent(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON (de)serialization failure.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Outbound HTTP failure (price API).
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Transaction could not be built, signed or submitted.
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// No chain client or price mapping exists for the network.
    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    /// A referenced row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GoalSyncError>;

impl From<solana_client::client_error::ClientError> for GoalSyncError {
    fn from(err: solana_client::client_error::ClientError) -> Self {
        Self::RpcError(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for GoalSyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::RpcError(format!("WebSocket error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = GoalSyncError::UnsupportedNetwork("LOCALNET".to_string());
        assert_eq!(err.to_string(), "Unsupported network: LOCALNET");

        let err = GoalSyncError::RpcError("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_serde_error_converts() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: GoalSyncError = parse.unwrap_err().into();
        assert!(matches!(err, GoalSyncError::SerializationError(_)));
    }
}
