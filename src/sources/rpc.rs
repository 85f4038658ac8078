//! JSON-RPC chain client backed by `solana-client`.

use async_trait::async_trait;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcBlockConfig;
use solana_client::rpc_request::RpcError;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::message::Message;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::system_instruction;
use solana_sdk::transaction::Transaction;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{EncodedTransaction, TransactionDetails, UiTransactionEncoding};
use std::str::FromStr;

use super::{ChainClient, goal_address};
use crate::common::error::{GoalSyncError, Result};
use crate::core::decoder;
use crate::core::goal_hash::GoalKey;
use crate::types::{GoalAccount, OnChainGoal, ProgramLog};

/// `getBlock` error codes for slots that were skipped by the leader.
const SKIPPED_SLOT_CODES: [i64; 2] = [-32007, -32009];

/// Chain client for one Solana RPC endpoint.
pub struct RpcChainClient {
    client: RpcClient,
}

impl RpcChainClient {
    /// Creates a client at `confirmed` commitment.
    #[must_use]
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self::with_commitment(rpc_url, CommitmentConfig::confirmed())
    }

    #[must_use]
    pub fn with_commitment(rpc_url: impl Into<String>, commitment: CommitmentConfig) -> Self {
        Self {
            client: RpcClient::new_with_commitment(rpc_url.into(), commitment),
        }
    }

    async fn latest_blockhash(&self) -> Result<solana_sdk::hash::Hash> {
        Ok(self.client.get_latest_blockhash().await?)
    }
}

fn parse_pubkey(value: &str) -> Result<Pubkey> {
    Pubkey::from_str(value)
        .map_err(|e| GoalSyncError::DecodingError(format!("invalid address '{value}': {e}")))
}

fn keypair_from_secret(secret_key: &str) -> Result<Keypair> {
    let bytes = bs58::decode(secret_key.trim())
        .into_vec()
        .map_err(|e| GoalSyncError::TransactionError(format!("invalid secret key encoding: {e}")))?;
    Keypair::from_bytes(&bytes)
        .map_err(|e| GoalSyncError::TransactionError(format!("invalid secret key: {e}")))
}

fn is_skipped_slot(err: &ClientError) -> bool {
    matches!(
        err.kind(),
        ClientErrorKind::RpcError(RpcError::RpcResponseError { code, .. })
            if SKIPPED_SLOT_CODES.contains(code)
    )
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn current_height(&self) -> Result<u64> {
        Ok(self.client.get_slot().await?)
    }

    async fn program_logs(&self, program_id: &Pubkey, height: u64) -> Result<Vec<ProgramLog>> {
        let config = RpcBlockConfig {
            encoding: Some(UiTransactionEncoding::Json),
            transaction_details: Some(TransactionDetails::Full),
            rewards: Some(false),
            commitment: Some(self.client.commitment()),
            max_supported_transaction_version: Some(0),
        };

        let block = match self.client.get_block_with_config(height, config).await {
            Ok(block) => block,
            Err(e) if is_skipped_slot(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let program = program_id.to_string();
        let mut out = Vec::new();

        for tx in block.transactions.unwrap_or_default() {
            let Some(meta) = tx.meta else {
                continue;
            };
            // Events from failed transactions were rolled back.
            if meta.err.is_some() {
                continue;
            }
            let OptionSerializer::Some(logs) = meta.log_messages else {
                continue;
            };
            let signature = match &tx.transaction {
                EncodedTransaction::Json(ui) => ui.signatures.first().cloned().unwrap_or_default(),
                _ => String::new(),
            };
            out.extend(decoder::program_logs(&program, height, &signature, &logs));
        }

        Ok(out)
    }

    async fn goal_record(&self, program_id: &Pubkey, key: &GoalKey) -> Result<OnChainGoal> {
        let address = goal_address(program_id, key);
        let response = self
            .client
            .get_account_with_commitment(&address, self.client.commitment())
            .await?;

        match response.value {
            Some(account) => Ok(OnChainGoal::from(&GoalAccount::decode(&account.data)?)),
            None => Ok(OnChainGoal::missing()),
        }
    }

    async fn balance(&self, address: &str) -> Result<u64> {
        Ok(self.client.get_balance(&parse_pubkey(address)?).await?)
    }

    async fn estimate_transfer_fee(&self, from: &str, to: &str, lamports: u64) -> Result<u64> {
        let from = parse_pubkey(from)?;
        let to = parse_pubkey(to)?;
        let blockhash = self.latest_blockhash().await?;
        let message = Message::new_with_blockhash(
            &[system_instruction::transfer(&from, &to, lamports)],
            Some(&from),
            &blockhash,
        );
        Ok(self.client.get_fee_for_message(&message).await?)
    }

    async fn send_transfer(
        &self,
        from: &str,
        secret_key: &str,
        to: &str,
        lamports: u64,
    ) -> Result<String> {
        let keypair = keypair_from_secret(secret_key)?;
        let payer = keypair.pubkey();
        if payer != parse_pubkey(from)? {
            return Err(GoalSyncError::TransactionError(format!(
                "secret key does not belong to {from}"
            )));
        }

        let to = parse_pubkey(to)?;
        let blockhash = self.latest_blockhash().await?;
        let transaction = Transaction::new_signed_with_payer(
            &[system_instruction::transfer(&payer, &to, lamports)],
            Some(&payer),
            &[&keypair],
            blockhash,
        );

        let signature = self
            .client
            .send_and_confirm_transaction(&transaction)
            .await
            .map_err(|e| GoalSyncError::TransactionError(e.to_string()))?;

        Ok(signature.to_string())
    }

    fn source_name(&self) -> &'static str {
        "RPC"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_from_secret() {
        let keypair = Keypair::new();
        let encoded = bs58::encode(keypair.to_bytes()).into_string();
        let decoded = keypair_from_secret(&encoded).unwrap();
        assert_eq!(decoded.pubkey(), keypair.pubkey());

        assert!(matches!(
            keypair_from_secret("not-base58-0OIl"),
            Err(GoalSyncError::TransactionError(_))
        ));
    }

    #[test]
    fn test_parse_pubkey_rejects_garbage() {
        assert!(parse_pubkey("11111111111111111111111111111111").is_ok());
        assert!(parse_pubkey("nope").is_err());
    }
}
