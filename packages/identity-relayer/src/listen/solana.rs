//! RPC access to the listen destination chain.

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::commitment_config::{CommitmentConfig, CommitmentLevel};
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use std::time::Duration;
use tracing::debug;

/// The destination chain operations the listen path needs.
#[async_trait::async_trait]
pub trait ListenChain: Send + Sync {
    /// Unix time of the most recent finalized block.
    async fn finalized_timestamp(&self) -> Result<i64, crate::Error>;

    async fn latest_blockhash(&self) -> Result<Hash, crate::Error>;

    /// Broadcast a signed transaction without preflight.
    async fn send_transaction(&self, tx: &VersionedTransaction) -> Result<Signature, crate::Error>;
}

pub struct SolanaRpcClient {
    client: RpcClient,
}

impl SolanaRpcClient {
    pub fn new(url: &str) -> Self {
        Self {
            client: RpcClient::new_with_timeout_and_commitment(
                url.to_string(),
                Duration::from_secs(15),
                CommitmentConfig::confirmed(),
            ),
        }
    }
}

#[async_trait::async_trait]
impl ListenChain for SolanaRpcClient {
    async fn finalized_timestamp(&self) -> Result<i64, crate::Error> {
        let slot = self
            .client
            .get_slot_with_commitment(CommitmentConfig::finalized())
            .await
            .map_err(|e| crate::Error::Rpc(format!("getSlot: {e}")))?;
        debug!(slot, "Finalized slot");
        self.client
            .get_block_time(slot)
            .await
            .map_err(|e| crate::Error::Rpc(format!("getBlockTime {slot}: {e}")))
    }

    async fn latest_blockhash(&self) -> Result<Hash, crate::Error> {
        self.client
            .get_latest_blockhash()
            .await
            .map_err(|e| crate::Error::Rpc(format!("getLatestBlockhash: {e}")))
    }

    async fn send_transaction(&self, tx: &VersionedTransaction) -> Result<Signature, crate::Error> {
        let config = RpcSendTransactionConfig {
            skip_preflight: true,
            preflight_commitment: Some(CommitmentLevel::Processed),
            max_retries: Some(0),
            ..RpcSendTransactionConfig::default()
        };
        self.client
            .send_transaction_with_config(tx, config)
            .await
            .map_err(|e| crate::Error::Submission(format!("sendTransaction: {e}")))
    }
}
