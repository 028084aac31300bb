//! Attest-and-redeem step against the guardian network and the redemption service.

use crate::rpc::{ChainLog, EvmChain};
use alloy::primitives::{Address, B256};
use alloy::sol;
use alloy::sol_types::SolEvent;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Wormhole chain id of Ethereum.
const ETH_WORMHOLE_CHAIN: u16 = 2;

sol! {
    event LogMessagePublished(
        address indexed sender,
        uint64 sequence,
        uint32 nonce,
        bytes payload,
        uint8 consistencyLevel
    );
}

/// Phase 3 of a wormhole transfer.
#[async_trait::async_trait]
pub trait AttestationStep: Send + Sync {
    /// Obtain the signed VAA for `transfer_tx` and redeem it on the
    /// destination chain. Returns the redemption transaction signature.
    async fn attest_and_redeem(&self, transfer_tx: B256) -> Result<String, crate::Error>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedVaa {
    vaa_bytes: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Redemption {
    transaction_signature: String,
}

pub struct BridgeAttestation {
    chain: Arc<dyn EvmChain>,
    http: reqwest::Client,
    guardian_hosts: Vec<String>,
    next_host: AtomicUsize,
    core_bridge: Address,
    emitter: String,
    redeem_url: String,
}

impl BridgeAttestation {
    pub fn new(
        chain: Arc<dyn EvmChain>,
        config: &crate::config::WormholeConfig,
    ) -> Result<Self, crate::Error> {
        if config.guardian_hosts.is_empty() {
            return Err(crate::Error::Config("wormhole.guardian_hosts is empty".into()));
        }
        let parse = |what: &str, value: &str| {
            Address::from_str(value.trim())
                .map_err(|e| crate::Error::Config(format!("Invalid {what} {value}: {e}")))
        };
        let core_bridge = parse("eth_bridge_address", &config.eth_bridge_address)?;
        let token_bridge = parse("eth_token_bridge_address", &config.eth_token_bridge_address)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| crate::Error::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            chain,
            http,
            guardian_hosts: config
                .guardian_hosts
                .iter()
                .map(|h| h.trim_end_matches('/').to_string())
                .collect(),
            next_host: AtomicUsize::new(0),
            core_bridge,
            emitter: emitter_address(token_bridge),
            redeem_url: config.redeem_url.clone(),
        })
    }

    fn host(&self) -> &str {
        let i = self.next_host.fetch_add(1, Ordering::Relaxed) % self.guardian_hosts.len();
        &self.guardian_hosts[i]
    }

    async fn fetch_vaa(&self, sequence: u64) -> Result<String, crate::Error> {
        let url = format!(
            "{}/v1/signed_vaa/{ETH_WORMHOLE_CHAIN}/{}/{sequence}",
            self.host(),
            self.emitter
        );
        debug!(url = %url, "Fetching signed VAA");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| crate::Error::attestation(format!("guardian unreachable: {e}"), true))?;
        if !resp.status().is_success() {
            // 404 until the guardians have signed.
            return Err(crate::Error::attestation(
                format!("VAA for sequence {sequence} not ready: HTTP {}", resp.status()),
                true,
            ));
        }
        let vaa: SignedVaa = resp
            .json()
            .await
            .map_err(|e| crate::Error::attestation(format!("bad guardian response: {e}"), true))?;
        Ok(vaa.vaa_bytes)
    }

    async fn redeem(&self, vaa_bytes: String) -> Result<String, crate::Error> {
        let resp = self
            .http
            .post(&self.redeem_url)
            .json(&serde_json::json!({ "vaaBytes": vaa_bytes }))
            .send()
            .await
            .map_err(|e| crate::Error::attestation(format!("redeem service unreachable: {e}"), true))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(crate::Error::attestation(
                format!("redeem failed: HTTP {status}: {body}"),
                status.is_server_error(),
            ));
        }
        let redemption: Redemption = resp
            .json()
            .await
            .map_err(|e| crate::Error::attestation(format!("bad redeem response: {e}"), true))?;
        Ok(redemption.transaction_signature)
    }
}

#[async_trait::async_trait]
impl AttestationStep for BridgeAttestation {
    async fn attest_and_redeem(&self, transfer_tx: B256) -> Result<String, crate::Error> {
        let logs = self.chain.receipt_logs(transfer_tx).await?;
        let sequence = published_sequence(&logs, self.core_bridge)?;
        let vaa = self.fetch_vaa(sequence).await?;
        self.redeem(vaa).await
    }
}

/// Sequence number of the core bridge message published by the transfer.
pub(crate) fn published_sequence(logs: &[ChainLog], core_bridge: Address) -> Result<u64, crate::Error> {
    let log = logs
        .iter()
        .find(|l| {
            l.address == core_bridge
                && l.topics.first() == Some(&LogMessagePublished::SIGNATURE_HASH)
        })
        .ok_or_else(|| crate::Error::attestation("no LogMessagePublished in receipt", false))?;
    let (sequence, ..) = LogMessagePublished::abi_decode_data(&log.data, true)
        .map_err(|e| crate::Error::attestation(format!("malformed LogMessagePublished: {e}"), false))?;
    Ok(sequence)
}

/// 32-byte left-padded hex of an EVM address, as guardians index emitters.
pub(crate) fn emitter_address(address: Address) -> String {
    hex::encode(B256::left_padding_from(address.as_slice()))
}
