//! Response types for the relayer API.

use crate::relay::RelayReceipt;
use alloy::primitives::B256;
use serde::Serialize;

/// Response from `POST /relay`.
#[derive(Serialize)]
pub struct RelayResponse {
    pub success: bool,
    pub receipt: RelayReceipt,
}

/// Response from `POST /wormhole_relay`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WormholeResponse {
    pub success: bool,
    pub id: String,
    pub transfer_tx_hash: Option<B256>,
    pub phase: &'static str,
}

/// Response from `POST /tracks/{id}/listen`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenResponse {
    pub success: bool,
    pub sol_tx_signature: String,
}

/// Response from the health endpoint.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub requests: u64,
    pub wallets: usize,
    pub eth_wallets: usize,
    pub pending_transfers: usize,
    pub listen_enabled: bool,
    pub rpc: Vec<RpcHealth>,
}

#[derive(Serialize)]
pub struct RpcHealth {
    pub chain_id: u64,
    pub active_rpc: String,
    pub failovers: u64,
    pub status: &'static str,
}
