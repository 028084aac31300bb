//! Relayer configuration.
//!
//! Loaded by the binary from an optional `relayer.toml` and `RELAYER_*`
//! environment variables (`__` separates nested keys). Secrets live in the
//! key store, not here.

use serde::Deserialize;
use std::collections::HashMap;

/// Configuration for the relayer.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "defaults::bind_address")]
    pub bind_address: String,

    /// Redis URL for the shared coordination store. Empty = in-process store (dev only).
    #[serde(default)]
    pub redis_url: String,

    #[serde(default = "defaults::keys_path")]
    pub keys_path: String,

    /// Base64 AES-256 key. When set the key file is stored encrypted.
    #[serde(default)]
    pub keys_encryption_key: Option<String>,

    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// The wormhole endpoint outlives the normal request deadline.
    #[serde(default = "defaults::wormhole_timeout_secs")]
    pub wormhole_timeout_secs: u64,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default = "defaults::data_chain")]
    pub data_chain: ChainConfig,

    #[serde(default = "defaults::eth_chain")]
    pub eth_chain: ChainConfig,

    /// Contracts that relayed meta-transactions may target. Empty = any.
    #[serde(default)]
    pub allowed_contracts: Vec<String>,

    /// Senders allowed to reconfigure replica sets. Empty = any.
    #[serde(default)]
    pub replica_set_wallet_allowlist: Vec<String>,

    /// How long a relayed meta-transaction is remembered for deduplication.
    #[serde(default = "defaults::dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,
    /// Expiry of an in-flight relay claim. Renewed while the relay runs.
    #[serde(default = "defaults::dedup_claim_ttl_secs")]
    pub dedup_claim_ttl_secs: u64,

    #[serde(default)]
    pub discovery_url: Option<String>,

    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    #[serde(default)]
    pub wormhole: WormholeConfig,

    #[serde(default)]
    pub listen: ListenConfig,

    /// Slack-style webhook for terminal wormhole failures.
    #[serde(default)]
    pub alert_webhook_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: defaults::bind_address(),
            redis_url: String::new(),
            keys_path: defaults::keys_path(),
            keys_encryption_key: None,
            request_timeout_secs: defaults::request_timeout_secs(),
            wormhole_timeout_secs: defaults::wormhole_timeout_secs(),
            lock: LockConfig::default(),
            data_chain: defaults::data_chain(),
            eth_chain: defaults::eth_chain(),
            allowed_contracts: Vec::new(),
            replica_set_wallet_allowlist: Vec::new(),
            dedup_ttl_secs: defaults::dedup_ttl_secs(),
            dedup_claim_ttl_secs: defaults::dedup_claim_ttl_secs(),
            discovery_url: None,
            rate_limits: RateLimitConfig::default(),
            wormhole: WormholeConfig::default(),
            listen: ListenConfig::default(),
            alert_webhook_url: None,
        }
    }
}

/// Wallet lock timing.
#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    #[serde(default = "defaults::lock_poll_ms")]
    pub poll_ms: u64,
    /// A crashed holder's lease is reclaimable after this long.
    #[serde(default = "defaults::lock_lease_ms")]
    pub lease_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            poll_ms: defaults::lock_poll_ms(),
            lease_ms: defaults::lock_lease_ms(),
        }
    }
}

/// One EVM chain the relayer submits to.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "defaults::rpc_url")]
    pub rpc_url: String,
    #[serde(default = "defaults::rpc_url")]
    pub fallback_rpc_url: String,
    #[serde(default = "defaults::data_chain_id")]
    pub chain_id: u64,
    /// Prefix of the per-wallet lock key in the shared store.
    #[serde(default = "defaults::data_lock_prefix")]
    pub lock_prefix: String,
    #[serde(default = "defaults::min_gas_price")]
    pub min_gas_price: u128,
    #[serde(default = "defaults::high_gas_price")]
    pub high_gas_price: u128,
    #[serde(default = "defaults::default_gas_limit")]
    pub default_gas_limit: u64,
    /// Give up waiting for a broadcast transaction's receipt after this long.
    #[serde(default = "defaults::receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
}

/// Caps per tier for one action key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TierLimits {
    pub owner: u64,
    pub allowlist: u64,
    pub app: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "defaults::rate_limit_window_secs")]
    pub window_secs: u64,
    /// Application wallets granted the allowlist tier.
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default = "defaults::tier_limits")]
    pub default: TierLimits,
    /// Overrides keyed by composite action key, e.g. `CreateTrack`.
    #[serde(default = "defaults::action_limits")]
    pub actions: HashMap<String, TierLimits>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: defaults::rate_limit_window_secs(),
            allowlist: Vec::new(),
            default: defaults::tier_limits(),
            actions: defaults::action_limits(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WormholeConfig {
    /// Guardian REST hosts, tried round robin.
    #[serde(default)]
    pub guardian_hosts: Vec<String>,
    /// Core bridge on the ETH chain (emits `LogMessagePublished`).
    #[serde(default)]
    pub eth_bridge_address: String,
    /// Token bridge on the ETH chain (the VAA emitter).
    #[serde(default)]
    pub eth_token_bridge_address: String,
    /// Service that posts the VAA and redeems on the destination chain.
    #[serde(default)]
    pub redeem_url: String,
    #[serde(default = "defaults::attestation_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "defaults::attestation_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for WormholeConfig {
    fn default() -> Self {
        Self {
            guardian_hosts: Vec::new(),
            eth_bridge_address: String::new(),
            eth_token_bridge_address: String::new(),
            redeem_url: String::new(),
            max_attempts: defaults::attestation_max_attempts(),
            base_delay_ms: defaults::attestation_base_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "defaults::solana_rpc_url")]
    pub rpc_url: String,
    /// Track listen count program (base58). Listens are disabled until set.
    #[serde(default)]
    pub program_id: Option<String>,
    /// Valid signer account registered with the program (base58).
    #[serde(default)]
    pub valid_signer: Option<String>,
    #[serde(default = "defaults::timestamp_ttl_secs")]
    pub timestamp_ttl_secs: u64,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            rpc_url: defaults::solana_rpc_url(),
            program_id: None,
            valid_signer: None,
            timestamp_ttl_secs: defaults::timestamp_ttl_secs(),
        }
    }
}

mod defaults {
    use super::{ChainConfig, TierLimits};
    use std::collections::HashMap;

    pub fn bind_address() -> String {
        "0.0.0.0:7000".into()
    }

    pub fn keys_path() -> String {
        "./account_keys/relayer-wallets.json".into()
    }

    pub fn request_timeout_secs() -> u64 {
        60
    }

    pub fn wormhole_timeout_secs() -> u64 {
        35 * 60
    }

    pub fn lock_poll_ms() -> u64 {
        200
    }

    pub fn lock_lease_ms() -> u64 {
        5 * 60 * 1000
    }

    pub fn rpc_url() -> String {
        "http://127.0.0.1:8545".into()
    }

    pub fn data_chain_id() -> u64 {
        1_056_800
    }

    pub fn data_lock_prefix() -> String {
        "POA_RELAYER_WALLET".into()
    }

    /// 10 gwei.
    pub fn min_gas_price() -> u128 {
        10_000_000_000
    }

    /// 25 gwei, 2.5 * min.
    pub fn high_gas_price() -> u128 {
        25_000_000_000
    }

    /// 0xf7100
    pub fn default_gas_limit() -> u64 {
        1_011_968
    }

    pub fn receipt_timeout_secs() -> u64 {
        120
    }

    pub fn data_chain() -> ChainConfig {
        ChainConfig {
            rpc_url: rpc_url(),
            fallback_rpc_url: rpc_url(),
            chain_id: data_chain_id(),
            lock_prefix: data_lock_prefix(),
            min_gas_price: min_gas_price(),
            high_gas_price: high_gas_price(),
            default_gas_limit: default_gas_limit(),
            receipt_timeout_secs: receipt_timeout_secs(),
        }
    }

    pub fn eth_chain() -> ChainConfig {
        ChainConfig {
            rpc_url: "http://127.0.0.1:8546".into(),
            fallback_rpc_url: "http://127.0.0.1:8546".into(),
            chain_id: 1,
            lock_prefix: "ETH_RELAYER_WALLET".into(),
            min_gas_price: min_gas_price(),
            high_gas_price: 250_000_000_000,
            default_gas_limit: default_gas_limit(),
            receipt_timeout_secs: 10 * 60,
        }
    }

    pub fn dedup_ttl_secs() -> u64 {
        24 * 60 * 60
    }

    pub fn dedup_claim_ttl_secs() -> u64 {
        30
    }

    pub fn rate_limit_window_secs() -> u64 {
        60 * 60
    }

    pub fn tier_limits() -> TierLimits {
        TierLimits {
            owner: 1000,
            allowlist: 5000,
            app: 100,
        }
    }

    pub fn action_limits() -> HashMap<String, TierLimits> {
        let mut limits = HashMap::new();
        limits.insert(
            "CreateUser".to_string(),
            TierLimits {
                owner: 10,
                allowlist: 1000,
                app: 10,
            },
        );
        limits.insert(
            "UpdateUserReplicaSet".to_string(),
            TierLimits {
                owner: 10,
                allowlist: 100,
                app: 5,
            },
        );
        limits
    }

    pub fn attestation_max_attempts() -> u32 {
        5
    }

    pub fn attestation_base_delay_ms() -> u64 {
        100
    }

    pub fn solana_rpc_url() -> String {
        "https://api.mainnet-beta.solana.com".into()
    }

    pub fn timestamp_ttl_secs() -> u64 {
        30
    }
}
