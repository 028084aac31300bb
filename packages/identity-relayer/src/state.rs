//! Application state shared across handlers.

use crate::config::Config;
use crate::discovery::DiscoveryClient;
use crate::key_store::{load_secrets, RelayerSecrets};
use crate::listen::{ListenInstructionBuilder, ListenService, SolanaRpcClient};
use crate::lock::WalletLockManager;
use crate::rate_limit::{DynamicRateLimiter, UserDirectory};
use crate::relay::{RelayOrchestrator, RelayService};
use crate::rpc::EvmRpcClient;
use crate::store::{CoordinationStore, MemoryStore, RedisStore};
use crate::wallet::WalletPool;
use crate::wormhole::{
    AlertSink, BridgeAttestation, LogAlertSink, WebhookAlertSink, WormholeTransferOrchestrator,
};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn CoordinationStore>,
    /// Data chain relaying.
    pub relayer: Arc<RelayOrchestrator>,
    pub relay: RelayService,
    /// `None` when no guardians or ETH wallets are configured.
    pub wormhole: Option<Arc<WormholeTransferOrchestrator>>,
    /// `None` when the listen signer or fee payers are missing.
    pub listen: Option<ListenService>,
    pub eth_wallets: usize,
    pub rpc_clients: Vec<Arc<EvmRpcClient>>,
    pub start_time: Instant,
    pub request_count: AtomicU64,
}

impl AppState {
    /// Create application state from configuration.
    pub async fn new(config: Config) -> Result<Self, crate::Error> {
        let store: Arc<dyn CoordinationStore> = if config.redis_url.is_empty() {
            warn!("redis_url not set, using in-process store (single instance only)");
            Arc::new(MemoryStore::new())
        } else {
            Arc::new(RedisStore::connect(&config.redis_url).await?)
        };

        let secrets = load_secrets(&config)?;
        let locks = Arc::new(WalletLockManager::from_config(store.clone(), &config.lock));

        let data_rpc = Arc::new(EvmRpcClient::new(config.data_chain.clone())?);
        let data_wallets = WalletPool::from_secrets(&secrets.wallets)?;
        if data_wallets.is_empty() {
            warn!("No data chain relayer wallets loaded, /relay will fail");
        }
        let relayer = Arc::new(RelayOrchestrator::new(
            data_rpc.clone(),
            Arc::new(data_wallets),
            locks.clone(),
            config.data_chain.lock_prefix.clone(),
        ));

        let directory: Option<Arc<dyn UserDirectory>> = match config.discovery_url.as_deref() {
            Some(url) if !url.is_empty() => Some(Arc::new(DiscoveryClient::new(url)?)),
            _ => {
                warn!("discovery_url not set, owner tier is never granted");
                None
            }
        };
        let limiter = Arc::new(DynamicRateLimiter::new(
            store.clone(),
            directory,
            config.rate_limits.clone(),
        ));
        let relay = RelayService::new(relayer.clone(), limiter, store.clone(), &config)?;

        let eth_rpc = Arc::new(EvmRpcClient::new(config.eth_chain.clone())?);
        let eth_wallets = WalletPool::from_secrets(&secrets.eth_wallets)?;
        let eth_wallet_count = eth_wallets.len();
        let wormhole = if eth_wallets.is_empty() || config.wormhole.guardian_hosts.is_empty() {
            warn!("Wormhole transfers disabled: no ETH wallets or guardian hosts");
            None
        } else {
            let eth_relayer = Arc::new(RelayOrchestrator::new(
                eth_rpc.clone(),
                Arc::new(eth_wallets),
                locks.clone(),
                config.eth_chain.lock_prefix.clone(),
            ));
            let attestation = Arc::new(BridgeAttestation::new(eth_rpc.clone(), &config.wormhole)?);
            let alerts: Arc<dyn AlertSink> = match config.alert_webhook_url.as_deref() {
                Some(url) if !url.is_empty() => Arc::new(WebhookAlertSink::new(url)?),
                _ => Arc::new(LogAlertSink),
            };
            Some(Arc::new(WormholeTransferOrchestrator::new(
                eth_relayer,
                store.clone(),
                attestation,
                alerts,
                &config.wormhole,
            )))
        };

        let listen = listen_service(&config, &secrets, store.clone())?;

        info!(
            wallets = relayer.wallets().len(),
            eth_wallets = eth_wallet_count,
            wormhole = wormhole.is_some(),
            listen = listen.is_some(),
            "Relayer state initialized"
        );

        Ok(Self {
            config,
            store,
            relayer,
            relay,
            wormhole,
            listen,
            eth_wallets: eth_wallet_count,
            rpc_clients: vec![data_rpc, eth_rpc],
            start_time: Instant::now(),
            request_count: AtomicU64::new(0),
        })
    }

    /// Assemble state from already-built services. No RPC clients are
    /// attached, so health reports only wallets and transfers.
    pub fn from_parts(
        config: Config,
        store: Arc<dyn CoordinationStore>,
        relayer: Arc<RelayOrchestrator>,
        relay: RelayService,
        wormhole: Option<Arc<WormholeTransferOrchestrator>>,
        listen: Option<ListenService>,
    ) -> Self {
        Self {
            config,
            store,
            relayer,
            relay,
            wormhole,
            listen,
            eth_wallets: 0,
            rpc_clients: Vec::new(),
            start_time: Instant::now(),
            request_count: AtomicU64::new(0),
        }
    }
}

fn listen_service(
    config: &Config,
    secrets: &RelayerSecrets,
    store: Arc<dyn CoordinationStore>,
) -> Result<Option<ListenService>, crate::Error> {
    if secrets.listen_signer_key.is_none() || secrets.fee_payers.is_empty() {
        warn!("Listen relaying disabled: no valid signer key or fee payers");
        return Ok(None);
    }
    let chain = Arc::new(SolanaRpcClient::new(&config.listen.rpc_url));
    let builder = ListenInstructionBuilder::from_secrets(chain.clone(), &config.listen, secrets)?;
    Ok(Some(ListenService::new(builder, chain, store)))
}
