//! Shared harness: an app wired to in-memory chains and a memory store.

use alloy::primitives::{eip191_hash_message, Address, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::{SolCall, SolStruct};
use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use identity_relayer::action::schema::{self, manageEntityCall};
use identity_relayer::action::{address_of_secret, parse_secret_key, sign_digest};
use identity_relayer::config::WormholeConfig;
use identity_relayer::listen::{
    fee_payer_from_bytes, ListenChain, ListenInstructionBuilder, ListenService,
};
use identity_relayer::lock::WalletLockManager;
use identity_relayer::rate_limit::DynamicRateLimiter;
use identity_relayer::relay::{RelayOrchestrator, RelayService};
use identity_relayer::rpc::{ChainLog, EvmChain, TxOutcome, TxParams};
use identity_relayer::store::{CoordinationStore, MemoryStore};
use identity_relayer::wallet::{RelayerWallet, WalletPool};
use identity_relayer::wormhole::{AlertSink, AttestationStep, WormholeTransferOrchestrator};
use identity_relayer::{create_router, AppState, Config};
use serde_json::Value;
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

pub const LISTEN_PROGRAM_ID: &str = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin";
pub const LISTEN_VALID_SIGNER: &str = "5Q544fKrFoe6tsEbD7S8EmxGTJYAKtTVhAW5Q5pge4j1";
pub const USER_KEY: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
pub const OTHER_KEY: &str = "5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a";
pub const CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
pub const CHAIN_ID: u64 = 1_056_800;

/// EVM chain that mines every submission immediately.
pub struct TestChain {
    chain_id: u64,
    pub submissions: Mutex<Vec<TxParams>>,
    next: AtomicU64,
}

impl TestChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            submissions: Mutex::new(Vec::new()),
            next: AtomicU64::new(1),
        }
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl EvmChain for TestChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn gas_price(&self) -> Result<u128, identity_relayer::Error> {
        Ok(1_000_000_000)
    }

    async fn estimate_gas(
        &self,
        _from: Address,
        _tx: &TxParams,
    ) -> Result<u64, identity_relayer::Error> {
        Ok(200_000)
    }

    async fn submit(
        &self,
        _wallet: &RelayerWallet,
        tx: TxParams,
    ) -> Result<TxOutcome, identity_relayer::Error> {
        self.submissions.lock().unwrap().push(tx);
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(TxOutcome {
            tx_hash: B256::left_padding_from(&n.to_be_bytes()),
            block_number: Some(n),
        })
    }

    async fn receipt_logs(&self, _tx_hash: B256) -> Result<Vec<ChainLog>, identity_relayer::Error> {
        Ok(Vec::new())
    }
}

/// Redeems every transfer on the first try.
pub struct InstantAttestation;

#[async_trait::async_trait]
impl AttestationStep for InstantAttestation {
    async fn attest_and_redeem(&self, transfer_tx: B256) -> Result<String, identity_relayer::Error> {
        Ok(format!("redeemed-{transfer_tx:x}"))
    }
}

pub struct QuietAlerts;

#[async_trait::async_trait]
impl AlertSink for QuietAlerts {
    async fn send(&self, _text: &str) -> Result<(), identity_relayer::Error> {
        Ok(())
    }
}

pub struct TestListenChain {
    pub sent: Mutex<Vec<VersionedTransaction>>,
}

#[async_trait::async_trait]
impl ListenChain for TestListenChain {
    async fn finalized_timestamp(&self) -> Result<i64, identity_relayer::Error> {
        Ok(1_700_000_000)
    }

    async fn latest_blockhash(&self) -> Result<Hash, identity_relayer::Error> {
        Ok(Hash::new_from_array([7; 32]))
    }

    async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<Signature, identity_relayer::Error> {
        self.sent.lock().unwrap().push(tx.clone());
        Ok(tx.signatures[0])
    }
}

/// Handles into a running test app.
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub data_chain: Arc<TestChain>,
    pub eth_chain: Arc<TestChain>,
    pub listen_chain: Option<Arc<TestListenChain>>,
}

fn wallet_pool(n: usize) -> Arc<WalletPool> {
    Arc::new(WalletPool::new(
        (0..n)
            .map(|_| RelayerWallet::from_signer(PrivateKeySigner::random()))
            .collect(),
    ))
}

pub struct TestAppBuilder {
    config: Config,
    listen: bool,
}

impl TestAppBuilder {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.wormhole = WormholeConfig {
            base_delay_ms: 10,
            ..WormholeConfig::default()
        };
        config.listen.program_id = Some(LISTEN_PROGRAM_ID.into());
        config.listen.valid_signer = Some(LISTEN_VALID_SIGNER.into());
        Self {
            config,
            listen: true,
        }
    }

    pub fn config(mut self, f: impl FnOnce(&mut Config)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn without_listen(mut self) -> Self {
        self.listen = false;
        self
    }

    pub fn build(self) -> Result<TestApp> {
        let config = self.config;
        let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
        let locks = Arc::new(WalletLockManager::from_config(store.clone(), &config.lock));

        let data_chain = Arc::new(TestChain::new(CHAIN_ID));
        let relayer = Arc::new(RelayOrchestrator::new(
            data_chain.clone(),
            wallet_pool(2),
            locks.clone(),
            config.data_chain.lock_prefix.clone(),
        ));
        let limiter = Arc::new(DynamicRateLimiter::new(
            store.clone(),
            None,
            config.rate_limits.clone(),
        ));
        let relay = RelayService::new(relayer.clone(), limiter, store.clone(), &config)?;

        let eth_chain = Arc::new(TestChain::new(1));
        let eth_relayer = Arc::new(RelayOrchestrator::new(
            eth_chain.clone(),
            wallet_pool(1),
            locks,
            config.eth_chain.lock_prefix.clone(),
        ));
        let wormhole = Arc::new(WormholeTransferOrchestrator::new(
            eth_relayer,
            store.clone(),
            Arc::new(InstantAttestation),
            Arc::new(QuietAlerts),
            &config.wormhole,
        ));

        let (listen, listen_chain) = if self.listen {
            let chain = Arc::new(TestListenChain {
                sent: Mutex::new(Vec::new()),
            });
            let builder = ListenInstructionBuilder::new(
                chain.clone(),
                &config.listen,
                parse_secret_key(USER_KEY)?,
                vec![fee_payer_from_bytes(&[3; 32])?],
            )?;
            (
                Some(ListenService::new(builder, chain.clone(), store.clone())),
                Some(chain),
            )
        } else {
            (None, None)
        };

        let state = Arc::new(AppState::from_parts(
            config,
            store,
            relayer,
            relay,
            Some(wormhole),
            listen,
        ));
        Ok(TestApp {
            router: create_router(state.clone()),
            state,
            data_chain,
            eth_chain,
            listen_chain,
        })
    }
}

/// Send one request and return the status plus the JSON body (or `Null`).
pub async fn send(router: &Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = router.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    Ok((status, body))
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

pub fn sender_of(key: &str) -> String {
    format!("{:#x}", address_of_secret(&parse_secret_key(key).unwrap()))
}

/// ABI-encoded `manageEntity` call whose subject signature is made with `key`.
pub fn manage_entity_calldata(key: &str, action: &str, nonce: u8) -> String {
    let secret = parse_secret_key(key).unwrap();
    let contract: Address = CONTRACT.parse().unwrap();
    let message = schema::ManageEntity {
        userId: U256::from(1),
        entityType: "Track".into(),
        entityId: U256::from(2),
        action: action.into(),
        metadata: String::new(),
        nonce: B256::repeat_byte(nonce),
    };
    let digest = message.eip712_signing_hash(&schema::entity_manager_domain(CHAIN_ID, contract));
    let data = manageEntityCall {
        _userId: U256::from(1),
        _entityType: "Track".into(),
        _entityId: U256::from(2),
        _action: action.into(),
        _metadata: String::new(),
        _nonce: B256::repeat_byte(nonce),
        _subjectSig: sign_digest(&secret, digest).to_vec().into(),
    }
    .abi_encode();
    format!("0x{}", hex::encode(data))
}

pub fn relay_body(key: &str, action: &str, nonce: u8) -> Value {
    serde_json::json!({
        "contractRegistryKey": "EntityManager",
        "contractAddress": CONTRACT,
        "encodedABI": manage_entity_calldata(key, action, nonce),
        "senderAddress": sender_of(key),
    })
}

/// `POST /relay` with the personal-sign header pair made with `auth_key`.
pub fn relay_request(body: &Value, auth_key: Option<&str>) -> Request<Body> {
    let mut builder = Request::post("/relay").header("content-type", "application/json");
    if let Some(key) = auth_key {
        let secret = parse_secret_key(key).unwrap();
        let message = "Click sign to authenticate with identity service: 1700000000";
        let sig = sign_digest(&secret, eip191_hash_message(message));
        builder = builder
            .header("Encoded-Data-Message", message)
            .header("Encoded-Data-Signature", format!("0x{}", hex::encode(sig)));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
