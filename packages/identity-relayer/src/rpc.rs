//! EVM RPC client with primary → fallback failover and circuit breaker.

use crate::config::ChainConfig;
use crate::metrics::METRICS;
use crate::wallet::RelayerWallet;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{TransactionReceipt, TransactionRequest};
use alloy::transports::http::{Client, Http};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

type HttpProvider = RootProvider<Http<Client>>;

/// Cached gas price TTL.
const GAS_PRICE_TTL_SECS: u64 = 30;

const CIRCUIT_BREAKER_THRESHOLD: u64 = 5;
const CIRCUIT_BREAKER_WINDOW_MS: u64 = 30_000;

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

struct CircuitState {
    failures: u64,
    last_failure_ms: u64,
    open: bool,
}

/// A transaction to sign and submit from a relayer wallet.
#[derive(Debug, Clone)]
pub struct TxParams {
    pub to: Address,
    pub data: Bytes,
    /// `None` uses the chain's default gas limit.
    pub gas_limit: Option<u64>,
    pub value: U256,
}

impl TxParams {
    pub fn call(to: Address, data: Bytes, gas_limit: Option<u64>) -> Self {
        Self {
            to,
            data,
            gas_limit,
            value: U256::ZERO,
        }
    }
}

/// A mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
}

/// One event log of a mined transaction.
#[derive(Debug, Clone)]
pub struct ChainLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// The operations the relayer needs from an EVM chain.
#[async_trait::async_trait]
pub trait EvmChain: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Node gas price clamped into the configured band.
    async fn gas_price(&self) -> Result<u128, crate::Error>;

    async fn estimate_gas(&self, from: Address, tx: &TxParams) -> Result<u64, crate::Error>;

    /// Sign with `wallet`, broadcast and wait for the receipt. A reverted
    /// transaction is a submission error.
    async fn submit(&self, wallet: &RelayerWallet, tx: TxParams) -> Result<TxOutcome, crate::Error>;

    async fn receipt_logs(&self, tx_hash: B256) -> Result<Vec<ChainLog>, crate::Error>;
}

/// A broadcast rejected because the node already holds this exact
/// transaction, e.g. when the fallback sees what the primary accepted.
pub fn is_already_known(error: &str) -> bool {
    let error = error.to_ascii_lowercase();
    error.contains("already known")
        || error.contains("known transaction")
        || error.contains("already imported")
        || error.contains("already exists")
}

/// Zero or below `min` → `min`; above `high` → `high`.
pub fn clamp_gas_price(price: u128, min: u128, high: u128) -> u128 {
    if price > high {
        high
    } else if price < min {
        min
    } else {
        price
    }
}

/// RPC client for one EVM chain.
pub struct EvmRpcClient {
    primary: HttpProvider,
    fallback: HttpProvider,
    primary_url: String,
    fallback_url: String,
    chain: ChainConfig,
    circuit: Mutex<CircuitState>,
    total_failovers: AtomicU64,
    cached_gas_price: RwLock<Option<(u128, Instant)>>,
}

impl EvmRpcClient {
    pub fn new(chain: ChainConfig) -> Result<Self, crate::Error> {
        let parse = |url: &str| {
            url.parse::<alloy::transports::http::reqwest::Url>()
                .map_err(|e| crate::Error::Config(format!("Invalid RPC URL {url}: {e}")))
        };
        let primary = ProviderBuilder::new().on_http(parse(&chain.rpc_url)?);
        let fallback = ProviderBuilder::new().on_http(parse(&chain.fallback_rpc_url)?);
        info!(
            chain_id = chain.chain_id,
            primary = %chain.rpc_url,
            fallback = %chain.fallback_rpc_url,
            "RPC client initialized with failover"
        );
        Ok(Self {
            primary,
            fallback,
            primary_url: chain.rpc_url.clone(),
            fallback_url: chain.fallback_rpc_url.clone(),
            chain,
            circuit: Mutex::new(CircuitState {
                failures: 0,
                last_failure_ms: 0,
                open: false,
            }),
            total_failovers: AtomicU64::new(0),
            cached_gas_price: RwLock::new(None),
        })
    }

    /// Run `op` on the active provider, then on the fallback if it fails.
    async fn with_failover<T, F, Fut>(&self, what: &str, op: F) -> Result<T, crate::Error>
    where
        F: Fn(HttpProvider) -> Fut,
        Fut: Future<Output = Result<T, String>>,
    {
        let on_fallback = self.is_circuit_open();
        match op(self.active().clone()).await {
            Ok(v) => {
                if !on_fallback {
                    self.record_success();
                }
                Ok(v)
            }
            Err(e) if on_fallback => Err(crate::Error::Rpc(format!("{what} failed on fallback: {e}"))),
            Err(e) => {
                self.record_failure();
                warn!(error = %e, "Primary RPC {what} failed, trying fallback");
                op(self.fallback.clone()).await.map_err(|e2| {
                    crate::Error::Rpc(format!("{what} failed: primary={e}, fallback={e2}"))
                })
            }
        }
    }

    /// Poll both providers for the receipt of `tx_hash` until it is mined or
    /// the chain's receipt timeout passes. Transient poll errors are retried.
    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TransactionReceipt, crate::Error> {
        let timeout = Duration::from_secs(self.chain.receipt_timeout_secs);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let polled = self
                .with_failover("receipt", |p| async move {
                    p.get_transaction_receipt(tx_hash)
                        .await
                        .map_err(|e| e.to_string())
                })
                .await;
            match polled {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(e) => warn!(tx_hash = %tx_hash, error = %e, "Receipt poll failed"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(crate::Error::Submission(format!(
                    "transaction {tx_hash} not mined within {}s",
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }

    /// Quick connectivity check. Returns "ok", "degraded", or error.
    pub async fn health_check(&self) -> Result<&'static str, crate::Error> {
        if self.primary.get_block_number().await.is_ok() {
            return Ok("ok");
        }
        match self.fallback.get_block_number().await {
            Ok(_) => Ok("degraded"),
            Err(e) => Err(crate::Error::Rpc(format!("Both RPCs unreachable: {e}"))),
        }
    }

    // --- Failover / circuit breaker ---

    /// Active provider (primary unless circuit is open).
    fn active(&self) -> &HttpProvider {
        if self.is_circuit_open() {
            &self.fallback
        } else {
            &self.primary
        }
    }

    fn record_success(&self) {
        let mut circuit = self.circuit.lock().unwrap_or_else(|e| e.into_inner());
        if circuit.failures > 0 {
            info!(primary = %self.primary_url, "Primary RPC recovered");
            circuit.failures = 0;
            circuit.open = false;
        }
    }

    fn record_failure(&self) {
        METRICS.rpc_errors.fetch_add(1, Ordering::Relaxed);
        let mut circuit = self.circuit.lock().unwrap_or_else(|e| e.into_inner());
        circuit.failures += 1;
        circuit.last_failure_ms = now_ms();
        if circuit.failures >= CIRCUIT_BREAKER_THRESHOLD && !circuit.open {
            circuit.open = true;
            self.total_failovers.fetch_add(1, Ordering::Relaxed);
            METRICS.rpc_failovers.fetch_add(1, Ordering::Relaxed);
            warn!(
                failures = circuit.failures,
                fallback = %self.fallback_url,
                "Circuit breaker opened, routing to fallback"
            );
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        let mut circuit = self.circuit.lock().unwrap_or_else(|e| e.into_inner());
        if !circuit.open {
            return false;
        }
        if now_ms().saturating_sub(circuit.last_failure_ms) > CIRCUIT_BREAKER_WINDOW_MS {
            circuit.open = false;
            circuit.failures = 0;
            info!(primary = %self.primary_url, "Circuit breaker half-open, retrying primary");
            return false;
        }
        true
    }

    pub fn failover_count(&self) -> u64 {
        self.total_failovers.load(Ordering::Relaxed)
    }

    /// Currently active RPC URL.
    pub fn active_url(&self) -> &str {
        if self.is_circuit_open() {
            &self.fallback_url
        } else {
            &self.primary_url
        }
    }
}

#[async_trait::async_trait]
impl EvmChain for EvmRpcClient {
    fn chain_id(&self) -> u64 {
        self.chain.chain_id
    }

    async fn gas_price(&self) -> Result<u128, crate::Error> {
        {
            let cache = self.cached_gas_price.read().await;
            if let Some((price, when)) = *cache {
                if when.elapsed().as_secs() < GAS_PRICE_TTL_SECS {
                    return Ok(price);
                }
            }
        }
        let raw = self
            .with_failover("gas price", |p| async move {
                p.get_gas_price().await.map_err(|e| e.to_string())
            })
            .await?;
        let price = clamp_gas_price(raw, self.chain.min_gas_price, self.chain.high_gas_price);
        if price != raw {
            info!(node = raw, used = price, "Gas price clamped");
        }
        *self.cached_gas_price.write().await = Some((price, Instant::now()));
        Ok(price)
    }

    async fn estimate_gas(&self, from: Address, tx: &TxParams) -> Result<u64, crate::Error> {
        let request = TransactionRequest::default()
            .with_from(from)
            .with_to(tx.to)
            .with_input(tx.data.clone())
            .with_value(tx.value);
        self.with_failover("estimate gas", |p| {
            let request = request.clone();
            async move { p.estimate_gas(&request).await.map_err(|e| e.to_string()) }
        })
        .await
    }

    async fn submit(&self, wallet: &RelayerWallet, tx: TxParams) -> Result<TxOutcome, crate::Error> {
        let from = wallet.address();
        let gas_price = self.gas_price().await?;
        let nonce = self
            .with_failover("nonce", |p| async move {
                p.get_transaction_count(from)
                    .pending()
                    .await
                    .map_err(|e| e.to_string())
            })
            .await?;
        let gas_limit = tx.gas_limit.unwrap_or(self.chain.default_gas_limit);

        let envelope = TransactionRequest::default()
            .with_from(from)
            .with_to(tx.to)
            .with_input(tx.data)
            .with_value(tx.value)
            .with_nonce(nonce)
            .with_gas_limit(gas_limit)
            .with_gas_price(gas_price)
            .with_chain_id(self.chain.chain_id)
            .build(&wallet.ethereum_wallet())
            .await
            .map_err(|e| crate::Error::Submission(format!("failed to sign transaction: {e}")))?;

        info!(
            wallet = %from,
            to = %tx.to,
            nonce,
            gas_price,
            gas_limit,
            "Sending transaction"
        );

        // Only the broadcast fails over. A fallback that already holds the
        // primary's broadcast reports it as known, which counts as sent.
        let tx_hash = *envelope.tx_hash();
        self.with_failover("send transaction", |p| {
            let envelope = envelope.clone();
            async move {
                match p.send_tx_envelope(envelope).await {
                    Ok(_) => Ok(()),
                    Err(e) if is_already_known(&e.to_string()) => Ok(()),
                    Err(e) => Err(e.to_string()),
                }
            }
        })
        .await
        .map_err(|e| crate::Error::Submission(e.to_string()))?;

        let receipt = self.wait_for_receipt(tx_hash).await?;

        if !receipt.status() {
            return Err(crate::Error::Submission(format!(
                "transaction {} reverted",
                receipt.transaction_hash
            )));
        }
        Ok(TxOutcome {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
        })
    }

    async fn receipt_logs(&self, tx_hash: B256) -> Result<Vec<ChainLog>, crate::Error> {
        let receipt = self
            .with_failover("receipt", |p| async move {
                p.get_transaction_receipt(tx_hash)
                    .await
                    .map_err(|e| e.to_string())
            })
            .await?
            .ok_or_else(|| crate::Error::Rpc(format!("no receipt for {tx_hash}")))?;
        Ok(receipt
            .inner
            .logs()
            .iter()
            .map(|log| ChainLog {
                address: log.address(),
                topics: log.topics().to_vec(),
                data: log.data().data.clone(),
            })
            .collect())
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
