//! Lock-guarded submission of relayed transactions.
//!
//! [`RelayOrchestrator`] owns the per-wallet sign+submit critical section.
//! [`RelayService`] is the `/relay` pipeline in front of it: decode,
//! authenticate, gate, rate limit and deduplicate before anything is signed.

use crate::action::{decode_action, recover_personal_sign, DecodedAction};
use crate::lock::{WalletLease, WalletLockManager};
use crate::metrics::METRICS;
use crate::rate_limit::DynamicRateLimiter;
use crate::rpc::{EvmChain, TxOutcome, TxParams};
use crate::store::CoordinationStore;
use crate::wallet::{RelayerWallet, WalletPool};
use alloy::primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub struct RelayOrchestrator {
    chain: Arc<dyn EvmChain>,
    wallets: Arc<WalletPool>,
    locks: Arc<WalletLockManager>,
    lock_prefix: String,
}

impl RelayOrchestrator {
    pub fn new(
        chain: Arc<dyn EvmChain>,
        wallets: Arc<WalletPool>,
        locks: Arc<WalletLockManager>,
        lock_prefix: impl Into<String>,
    ) -> Self {
        Self {
            chain,
            wallets,
            locks,
            lock_prefix: lock_prefix.into(),
        }
    }

    pub fn chain(&self) -> &Arc<dyn EvmChain> {
        &self.chain
    }

    pub fn wallets(&self) -> &WalletPool {
        &self.wallets
    }

    /// Sign and submit `tx` from `wallet` while holding the wallet's lock.
    /// Submission errors are surfaced, never retried here.
    pub async fn relay(&self, wallet: &RelayerWallet, tx: TxParams) -> Result<TxOutcome, crate::Error> {
        let lease = self.locks.acquire(&wallet.lock_key(&self.lock_prefix)).await?;
        self.submit_with_lease(wallet, lease, tx).await
    }

    /// Relay from the first free wallet, scanning the pool from a random offset.
    /// Blocks on the offset wallet when every wallet is busy.
    pub async fn relay_any(&self, tx: TxParams) -> Result<(Address, TxOutcome), crate::Error> {
        let (wallet, lease) = self.select_wallet().await?;
        let outcome = self.submit_with_lease(&wallet, lease, tx).await?;
        Ok((wallet.address(), outcome))
    }

    async fn select_wallet(&self) -> Result<(Arc<RelayerWallet>, WalletLease), crate::Error> {
        let candidates = self.wallets.from_random_offset();
        let Some(first) = candidates.first().cloned() else {
            return Err(crate::Error::Config("no relayer wallets configured".into()));
        };
        for wallet in candidates {
            match self.locks.try_acquire(&wallet.lock_key(&self.lock_prefix)).await {
                Ok(Some(lease)) => return Ok((wallet, lease)),
                Ok(None) => {}
                Err(e) => warn!(wallet = %wallet.address(), error = %e, "Lock attempt failed, trying next wallet"),
            }
        }
        let lease = self.locks.acquire(&first.lock_key(&self.lock_prefix)).await?;
        Ok((first, lease))
    }

    async fn submit_with_lease(
        &self,
        wallet: &RelayerWallet,
        lease: WalletLease,
        tx: TxParams,
    ) -> Result<TxOutcome, crate::Error> {
        let start = Instant::now();
        let to = tx.to;
        let result = self.chain.submit(wallet, tx).await;
        if let Err(e) = self.locks.release(lease).await {
            warn!(wallet = %wallet.address(), error = %e, "Failed to release wallet lock");
        }
        match &result {
            Ok(outcome) => info!(
                wallet = %wallet.address(),
                to = %to,
                tx_hash = %outcome.tx_hash,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Transaction relayed"
            ),
            Err(e) => error!(wallet = %wallet.address(), to = %to, error = %e, "Relay failed"),
        }
        result
    }
}

/// Body of `POST /relay`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    #[serde(default)]
    pub contract_registry_key: Option<String>,
    pub contract_address: String,
    #[serde(rename = "encodedABI", alias = "encodedAbi")]
    pub encoded_abi: String,
    pub sender_address: String,
    #[serde(default)]
    pub gas_limit: Option<u64>,
}

/// The `Encoded-Data-Message` / `Encoded-Data-Signature` header pair.
#[derive(Debug, Clone)]
pub struct AuthHeaders {
    pub message: String,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayReceipt {
    pub transaction_hash: B256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    /// Already relayed earlier; nothing was submitted this time.
    pub deduplicated: bool,
}

pub struct RelayService {
    orchestrator: Arc<RelayOrchestrator>,
    limiter: Arc<DynamicRateLimiter>,
    store: Arc<dyn CoordinationStore>,
    /// In-flight dedup claims are leases: renewed while the relay runs,
    /// cleared if the request is dropped.
    claims: WalletLockManager,
    allowed_contracts: HashSet<Address>,
    replica_set_allowlist: HashSet<Address>,
    dedup_ttl: Duration,
}

enum Claim {
    Owned(WalletLease),
    Relayed(RelayReceipt),
}

impl RelayService {
    pub fn new(
        orchestrator: Arc<RelayOrchestrator>,
        limiter: Arc<DynamicRateLimiter>,
        store: Arc<dyn CoordinationStore>,
        config: &crate::Config,
    ) -> Result<Self, crate::Error> {
        let parse_all = |list: &[String], what: &str| {
            list.iter()
                .map(|a| {
                    Address::from_str(a.trim())
                        .map_err(|e| crate::Error::Config(format!("Invalid {what} address {a}: {e}")))
                })
                .collect::<Result<HashSet<_>, _>>()
        };
        let claims = WalletLockManager::new(
            Arc::clone(&store),
            Duration::from_millis(config.lock.poll_ms),
            Duration::from_secs(config.dedup_claim_ttl_secs),
        );
        Ok(Self {
            orchestrator,
            limiter,
            store,
            claims,
            allowed_contracts: parse_all(&config.allowed_contracts, "allowed contract")?,
            replica_set_allowlist: parse_all(&config.replica_set_wallet_allowlist, "replica set")?,
            dedup_ttl: Duration::from_secs(config.dedup_ttl_secs),
        })
    }

    /// Validate and relay one meta-transaction.
    pub async fn handle(
        &self,
        req_id: &str,
        request: RelayRequest,
        auth: Option<AuthHeaders>,
    ) -> Result<RelayReceipt, crate::Error> {
        let (action, contract) = self.authorize(req_id, &request, auth.as_ref()).await?;

        let dedup_key = format!("relay:tx:{:#x}", action.dedup_key());
        let claim = match self.claim(&dedup_key).await? {
            Claim::Owned(claim) => claim,
            Claim::Relayed(receipt) => {
                METRICS.dedup_hits.fetch_add(1, Ordering::Relaxed);
                info!(req_id, tx_hash = %receipt.transaction_hash, "Meta-transaction already relayed");
                return Ok(receipt);
            }
        };

        let signer = parse_address(&request.sender_address)?;
        if let Err(e) = self.limiter.admit(&action, signer).await {
            self.unclaim(claim).await;
            return Err(e);
        }

        let data = Bytes::from(decode_hex(&request.encoded_abi)?);
        let tx = TxParams::call(contract, data, request.gas_limit);
        match self.orchestrator.relay_any(tx).await {
            Ok((wallet, outcome)) => {
                let hash = format!("{:#x}", outcome.tx_hash);
                claim.disarm();
                if let Err(e) = self.store.set(&dedup_key, &hash, Some(self.dedup_ttl)).await {
                    warn!(req_id, error = %e, "Failed to record relayed transaction");
                }
                info!(
                    req_id,
                    wallet = %wallet,
                    sender = %signer,
                    action = %action.action_key(),
                    tx_hash = %hash,
                    "Relay complete"
                );
                Ok(RelayReceipt {
                    transaction_hash: outcome.tx_hash,
                    block_number: outcome.block_number,
                    deduplicated: false,
                })
            }
            Err(e) => {
                self.unclaim(claim).await;
                Err(e)
            }
        }
    }

    /// Everything that must hold before the signing layer is reached.
    async fn authorize(
        &self,
        req_id: &str,
        request: &RelayRequest,
        auth: Option<&AuthHeaders>,
    ) -> Result<(DecodedAction, Address), crate::Error> {
        let contract = parse_address(&request.contract_address)?;
        let sender = parse_address(&request.sender_address)?;
        let action = decode_action(&decode_hex(&request.encoded_abi)?)?;

        if !self.allowed_contracts.is_empty() && !self.allowed_contracts.contains(&contract) {
            return Err(reject(format!("contract {contract} is not relayable")));
        }

        let auth = auth.ok_or_else(|| reject("missing Encoded-Data-Message/Signature headers".into()))?;
        let auth_signer = recover_personal_sign(auth.message.as_bytes(), &decode_hex(&auth.signature)?)
            .map_err(|e| reject(e.to_string()))?;
        if auth_signer != sender {
            return Err(reject(format!(
                "auth signature recovers {auth_signer}, not sender {sender}"
            )));
        }

        let chain_id = self.orchestrator.chain().chain_id();
        let subject = action
            .recover_signer(chain_id, contract)
            .map_err(|e| reject(e.to_string()))?;
        if subject != sender {
            warn!(
                req_id,
                sender = %sender,
                subject = %subject,
                action = %action.action_key(),
                "Subject signature does not match sender"
            );
            return Err(reject(format!(
                "{} signed by {subject}, not sender {sender}",
                action.action_key()
            )));
        }

        if action.is_replica_set_reconfiguration()
            && !self.replica_set_allowlist.is_empty()
            && !self.replica_set_allowlist.contains(&sender)
        {
            return Err(reject(format!(
                "sender {sender} not allowed to reconfigure replica sets"
            )));
        }

        Ok((action, contract))
    }

    /// `Relayed` when already relayed, `Owned` when this caller now holds
    /// the request, `Conflict` while another caller is relaying it.
    async fn claim(&self, key: &str) -> Result<Claim, crate::Error> {
        for _ in 0..2 {
            if let Some(claim) = self.claims.try_acquire(key).await? {
                return Ok(Claim::Owned(claim));
            }
            match self.store.get(key).await? {
                Some(value) => {
                    // Anything but a transaction hash is a live claim token.
                    let Ok(transaction_hash) = B256::from_str(&value) else {
                        return Err(crate::Error::Conflict(
                            "meta-transaction is already being relayed".into(),
                        ));
                    };
                    return Ok(Claim::Relayed(RelayReceipt {
                        transaction_hash,
                        block_number: None,
                        deduplicated: true,
                    }));
                }
                // Expired between the two calls.
                None => continue,
            }
        }
        Err(crate::Error::Conflict("meta-transaction is already being relayed".into()))
    }

    async fn unclaim(&self, claim: WalletLease) {
        if let Err(e) = self.claims.release(claim).await {
            warn!(error = %e, "Failed to clear relay claim");
        }
    }
}

fn reject(reason: String) -> crate::Error {
    METRICS.auth_rejected.fetch_add(1, Ordering::Relaxed);
    crate::Error::Authorization(reason)
}

pub(crate) fn parse_address(s: &str) -> Result<Address, crate::Error> {
    Address::from_str(s.trim()).map_err(|e| crate::Error::BadRequest(format!("invalid address {s}: {e}")))
}

pub(crate) fn decode_hex(s: &str) -> Result<Vec<u8>, crate::Error> {
    hex::decode(s.trim().trim_start_matches("0x"))
        .map_err(|e| crate::Error::Decode(format!("invalid hex: {e}")))
}
