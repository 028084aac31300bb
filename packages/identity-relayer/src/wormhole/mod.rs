//! Cross-chain token transfers over the wormhole bridge.
//!
//! A transfer is a three-phase saga. `Permit` and `TransferTokens` run inside
//! the request and are relayed from the ETH wallet pool. `AttestAndRedeem`
//! runs on a background worker after the request has returned: the record is
//! persisted in the coordination store and tracked in a pending set, so a
//! restarted process picks up where the previous one stopped.
//!
//! Phases 1-2 run on their own task under a renewed run lease, so a dropped
//! request neither orphans them nor lets a retry start a second copy. A
//! record stuck in those phases without a live lease belongs to a dead
//! process and is reclaimed. Phase 3 runs under a per-transfer redeem lease,
//! so two processes resuming the same pending set never redeem one VAA twice.

mod alert;
mod attest;

pub use alert::{AlertSink, LogAlertSink, WebhookAlertSink};
pub use attest::{AttestationStep, BridgeAttestation};

use crate::lock::{WalletLease, WalletLockManager};
use crate::metrics::METRICS;
use crate::relay::{decode_hex, parse_address, RelayOrchestrator};
use crate::rpc::TxParams;
use crate::store::CoordinationStore;
use alloy::primitives::{keccak256, Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const PENDING_SET: &str = "wormhole:pending";

/// Transfer records outlive completion so status can be queried.
const RECORD_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Run and redeem leases; renewed while held, so this only bounds how long a
/// crashed holder blocks the transfer.
const TRANSFER_LEASE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Permit,
    TransferTokens,
    AttestAndRedeem,
    Complete,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Permit => "permit",
            Phase::TransferTokens => "transfer_tokens",
            Phase::AttestAndRedeem => "attest_and_redeem",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed)
    }
}

/// Persisted progress of one transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferState {
    pub id: String,
    pub sender_address: Address,
    pub phase: Phase,
    pub permit_tx_hash: Option<B256>,
    pub transfer_tx_hash: Option<B256>,
    pub complete_transfer_signature: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
    pub logs: Vec<String>,
}

impl TransferState {
    fn new(id: String, sender_address: Address) -> Self {
        Self {
            id,
            sender_address,
            phase: Phase::Permit,
            permit_tx_hash: None,
            transfer_tx_hash: None,
            complete_transfer_signature: None,
            error: None,
            attempts: 0,
            logs: Vec::new(),
        }
    }

    fn log(&mut self, message: impl AsRef<str>) {
        self.logs.push(format!(
            "{} [{}] {}",
            chrono::Utc::now().to_rfc3339(),
            self.phase.as_str(),
            message.as_ref()
        ));
    }

    fn fail(&mut self, message: String) {
        self.log(format!("failed: {message}"));
        self.error = Some(message);
        self.phase = Phase::Failed;
    }
}

/// One relayed call of the saga.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseCall {
    pub contract_address: String,
    #[serde(rename = "encodedABI", alias = "encodedAbi")]
    pub encoded_abi: String,
    #[serde(default)]
    pub gas_limit: Option<u64>,
}

/// Body of `POST /wormhole_relay`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WormholeRequest {
    pub sender_address: String,
    pub permit: PhaseCall,
    pub transfer_tokens: PhaseCall,
}

impl WormholeRequest {
    /// Content address of the transfer: keccak256 over the sender and both calls.
    pub fn content_id(&self) -> Result<B256, crate::Error> {
        let mut buf = parse_address(&self.sender_address)?.to_vec();
        for call in [&self.permit, &self.transfer_tokens] {
            buf.extend_from_slice(parse_address(&call.contract_address)?.as_slice());
            buf.extend_from_slice(&decode_hex(&call.encoded_abi)?);
        }
        Ok(keccak256(buf))
    }
}

pub struct WormholeTransferOrchestrator {
    relayer: Arc<RelayOrchestrator>,
    store: Arc<dyn CoordinationStore>,
    leases: WalletLockManager,
    attestation: Arc<dyn AttestationStep>,
    alerts: Arc<dyn AlertSink>,
    max_attempts: u32,
    base_delay: Duration,
    queue: mpsc::UnboundedSender<String>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl WormholeTransferOrchestrator {
    pub fn new(
        relayer: Arc<RelayOrchestrator>,
        store: Arc<dyn CoordinationStore>,
        attestation: Arc<dyn AttestationStep>,
        alerts: Arc<dyn AlertSink>,
        config: &crate::config::WormholeConfig,
    ) -> Self {
        let (queue, inbox) = mpsc::unbounded_channel();
        let leases = WalletLockManager::new(
            Arc::clone(&store),
            Duration::from_millis(200),
            TRANSFER_LEASE,
        );
        Self {
            relayer,
            store,
            leases,
            attestation,
            alerts,
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            queue,
            inbox: Mutex::new(Some(inbox)),
        }
    }

    fn record_key(id: &str) -> String {
        format!("wormhole:transfer:{id}")
    }

    fn run_key(id: &str) -> String {
        format!("wormhole:run:{id}")
    }

    fn redeem_key(id: &str) -> String {
        format!("wormhole:redeem:{id}")
    }

    pub async fn load(&self, id: &str) -> Result<TransferState, crate::Error> {
        let raw = self
            .store
            .get(&Self::record_key(id))
            .await?
            .ok_or_else(|| crate::Error::NotFound(format!("wormhole transfer {id}")))?;
        serde_json::from_str(&raw)
            .map_err(|e| crate::Error::Store(format!("corrupt transfer record {id}: {e}")))
    }

    async fn save(&self, state: &TransferState) -> Result<(), crate::Error> {
        let raw = serde_json::to_string(state)
            .map_err(|e| crate::Error::Store(format!("encode transfer record: {e}")))?;
        self.store
            .set(&Self::record_key(&state.id), &raw, Some(RECORD_TTL))
            .await
    }

    /// Claim the content id for phases 1-2. A finished or abandoned earlier
    /// transfer may be rerun; a running or queued one is a conflict.
    async fn claim(&self, state: &TransferState) -> Result<WalletLease, crate::Error> {
        let Some(run) = self.leases.try_acquire(&Self::run_key(&state.id)).await? else {
            return Err(crate::Error::Conflict(format!(
                "wormhole transfer {} is already running",
                state.id
            )));
        };
        match self.admit(state).await {
            Ok(()) => Ok(run),
            Err(e) => {
                self.release(run).await;
                Err(e)
            }
        }
    }

    async fn admit(&self, state: &TransferState) -> Result<(), crate::Error> {
        match self.load(&state.id).await {
            Ok(existing) if existing.phase == Phase::AttestAndRedeem => {
                Err(crate::Error::Conflict(format!(
                    "wormhole transfer {} already in phase {}",
                    state.id,
                    existing.phase.as_str()
                )))
            }
            Ok(existing) if !existing.phase.is_terminal() => {
                warn!(id = %state.id, phase = existing.phase.as_str(), "Reclaiming abandoned wormhole transfer");
                self.save(state).await
            }
            Ok(_) | Err(crate::Error::NotFound(_)) => self.save(state).await,
            Err(e) => Err(e),
        }
    }

    async fn release(&self, lease: WalletLease) {
        if let Err(e) = self.leases.release(lease).await {
            warn!(error = %e, "Failed to release wormhole lease");
        }
    }

    /// Run the permit and transfer phases, then hand the transfer to the
    /// background worker. Returns once the transfer transaction is mined.
    /// The phases keep running if the caller goes away.
    pub async fn start(self: &Arc<Self>, request: WormholeRequest) -> Result<TransferState, crate::Error> {
        let sender = parse_address(&request.sender_address)?;
        let permit = call_params(&request.permit)?;
        let transfer = call_params(&request.transfer_tokens)?;
        let id = format!("{:x}", request.content_id()?);

        let state = TransferState::new(id.clone(), sender);
        let run = self.claim(&state).await?;
        METRICS.wormhole_started.fetch_add(1, Ordering::Relaxed);
        info!(id = %id, sender = %sender, phase = state.phase.as_str(), "Wormhole transfer started");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let result = this.first_phases(state, permit, transfer).await;
            this.release(run).await;
            result
        })
        .await
        .map_err(|e| crate::Error::Submission(format!("wormhole transfer {id} task ended: {e}")))?
    }

    async fn first_phases(
        &self,
        mut state: TransferState,
        permit: TxParams,
        transfer: TxParams,
    ) -> Result<TransferState, crate::Error> {
        match self.relayer.relay_any(permit).await {
            Ok((wallet, outcome)) => {
                state.permit_tx_hash = Some(outcome.tx_hash);
                state.log(format!("relayed by {wallet} in {:#x}", outcome.tx_hash));
            }
            Err(e) => return Err(self.abort(state, e).await),
        }

        state.phase = Phase::TransferTokens;
        if let Err(e) = self.save(&state).await {
            return Err(self.abort(state, e).await);
        }
        match self.transfer_tokens(transfer).await {
            Ok((wallet, gas, outcome)) => {
                state.transfer_tx_hash = Some(outcome.tx_hash);
                state.log(format!(
                    "relayed by {wallet} with gas {gas} in {:#x}",
                    outcome.tx_hash
                ));
            }
            Err(e) => return Err(self.abort(state, e).await),
        }

        state.phase = Phase::AttestAndRedeem;
        state.log("queued");
        let queued = match self.save(&state).await {
            Ok(()) => self.store.add_to_set(PENDING_SET, &state.id).await,
            Err(e) => Err(e),
        };
        if let Err(e) = queued {
            return Err(self.abort(state, e).await);
        }
        if self.queue.send(state.id.clone()).is_err() {
            warn!(id = %state.id, "Wormhole worker stopped, transfer left for resume");
        }
        info!(
            id = %state.id,
            phase = state.phase.as_str(),
            tx_hash = ?state.transfer_tx_hash,
            "Wormhole transfer queued for attestation"
        );
        Ok(state)
    }

    /// Gas is the node estimate plus 5%.
    async fn transfer_tokens(&self, mut tx: TxParams) -> Result<(Address, u64, crate::rpc::TxOutcome), crate::Error> {
        let from = self
            .relayer
            .wallets()
            .next_wallet()
            .map(|w| w.address())
            .ok_or_else(|| crate::Error::Config("no ETH relayer wallets configured".into()))?;
        let estimate = self.relayer.chain().estimate_gas(from, &tx).await?;
        let gas = estimate.saturating_mul(105) / 100;
        tx.gas_limit = Some(gas);
        let (wallet, outcome) = self.relayer.relay_any(tx).await?;
        Ok((wallet, gas, outcome))
    }

    async fn abort(&self, mut state: TransferState, e: crate::Error) -> crate::Error {
        error!(id = %state.id, phase = state.phase.as_str(), error = %e, "Wormhole transfer failed");
        state.fail(e.to_string());
        self.finish(&state).await;
        e
    }

    /// Persist a terminal state, drop it from the pending set and report failures.
    async fn finish(&self, state: &TransferState) {
        if let Err(e) = self.save(state).await {
            warn!(id = %state.id, error = %e, "Failed to persist wormhole transfer");
        }
        if let Err(e) = self.store.remove_from_set(PENDING_SET, &state.id).await {
            warn!(id = %state.id, error = %e, "Failed to clear pending wormhole transfer");
        }
        match state.phase {
            Phase::Complete => {
                METRICS.wormhole_completed.fetch_add(1, Ordering::Relaxed);
            }
            Phase::Failed => {
                METRICS.wormhole_failed.fetch_add(1, Ordering::Relaxed);
                let text = format!(
                    "Wormhole transfer {} from {} failed: {}\n{}",
                    state.id,
                    state.sender_address,
                    state.error.as_deref().unwrap_or("unknown error"),
                    state.logs.join("\n")
                );
                if let Err(e) = self.alerts.send(&text).await {
                    error!(id = %state.id, error = %e, "Failed to deliver wormhole alert");
                }
            }
            _ => {}
        }
    }

    /// Phase 3 for one queued transfer. Recoverable errors are retried with
    /// exponential backoff up to `max_attempts`. A transfer another worker is
    /// already redeeming is skipped and returned as stored.
    pub async fn redeem(&self, id: &str) -> Result<TransferState, crate::Error> {
        let Some(lease) = self.leases.try_acquire(&Self::redeem_key(id)).await? else {
            info!(id = %id, "Wormhole transfer is being redeemed elsewhere, skipping");
            return self.load(id).await;
        };
        let result = self.redeem_held(id).await;
        self.release(lease).await;
        result
    }

    async fn redeem_held(&self, id: &str) -> Result<TransferState, crate::Error> {
        let mut state = self.load(id).await?;
        if state.phase != Phase::AttestAndRedeem {
            self.store.remove_from_set(PENDING_SET, id).await?;
            return Ok(state);
        }
        let Some(transfer_tx) = state.transfer_tx_hash else {
            state.fail("no transfer transaction recorded".into());
            self.finish(&state).await;
            return Ok(state);
        };

        loop {
            let attempt = state.attempts;
            state.attempts += 1;
            match self.attestation.attest_and_redeem(transfer_tx).await {
                Ok(signature) => {
                    state.log(format!("redeemed in {signature} after {} attempt(s)", state.attempts));
                    state.complete_transfer_signature = Some(signature);
                    state.phase = Phase::Complete;
                    info!(id = %id, phase = state.phase.as_str(), attempts = state.attempts, "Wormhole transfer complete");
                    self.finish(&state).await;
                    return Ok(state);
                }
                Err(e) if e.is_recoverable() && state.attempts < self.max_attempts => {
                    let delay = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
                    state.log(format!(
                        "attempt {} failed: {e}; retrying in {}ms",
                        state.attempts,
                        delay.as_millis()
                    ));
                    warn!(id = %id, phase = state.phase.as_str(), attempt = state.attempts, error = %e, "Attestation failed, retrying");
                    METRICS.attestation_retries.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = self.save(&state).await {
                        warn!(id = %id, error = %e, "Failed to persist wormhole progress");
                    }
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    state.log(format!("attempt {} failed: {e}", state.attempts));
                    error!(id = %id, phase = state.phase.as_str(), attempts = state.attempts, error = %e, "Attestation gave up");
                    state.fail(e.to_string());
                    self.finish(&state).await;
                    return Ok(state);
                }
            }
        }
    }

    /// Re-enqueue every transfer left in phase 3. Transfers a live worker
    /// holds are skipped when they reach [`Self::redeem`].
    pub async fn resume_pending(&self) -> Result<usize, crate::Error> {
        let pending = self.store.set_members(PENDING_SET).await?;
        for id in &pending {
            if self.queue.send(id.clone()).is_err() {
                break;
            }
        }
        if !pending.is_empty() {
            info!(count = pending.len(), "Resumed pending wormhole transfers");
        }
        Ok(pending.len())
    }

    pub async fn pending_count(&self) -> usize {
        self.store
            .set_members(PENDING_SET)
            .await
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Start the phase 3 worker. Each transfer runs on its own task; records
    /// still pending at cancellation are resumed on the next start.
    pub fn spawn_worker(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let mut inbox = self
            .inbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()?;
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = inbox.recv() => {
                        let Some(id) = next else { break };
                        let worker = Arc::clone(&this);
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                _ = cancel.cancelled() => {}
                                result = worker.redeem(&id) => {
                                    if let Err(e) = result {
                                        error!(id = %id, error = %e, "Wormhole redeem failed");
                                    }
                                }
                            }
                        });
                    }
                }
            }
            info!("Wormhole worker stopped");
        }))
    }
}

fn call_params(call: &PhaseCall) -> Result<TxParams, crate::Error> {
    Ok(TxParams::call(
        parse_address(&call.contract_address)?,
        Bytes::from(decode_hex(&call.encoded_abi)?),
        call.gas_limit,
    ))
}
