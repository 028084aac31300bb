//! Track listens recorded on the listen destination chain.
//!
//! A listen is a Borsh-encoded [`ListenEvent`] signed with the configured
//! valid-signer secp256k1 key. The transaction carries two instructions: the
//! native secp256k1 verification of that signature, then the listen program
//! call. Both are compiled into a v0 transaction paid by a wallet drawn from
//! the fee payer pool.

pub mod instruction;
mod solana;

pub use solana::{ListenChain, SolanaRpcClient};

use crate::action::{address_of_secret, parse_secret_key, sign_digest_raw};
use crate::config::ListenConfig;
use crate::key_store::RelayerSecrets;
use crate::metrics::METRICS;
use crate::store::CoordinationStore;
use alloy::primitives::keccak256;
use borsh::{BorshDeserialize, BorshSerialize};
use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use rand::seq::SliceRandom;
use secp256k1::SecretKey;
use serde::{Deserialize, Serialize};
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Listen tracking keys expire after one week.
const TRACKING_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const TRACKING_HOURS_SET: &str = "listens-tx-hours";

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ListenEvent {
    pub user_id: String,
    pub track_id: String,
    pub source: String,
    /// JSON object, `{}` when unknown.
    pub location: String,
    pub timestamp: i64,
}

#[derive(BorshSerialize)]
enum ListenProgramInstruction {
    SubmitListen(ListenEvent),
}

/// Instructions ready to be compiled into a transaction paid by `fee_payer`.
pub struct SignedListen {
    pub event: ListenEvent,
    pub instructions: Vec<Instruction>,
    pub fee_payer: Arc<Keypair>,
}

pub struct ListenInstructionBuilder {
    chain: Arc<dyn ListenChain>,
    program_id: Pubkey,
    valid_signer: Pubkey,
    signer_key: SecretKey,
    fee_payers: Vec<Arc<Keypair>>,
    ttl: Duration,
    cached_timestamp: Mutex<Option<(i64, Instant)>>,
}

impl ListenInstructionBuilder {
    pub fn new(
        chain: Arc<dyn ListenChain>,
        config: &ListenConfig,
        signer_key: SecretKey,
        fee_payers: Vec<Keypair>,
    ) -> Result<Self, crate::Error> {
        if fee_payers.is_empty() {
            return Err(crate::Error::Config("no listen fee payers configured".into()));
        }
        let required = |value: &Option<String>, what: &str| {
            value
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| crate::Error::Config(format!("listen.{what} not configured")))
                .and_then(|v| instruction::parse_pubkey(v, what))
        };
        Ok(Self {
            chain,
            program_id: required(&config.program_id, "program_id")?,
            valid_signer: required(&config.valid_signer, "valid_signer")?,
            signer_key,
            fee_payers: fee_payers.into_iter().map(Arc::new).collect(),
            ttl: Duration::from_secs(config.timestamp_ttl_secs),
            cached_timestamp: Mutex::new(None),
        })
    }

    pub fn from_secrets(
        chain: Arc<dyn ListenChain>,
        config: &ListenConfig,
        secrets: &RelayerSecrets,
    ) -> Result<Self, crate::Error> {
        let signer_key = secrets
            .listen_signer_key
            .as_deref()
            .ok_or_else(|| crate::Error::Config("listen_signer_key not configured".into()))
            .and_then(parse_secret_key)?;
        let fee_payers = secrets
            .fee_payers
            .iter()
            .map(|raw| fee_payer_from_bytes(raw))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(chain, config, signer_key, fee_payers)
    }

    /// Recent finalized chain time; reused while younger than the TTL. Falls
    /// back to wall-clock time (uncached) when the chain cannot be reached.
    pub async fn timestamp(&self) -> i64 {
        let mut cached = self.cached_timestamp.lock().await;
        if let Some((ts, fetched_at)) = *cached {
            if fetched_at.elapsed() < self.ttl {
                METRICS.timestamp_cache_hits.fetch_add(1, Ordering::Relaxed);
                return ts;
            }
        }
        METRICS.timestamp_cache_misses.fetch_add(1, Ordering::Relaxed);
        match self.chain.finalized_timestamp().await {
            Ok(ts) => {
                *cached = Some((ts, Instant::now()));
                debug!(timestamp = ts, "Refreshed finalized timestamp");
                ts
            }
            Err(e) => {
                warn!(error = %e, "Finalized timestamp unavailable, using wall clock");
                Utc::now().timestamp()
            }
        }
    }

    pub async fn build(
        &self,
        user_id: &str,
        track_id: &str,
        source: &str,
        location: &str,
    ) -> Result<SignedListen, crate::Error> {
        let event = ListenEvent {
            user_id: user_id.to_string(),
            track_id: track_id.to_string(),
            source: source.to_string(),
            location: location.to_string(),
            timestamp: self.timestamp().await,
        };
        let payload = borsh::to_vec(&event)
            .map_err(|e| crate::Error::BadRequest(format!("encode listen: {e}")))?;
        let (signature, recovery_id) = sign_digest_raw(&self.signer_key, keccak256(&payload));
        let signer_address = address_of_secret(&self.signer_key);

        let verify =
            instruction::secp256k1_verify(&signer_address.0 .0, &signature, recovery_id, &payload)?;
        let call = borsh::to_vec(&ListenProgramInstruction::SubmitListen(event.clone()))
            .map_err(|e| crate::Error::BadRequest(format!("encode listen: {e}")))?;
        let submit = instruction::submit_listen(self.program_id, self.valid_signer, &call);

        let fee_payer = self
            .fee_payers
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| crate::Error::Config("no listen fee payers configured".into()))?;

        Ok(SignedListen {
            event,
            instructions: vec![verify, submit],
            fee_payer,
        })
    }
}

/// Accepts a 64-byte keypair (secret || public) or a bare 32-byte secret.
pub fn fee_payer_from_bytes(raw: &[u8]) -> Result<Keypair, crate::Error> {
    if raw.len() != 32 && raw.len() != 64 {
        return Err(crate::Error::Config(format!("Fee payer key has {} bytes", raw.len())));
    }
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&raw[..32]);
    let keypair = Keypair::new_from_array(secret);
    if raw.len() == 64 && keypair.pubkey().as_ref() != &raw[32..] {
        return Err(crate::Error::Config(
            "Fee payer keypair public half does not match its secret".into(),
        ));
    }
    Ok(keypair)
}

/// A user or track id given as a number or a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Number(u64),
    Text(String),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Number(n) => write!(f, "{n}"),
            EntityId::Text(s) => f.write_str(s),
        }
    }
}

fn default_source() -> String {
    "relay".into()
}

/// Body of `POST /tracks/{id}/listen`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenRequest {
    pub user_id: EntityId,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub location: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyListens {
    pub submission: u64,
    pub success: u64,
    pub time: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentListens {
    pub recent_submission_count: u64,
    pub recent_success_count: u64,
    pub recent_success_percent: f64,
    pub cutoff_timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenStatus {
    pub total_percent_success: f64,
    pub total_success_count: u64,
    pub total_submission_count: u64,
    pub sorted_hourly_data: Vec<HourlyListens>,
    pub recent_info: RecentListens,
}

fn hour_of(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(ChronoDuration::hours(1)).unwrap_or(t)
}

fn hour_suffix(t: DateTime<Utc>) -> String {
    hour_of(t).format("%Y-%m-%dT%H:00:00.000Z").to_string()
}

fn submission_key(hour: &str) -> String {
    format!("listens-tx-submission::{hour}")
}

fn success_key(hour: &str) -> String {
    format!("listens-tx-success::{hour}")
}

fn ratio(success: u64, submitted: u64) -> f64 {
    if submitted == 0 {
        1.0
    } else {
        success as f64 / submitted as f64
    }
}

pub struct ListenService {
    builder: ListenInstructionBuilder,
    chain: Arc<dyn ListenChain>,
    store: Arc<dyn CoordinationStore>,
}

impl ListenService {
    pub fn new(
        builder: ListenInstructionBuilder,
        chain: Arc<dyn ListenChain>,
        store: Arc<dyn CoordinationStore>,
    ) -> Self {
        Self {
            builder,
            chain,
            store,
        }
    }

    pub fn builder(&self) -> &ListenInstructionBuilder {
        &self.builder
    }

    /// Record one listen. Returns the destination transaction signature.
    pub async fn submit(
        &self,
        req_id: &str,
        track_id: &str,
        request: ListenRequest,
    ) -> Result<String, crate::Error> {
        let hour = hour_suffix(Utc::now());
        let user_id = request.user_id.to_string();
        self.store.add_to_set(TRACKING_HOURS_SET, &hour).await?;
        self.store
            .incr_with_expiry(&submission_key(&hour), TRACKING_WINDOW)
            .await?;
        METRICS.listen_submitted.fetch_add(1, Ordering::Relaxed);
        info!(req_id, user_id = %user_id, track_id, "Listen submission");

        let location = request
            .location
            .map(|l| l.to_string())
            .unwrap_or_else(|| "{}".into());
        let signed = self
            .builder
            .build(&user_id, track_id, &request.source, &location)
            .await?;

        let blockhash = self.chain.latest_blockhash().await?;
        let tx = instruction::compile_transaction(&signed.instructions, &signed.fee_payer, blockhash)?;
        let signature = self.chain.send_transaction(&tx).await?;
        if tx.signatures.first() != Some(&signature) {
            warn!(req_id, remote = %signature, "Listen signature differs from the signed transaction");
        }
        let signature = signature.to_string();

        self.store
            .incr_with_expiry(&success_key(&hour), TRACKING_WINDOW)
            .await?;
        METRICS.listen_succeeded.fetch_add(1, Ordering::Relaxed);
        info!(
            req_id,
            user_id = %user_id,
            track_id,
            timestamp = signed.event.timestamp,
            tx_hash = %signature,
            "Listen recorded"
        );
        Ok(signature)
    }

    pub async fn status(&self, cutoff_minutes: i64) -> Result<ListenStatus, crate::Error> {
        self.status_at(Utc::now(), cutoff_minutes).await
    }

    /// Success ratios over the tracking window and since `now - cutoff`.
    pub async fn status_at(
        &self,
        now: DateTime<Utc>,
        cutoff_minutes: i64,
    ) -> Result<ListenStatus, crate::Error> {
        let oldest = now - ChronoDuration::days(7);
        let cutoff = hour_of(now - ChronoDuration::minutes(cutoff_minutes));

        let mut hourly = Vec::new();
        for hour in self.store.set_members(TRACKING_HOURS_SET).await? {
            let Ok(time) = DateTime::parse_from_rfc3339(&hour).map(|t| t.with_timezone(&Utc)) else {
                self.store.remove_from_set(TRACKING_HOURS_SET, &hour).await?;
                continue;
            };
            if time < oldest {
                self.store.remove_from_set(TRACKING_HOURS_SET, &hour).await?;
                continue;
            }
            let count = |raw: Option<String>| raw.and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
            let submission = count(self.store.get(&submission_key(&hour)).await?);
            let success = count(self.store.get(&success_key(&hour)).await?);
            hourly.push((time, HourlyListens { submission, success, time: hour }));
        }
        hourly.sort_by(|a, b| b.0.cmp(&a.0));

        let total_submission_count: u64 = hourly.iter().map(|(_, h)| h.submission).sum();
        let total_success_count: u64 = hourly.iter().map(|(_, h)| h.success).sum();
        let recent = hourly.iter().filter(|(t, _)| *t >= cutoff);
        let recent_submission_count: u64 = recent.clone().map(|(_, h)| h.submission).sum();
        let recent_success_count: u64 = recent.map(|(_, h)| h.success).sum();

        Ok(ListenStatus {
            total_percent_success: ratio(total_success_count, total_submission_count),
            total_success_count,
            total_submission_count,
            recent_info: RecentListens {
                recent_submission_count,
                recent_success_count,
                recent_success_percent: ratio(recent_success_count, recent_submission_count),
                cutoff_timestamp: hour_suffix(cutoff),
            },
            sorted_hourly_data: hourly.into_iter().map(|(_, h)| h).collect(),
        })
    }
}
