//! Prometheus metrics (lock-free atomics, zero allocation on hot path).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    // --- Relay traffic ---
    pub relay_total: AtomicU64,
    pub relay_success: AtomicU64,
    pub relay_error: AtomicU64,
    pub auth_rejected: AtomicU64,
    pub rate_limited: AtomicU64,
    pub dedup_hits: AtomicU64,

    // --- Latency (μs, updated via CAS) ---
    pub relay_duration_us_sum: AtomicU64,
    pub relay_duration_us_max: AtomicU64,

    // --- Wallet locks ---
    pub lock_wait_us_sum: AtomicU64,
    pub lock_wait_us_max: AtomicU64,
    pub lock_lease_expired: AtomicU64,

    // --- Wormhole ---
    pub wormhole_started: AtomicU64,
    pub wormhole_completed: AtomicU64,
    pub wormhole_failed: AtomicU64,
    pub attestation_retries: AtomicU64,

    // --- Listens ---
    pub listen_submitted: AtomicU64,
    pub listen_succeeded: AtomicU64,
    pub timestamp_cache_hits: AtomicU64,
    pub timestamp_cache_misses: AtomicU64,

    // --- RPC ---
    pub rpc_failovers: AtomicU64,
    pub rpc_errors: AtomicU64,
}

fn update_max(slot: &AtomicU64, value: u64) {
    let mut cur = slot.load(Ordering::Relaxed);
    while value > cur {
        match slot.compare_exchange_weak(cur, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => cur = actual,
        }
    }
}

impl Metrics {
    const fn new() -> Self {
        Self {
            relay_total: AtomicU64::new(0),
            relay_success: AtomicU64::new(0),
            relay_error: AtomicU64::new(0),
            auth_rejected: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            dedup_hits: AtomicU64::new(0),
            relay_duration_us_sum: AtomicU64::new(0),
            relay_duration_us_max: AtomicU64::new(0),
            lock_wait_us_sum: AtomicU64::new(0),
            lock_wait_us_max: AtomicU64::new(0),
            lock_lease_expired: AtomicU64::new(0),
            wormhole_started: AtomicU64::new(0),
            wormhole_completed: AtomicU64::new(0),
            wormhole_failed: AtomicU64::new(0),
            attestation_retries: AtomicU64::new(0),
            listen_submitted: AtomicU64::new(0),
            listen_succeeded: AtomicU64::new(0),
            timestamp_cache_hits: AtomicU64::new(0),
            timestamp_cache_misses: AtomicU64::new(0),
            rpc_failovers: AtomicU64::new(0),
            rpc_errors: AtomicU64::new(0),
        }
    }

    pub fn record_relay_duration(&self, start: Instant) {
        let us = start.elapsed().as_micros() as u64;
        self.relay_duration_us_sum.fetch_add(us, Ordering::Relaxed);
        update_max(&self.relay_duration_us_max, us);
    }

    pub fn record_lock_wait(&self, start: Instant) {
        let us = start.elapsed().as_micros() as u64;
        self.lock_wait_us_sum.fetch_add(us, Ordering::Relaxed);
        update_max(&self.lock_wait_us_max, us);
    }

    /// Render in Prometheus text exposition format.
    pub fn render(&self, wallets: usize, pending_transfers: usize) -> String {
        let c = |a: &AtomicU64| a.load(Ordering::Relaxed);
        let secs = |us: u64| us as f64 / 1_000_000.0;

        let relay_total = c(&self.relay_total);
        let relay_success = c(&self.relay_success);
        let relay_error = c(&self.relay_error);
        let auth_rejected = c(&self.auth_rejected);
        let rate_limited = c(&self.rate_limited);
        let dedup_hits = c(&self.dedup_hits);
        let relay_dur_sum = secs(c(&self.relay_duration_us_sum));
        let relay_dur_max = secs(self.relay_duration_us_max.swap(0, Ordering::Relaxed));
        let lock_wait_sum = secs(c(&self.lock_wait_us_sum));
        let lock_wait_max = secs(self.lock_wait_us_max.swap(0, Ordering::Relaxed));
        let lock_expired = c(&self.lock_lease_expired);
        let wh_started = c(&self.wormhole_started);
        let wh_completed = c(&self.wormhole_completed);
        let wh_failed = c(&self.wormhole_failed);
        let att_retries = c(&self.attestation_retries);
        let listen_submitted = c(&self.listen_submitted);
        let listen_succeeded = c(&self.listen_succeeded);
        let ts_hits = c(&self.timestamp_cache_hits);
        let ts_misses = c(&self.timestamp_cache_misses);
        let rpc_failovers = c(&self.rpc_failovers);
        let rpc_errors = c(&self.rpc_errors);

        format!(
            "\
# HELP relayer_relay_total Total relay requests received.\n\
# TYPE relayer_relay_total counter\n\
relayer_relay_total {relay_total}\n\
# HELP relayer_relay_success_total Relayed transactions mined.\n\
# TYPE relayer_relay_success_total counter\n\
relayer_relay_success_total {relay_success}\n\
# HELP relayer_relay_error_total Failed relay requests.\n\
# TYPE relayer_relay_error_total counter\n\
relayer_relay_error_total {relay_error}\n\
# HELP relayer_auth_rejected_total Requests rejected by signature checks.\n\
# TYPE relayer_auth_rejected_total counter\n\
relayer_auth_rejected_total {auth_rejected}\n\
# HELP relayer_rate_limited_total Requests rejected by the rate limiter.\n\
# TYPE relayer_rate_limited_total counter\n\
relayer_rate_limited_total {rate_limited}\n\
# HELP relayer_dedup_hits_total Meta-transactions answered from the dedup record.\n\
# TYPE relayer_dedup_hits_total counter\n\
relayer_dedup_hits_total {dedup_hits}\n\
# HELP relayer_relay_duration_seconds_sum Total relay handler time (seconds).\n\
# TYPE relayer_relay_duration_seconds_sum counter\n\
relayer_relay_duration_seconds_sum {relay_dur_sum:.6}\n\
# HELP relayer_relay_duration_seconds_max Max relay handler time since last scrape (seconds).\n\
# TYPE relayer_relay_duration_seconds_max gauge\n\
relayer_relay_duration_seconds_max {relay_dur_max:.6}\n\
# HELP relayer_lock_wait_seconds_sum Total time spent waiting for wallet locks (seconds).\n\
# TYPE relayer_lock_wait_seconds_sum counter\n\
relayer_lock_wait_seconds_sum {lock_wait_sum:.6}\n\
# HELP relayer_lock_wait_seconds_max Max wallet lock wait since last scrape (seconds).\n\
# TYPE relayer_lock_wait_seconds_max gauge\n\
relayer_lock_wait_seconds_max {lock_wait_max:.6}\n\
# HELP relayer_lock_lease_expired_total Leases that expired before release.\n\
# TYPE relayer_lock_lease_expired_total counter\n\
relayer_lock_lease_expired_total {lock_expired}\n\
# HELP relayer_wormhole_started_total Wormhole transfers started.\n\
# TYPE relayer_wormhole_started_total counter\n\
relayer_wormhole_started_total {wh_started}\n\
# HELP relayer_wormhole_completed_total Wormhole transfers redeemed.\n\
# TYPE relayer_wormhole_completed_total counter\n\
relayer_wormhole_completed_total {wh_completed}\n\
# HELP relayer_wormhole_failed_total Wormhole transfers that failed terminally.\n\
# TYPE relayer_wormhole_failed_total counter\n\
relayer_wormhole_failed_total {wh_failed}\n\
# HELP relayer_attestation_retries_total Attest-and-redeem retries.\n\
# TYPE relayer_attestation_retries_total counter\n\
relayer_attestation_retries_total {att_retries}\n\
# HELP relayer_listen_submitted_total Listen transactions submitted.\n\
# TYPE relayer_listen_submitted_total counter\n\
relayer_listen_submitted_total {listen_submitted}\n\
# HELP relayer_listen_succeeded_total Listen transactions accepted by the chain.\n\
# TYPE relayer_listen_succeeded_total counter\n\
relayer_listen_succeeded_total {listen_succeeded}\n\
# HELP relayer_timestamp_cache_hits_total Listen timestamps served from cache.\n\
# TYPE relayer_timestamp_cache_hits_total counter\n\
relayer_timestamp_cache_hits_total {ts_hits}\n\
# HELP relayer_timestamp_cache_misses_total Listen timestamps fetched from the chain.\n\
# TYPE relayer_timestamp_cache_misses_total counter\n\
relayer_timestamp_cache_misses_total {ts_misses}\n\
# HELP relayer_rpc_failovers_total RPC primary-to-fallback failovers.\n\
# TYPE relayer_rpc_failovers_total counter\n\
relayer_rpc_failovers_total {rpc_failovers}\n\
# HELP relayer_rpc_errors_total RPC errors.\n\
# TYPE relayer_rpc_errors_total counter\n\
relayer_rpc_errors_total {rpc_errors}\n\
# HELP relayer_wallets Relayer wallets in the data chain pool.\n\
# TYPE relayer_wallets gauge\n\
relayer_wallets {wallets}\n\
# HELP relayer_wormhole_pending In-flight wormhole transfers.\n\
# TYPE relayer_wormhole_pending gauge\n\
relayer_wormhole_pending {pending_transfers}\n"
        )
    }
}
