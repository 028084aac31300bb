//! Test doubles shared by the unit tests.

use crate::rpc::{ChainLog, EvmChain, TxOutcome, TxParams};
use crate::wallet::RelayerWallet;
use alloy::primitives::{Address, B256};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// In-memory chain. Panics if two submissions overlap.
pub struct MockChain {
    pub chain_id: u64,
    pub gas_estimate: u64,
    pub submit_delay: Duration,
    pub submissions: Mutex<Vec<(Address, TxParams)>>,
    pub reverting: Mutex<HashSet<Address>>,
    pub logs: Mutex<Vec<ChainLog>>,
    busy: AtomicBool,
    next_hash: AtomicU64,
}

impl MockChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            gas_estimate: 100_000,
            submit_delay: Duration::from_millis(20),
            submissions: Mutex::new(Vec::new()),
            reverting: Mutex::new(HashSet::new()),
            logs: Mutex::new(Vec::new()),
            busy: AtomicBool::new(false),
            next_hash: AtomicU64::new(1),
        }
    }

    pub fn revert_calls_to(&self, to: Address) {
        self.reverting.lock().unwrap().insert(to);
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }
}

/// Clears the busy flag even when the submission future is dropped.
struct Idle<'a>(&'a AtomicBool);

impl Drop for Idle<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl EvmChain for MockChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn gas_price(&self) -> Result<u128, crate::Error> {
        Ok(10_000_000_000)
    }

    async fn estimate_gas(&self, _from: Address, _tx: &TxParams) -> Result<u64, crate::Error> {
        Ok(self.gas_estimate)
    }

    async fn submit(&self, wallet: &RelayerWallet, tx: TxParams) -> Result<TxOutcome, crate::Error> {
        assert!(!self.busy.swap(true, Ordering::SeqCst), "overlapping submissions");
        let idle = Idle(&self.busy);
        tokio::time::sleep(self.submit_delay).await;
        drop(idle);

        if self.reverting.lock().unwrap().contains(&tx.to) {
            return Err(crate::Error::Submission("execution reverted".into()));
        }
        self.submissions.lock().unwrap().push((wallet.address(), tx));
        let n = self.next_hash.fetch_add(1, Ordering::SeqCst);
        Ok(TxOutcome {
            tx_hash: B256::left_padding_from(&n.to_be_bytes()),
            block_number: Some(n),
        })
    }

    async fn receipt_logs(&self, _tx_hash: B256) -> Result<Vec<ChainLog>, crate::Error> {
        Ok(self.logs.lock().unwrap().clone())
    }
}
