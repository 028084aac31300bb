//! Custodial relayer wallets.

use crate::key_store::WalletSecret;
use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// One relayer wallet. Immutable after startup.
pub struct RelayerWallet {
    address: Address,
    signer: PrivateKeySigner,
}

impl RelayerWallet {
    /// Fails unless `private_key` derives `public_key`.
    pub fn from_secret(secret: &WalletSecret) -> Result<Self, crate::Error> {
        let address = Address::from_str(secret.public_key.trim())
            .map_err(|e| crate::Error::Config(format!("Invalid relayer address: {e}")))?;
        let signer = PrivateKeySigner::from_str(secret.private_key.trim())
            .map_err(|e| crate::Error::Config(format!("Invalid relayer private key: {e}")))?;
        if signer.address() != address {
            return Err(crate::Error::Config(format!(
                "Relayer private key does not match address {address}"
            )));
        }
        Ok(Self { address, signer })
    }

    pub fn from_signer(signer: PrivateKeySigner) -> Self {
        Self {
            address: signer.address(),
            signer,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Lock key for this wallet under `prefix`.
    pub fn lock_key(&self, prefix: &str) -> String {
        format!("{prefix}:{:#x}", self.address)
    }

    pub fn ethereum_wallet(&self) -> EthereumWallet {
        EthereumWallet::from(self.signer.clone())
    }
}

impl std::fmt::Debug for RelayerWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RelayerWallet({})", self.address)
    }
}

/// Static pool of wallets for one chain.
pub struct WalletPool {
    wallets: Vec<Arc<RelayerWallet>>,
    next: AtomicU64,
}

impl WalletPool {
    pub fn new(wallets: Vec<RelayerWallet>) -> Self {
        info!(wallets = wallets.len(), "Wallet pool initialized");
        Self {
            wallets: wallets.into_iter().map(Arc::new).collect(),
            next: AtomicU64::new(0),
        }
    }

    pub fn from_secrets(secrets: &[WalletSecret]) -> Result<Self, crate::Error> {
        let wallets = secrets
            .iter()
            .map(RelayerWallet::from_secret)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(wallets))
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    /// Round-robin pick.
    pub fn next_wallet(&self) -> Option<Arc<RelayerWallet>> {
        if self.wallets.is_empty() {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) as usize % self.wallets.len();
        Some(Arc::clone(&self.wallets[i]))
    }

    /// Every wallet once, starting at a random offset and wrapping around.
    pub fn from_random_offset(&self) -> Vec<Arc<RelayerWallet>> {
        if self.wallets.is_empty() {
            return Vec::new();
        }
        let offset = rand::random::<usize>() % self.wallets.len();
        self.rotated(offset)
    }

    fn rotated(&self, offset: usize) -> Vec<Arc<RelayerWallet>> {
        let n = self.wallets.len();
        (0..n)
            .map(|i| Arc::clone(&self.wallets[(offset + i) % n]))
            .collect()
    }
}
