//! Identity-aware rate limiting of relayed actions.
//!
//! Each (action key, signer) pair gets a fixed-window counter in the shared
//! store. The cap depends on who signed: the platform user's own wallet, an
//! allow-listed application, or any other application.

use crate::action::DecodedAction;
use crate::config::{RateLimitConfig, TierLimits};
use crate::metrics::METRICS;
use crate::store::CoordinationStore;
use alloy::primitives::{Address, U256};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Read-only lookups of platform users.
#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync {
    /// Wallet registered for `user_id`, if the user exists.
    async fn wallet_of(&self, user_id: U256) -> Result<Option<Address>, crate::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Owner,
    Allowlist,
    App,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Owner => "owner",
            Tier::Allowlist => "allowlist",
            Tier::App => "app",
        }
    }

    fn limit(&self, limits: &TierLimits) -> u64 {
        match self {
            Tier::Owner => limits.owner,
            Tier::Allowlist => limits.allowlist,
            Tier::App => limits.app,
        }
    }
}

/// Outcome of an admitted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub key: String,
    pub tier: Tier,
    pub count: u64,
    pub limit: u64,
}

pub struct DynamicRateLimiter {
    store: Arc<dyn CoordinationStore>,
    directory: Option<Arc<dyn UserDirectory>>,
    config: RateLimitConfig,
    allowlist: HashSet<Address>,
}

impl DynamicRateLimiter {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        directory: Option<Arc<dyn UserDirectory>>,
        config: RateLimitConfig,
    ) -> Self {
        let allowlist = config
            .allowlist
            .iter()
            .filter_map(|a| match Address::from_str(a.trim()) {
                Ok(address) => Some(address),
                Err(e) => {
                    warn!(address = %a, error = %e, "Ignoring invalid allowlist address");
                    None
                }
            })
            .collect();
        Self {
            store,
            directory,
            config,
            allowlist,
        }
    }

    pub fn limits_for(&self, key: &str) -> TierLimits {
        self.config
            .actions
            .get(key)
            .copied()
            .unwrap_or(self.config.default)
    }

    pub async fn tier_of(&self, action: &DecodedAction, signer: Address) -> Tier {
        if let Some(directory) = &self.directory {
            if !action.user_id.is_zero() {
                match directory.wallet_of(action.user_id).await {
                    Ok(Some(wallet)) if wallet == signer => return Tier::Owner,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(user_id = %action.user_id, error = %e, "User lookup failed, not treating signer as owner");
                    }
                }
            }
        }
        if self.allowlist.contains(&signer) {
            Tier::Allowlist
        } else {
            Tier::App
        }
    }

    /// Count this request against its bucket; reject once the post-increment
    /// count exceeds the tier's cap.
    pub async fn admit(
        &self,
        action: &DecodedAction,
        signer: Address,
    ) -> Result<Admission, crate::Error> {
        let key = action.action_key();
        let tier = self.tier_of(action, signer).await;
        let limit = tier.limit(&self.limits_for(&key));
        let window = Duration::from_secs(self.config.window_secs);

        let counter = format!("rate-limit:{key}:{signer:#x}");
        let count = self.store.incr_with_expiry(&counter, window).await?;

        if count > limit {
            METRICS.rate_limited.fetch_add(1, Ordering::Relaxed);
            warn!(
                signer = %signer,
                action = %key,
                tier = tier.as_str(),
                count,
                limit,
                "Rate limit exceeded"
            );
            return Err(crate::Error::RateLimitExceeded {
                key,
                tier: tier.as_str(),
                limit,
                window_secs: self.config.window_secs,
            });
        }

        debug!(signer = %signer, action = %key, tier = tier.as_str(), count, limit, "Rate limit admitted");
        Ok(Admission {
            key,
            tier,
            count,
            limit,
        })
    }
}
