//! Shared coordination store.
//!
//! Every cross-process mutation (wallet leases, rate-limit counters, dedup
//! markers, in-flight wormhole records) goes through these atomic primitives.

mod memory;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use std::time::Duration;

#[async_trait::async_trait]
pub trait CoordinationStore: Send + Sync {
    /// `SET key value NX PX ttl`. Returns whether the key was set.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, crate::Error>;

    /// Delete `key` only if it still holds `value`.
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, crate::Error>;

    /// Reset the expiry of `key` to `ttl` only if it still holds `value`.
    /// Returns false once the key expired or changed hands.
    async fn renew_if_equals(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, crate::Error>;

    /// Atomic increment. The window starts when the counter is created.
    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<u64, crate::Error>;

    async fn get(&self, key: &str) -> Result<Option<String>, crate::Error>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), crate::Error>;

    async fn add_to_set(&self, set: &str, member: &str) -> Result<(), crate::Error>;

    async fn remove_from_set(&self, set: &str, member: &str) -> Result<(), crate::Error>;

    async fn set_members(&self, set: &str) -> Result<Vec<String>, crate::Error>;
}
