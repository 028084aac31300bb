//! Redis-backed coordination store shared by every relayer process.

use super::CoordinationStore;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;
use tracing::info;

/// Deletes the lease only while it still carries the caller's token.
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// PEXPIRE the lease only while it still carries the caller's token.
const COMPARE_AND_EXPIRE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
end
return 0
"#;

/// INCR and start the window on the first hit, in one round trip.
const INCR_WITH_EXPIRY: &str = r#"
local count = redis.call("INCR", KEYS[1])
if count == 1 then
    redis.call("PEXPIRE", KEYS[1], ARGV[1])
end
return count
"#;

pub struct RedisStore {
    conn: ConnectionManager,
    compare_and_delete: Script,
    compare_and_expire: Script,
    incr_with_expiry: Script,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, crate::Error> {
        let client = redis::Client::open(url)
            .map_err(|e| crate::Error::Config(format!("Invalid redis URL: {e}")))?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to coordination store");
        Ok(Self {
            conn,
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
            compare_and_expire: Script::new(COMPARE_AND_EXPIRE),
            incr_with_expiry: Script::new(INCR_WITH_EXPIRY),
        })
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis().max(1) as u64
}

#[async_trait::async_trait]
impl CoordinationStore for RedisStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, crate::Error> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, crate::Error> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .compare_and_delete
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn renew_if_equals(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, crate::Error> {
        let mut conn = self.conn.clone();
        let renewed: i64 = self
            .compare_and_expire
            .key(key)
            .arg(value)
            .arg(millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(renewed == 1)
    }

    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<u64, crate::Error> {
        let mut conn = self.conn.clone();
        let count: u64 = self
            .incr_with_expiry
            .key(key)
            .arg(millis(window))
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, crate::Error> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), crate::Error> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn add_to_set(&self, set: &str, member: &str) -> Result<(), crate::Error> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("SADD")
            .arg(set)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove_from_set(&self, set: &str, member: &str) -> Result<(), crate::Error> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("SREM")
            .arg(set)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>, crate::Error> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(set)
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }
}
