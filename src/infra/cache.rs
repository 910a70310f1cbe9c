use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use uuid::Uuid;

#[derive(Clone)]
pub struct RedisCache {
    client: Client,
    conn: MultiplexedConnection,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(Self { client, conn })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Shared multiplexed connection; cloning it is cheap.
    pub fn connection(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}

pub fn unread_key(recipient: Uuid, scope: Uuid) -> String {
    format!("unread:{}:{}", recipient, scope)
}

/// Bumped on every invalidation so a reader that missed can tell whether its
/// recomputed count is still current.
pub fn unread_version_key(recipient: Uuid, scope: Uuid) -> String {
    format!("unread:ver:{}:{}", recipient, scope)
}

const VERSION_KEY_TTL_SECONDS: i64 = 86_400;

/// Result of a cache read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedCount {
    Hit(i64),
    /// Nothing cached. `version` must be handed back to [`UnreadCountCache::set`].
    Miss { version: u64 },
}

/// Short-lived unread counters keyed by (recipient, scope).
///
/// Entries are never updated in place: writers invalidate the key and the
/// next reader recomputes it from the store. Invalidation also advances a
/// version, and a recomputed count is only stored if the version is
/// unchanged since the miss, so a count read before a concurrent write is
/// never cached after it.
#[async_trait]
pub trait UnreadCountCache: Send + Sync {
    async fn get(&self, recipient: Uuid, scope: Uuid) -> Result<CachedCount>;

    /// Stores `count` unless the key was invalidated after `version` was
    /// read. Returns `false` only in that case.
    async fn set(
        &self,
        recipient: Uuid,
        scope: Uuid,
        count: i64,
        version: u64,
        ttl: Duration,
    ) -> Result<bool>;

    async fn invalidate(&self, recipient: Uuid, scope: Uuid) -> Result<()>;
}

// KEYS[1] = count key, KEYS[2] = version key
// ARGV[1] = version seen on miss, ARGV[2] = count, ARGV[3] = ttl seconds
const SET_IF_CURRENT: &str = r"
if (redis.call('GET', KEYS[2]) or '0') == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
    return 1
end
return 0
";

#[derive(Clone)]
pub struct RedisUnreadCache {
    cache: RedisCache,
    set_if_current: Script,
}

impl RedisUnreadCache {
    pub fn new(cache: RedisCache) -> Self {
        Self {
            cache,
            set_if_current: Script::new(SET_IF_CURRENT),
        }
    }
}

#[async_trait]
impl UnreadCountCache for RedisUnreadCache {
    async fn get(&self, recipient: Uuid, scope: Uuid) -> Result<CachedCount> {
        let mut conn = self.cache.connection();
        let (count, version): (Option<i64>, Option<u64>) = redis::cmd("MGET")
            .arg(unread_key(recipient, scope))
            .arg(unread_version_key(recipient, scope))
            .query_async(&mut conn)
            .await?;
        Ok(match count {
            Some(count) => CachedCount::Hit(count),
            None => CachedCount::Miss {
                version: version.unwrap_or(0),
            },
        })
    }

    async fn set(
        &self,
        recipient: Uuid,
        scope: Uuid,
        count: i64,
        version: u64,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.cache.connection();
        let stored: i64 = self
            .set_if_current
            .key(unread_key(recipient, scope))
            .key(unread_version_key(recipient, scope))
            .arg(version)
            .arg(count)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;
        Ok(stored == 1)
    }

    async fn invalidate(&self, recipient: Uuid, scope: Uuid) -> Result<()> {
        let mut conn = self.cache.connection();
        let version_key = unread_version_key(recipient, scope);
        redis::pipe()
            .atomic()
            .incr(&version_key, 1)
            .ignore()
            .expire(&version_key, VERSION_KEY_TTL_SECONDS)
            .ignore()
            .del(unread_key(recipient, scope))
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

/// Cache that never holds anything; every read goes to the store.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopUnreadCache;

#[async_trait]
impl UnreadCountCache for NoopUnreadCache {
    async fn get(&self, _recipient: Uuid, _scope: Uuid) -> Result<CachedCount> {
        Ok(CachedCount::Miss { version: 0 })
    }

    async fn set(
        &self,
        _recipient: Uuid,
        _scope: Uuid,
        _count: i64,
        _version: u64,
        _ttl: Duration,
    ) -> Result<bool> {
        Ok(true)
    }

    async fn invalidate(&self, _recipient: Uuid, _scope: Uuid) -> Result<()> {
        Ok(())
    }
}
