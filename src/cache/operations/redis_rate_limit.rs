use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{Client as RedisClient, Script};

use crate::cache::models::rate_limit::CachedRateLimit;
use crate::cache::operations::rate_limit::{
    CounterOutcome, CounterStore, StoreError, checked_window,
};

// 读取、比较、自增在 Redis 内一次完成，多进程共享计数时不会丢失
// 返回 {count, 剩余毫秒, 是否放行}
const INCREMENT_OR_CREATE: &str = r#"
local current = redis.call('GET', KEYS[1])
local limit = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
if not current then
    redis.call('SET', KEYS[1], 1, 'PX', window_ms)
    return {1, window_ms, 1}
end
current = tonumber(current)
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], window_ms)
    ttl = window_ms
end
if current >= limit then
    return {current, ttl, 0}
end
redis.call('INCR', KEYS[1])
return {current + 1, ttl, 1}
"#;

/// 基于 Redis 的计数存储，窗口过期交给 key 的 TTL
pub struct RedisCounterStore {
    redis: Arc<RedisClient>,
    script: Script,
}

impl RedisCounterStore {
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self {
            redis,
            script: Script::new(INCREMENT_OR_CREATE),
        }
    }
}

fn record_from(key: &str, count: i64, ttl_ms: i64) -> CachedRateLimit {
    CachedRateLimit {
        key: key.to_string(),
        count: u32::try_from(count).unwrap_or(u32::MAX),
        reset_at: Utc::now()
            .checked_add_signed(chrono::Duration::milliseconds(ttl_ms.max(0)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC),
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<Option<CachedRateLimit>, StoreError> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let (count, ttl_ms): (Option<i64>, i64) = redis::pipe()
            .atomic()
            .get(key)
            .pttl(key)
            .query_async(&mut conn)
            .await?;

        Ok(count.map(|count| record_from(key, count, ttl_ms)))
    }

    async fn increment_or_create(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<CounterOutcome, StoreError> {
        let window_ms = checked_window(limit, window)?.num_milliseconds();
        // 不足 1 毫秒的窗口在 Redis 里无法表示
        if window_ms == 0 {
            return Err(StoreError::WindowOutOfRange(window));
        }

        let mut conn = self.redis.get_multiplexed_async_connection().await?;

        let (count, ttl_ms, admitted): (i64, i64, i64) = self
            .script
            .key(key)
            .arg(limit)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;

        Ok(CounterOutcome {
            record: record_from(key, count, ttl_ms),
            admitted: admitted == 1,
        })
    }
}
