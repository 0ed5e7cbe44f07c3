use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::cache::models::rate_limit::CachedRateLimit;
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("rate limit window out of range: {0:?}")]
    WindowOutOfRange(Duration),

    #[error("rate limit must be greater than zero")]
    ZeroLimit,
}

/// 两种存储共用的参数检查，窗口必须为正且可用 chrono 表示
pub(crate) fn checked_window(
    limit: u32,
    window: Duration,
) -> Result<chrono::Duration, StoreError> {
    if limit == 0 {
        return Err(StoreError::ZeroLimit);
    }
    if window.is_zero() {
        return Err(StoreError::WindowOutOfRange(window));
    }
    chrono::Duration::from_std(window).map_err(|_| StoreError::WindowOutOfRange(window))
}

/// 一次计数的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterOutcome {
    pub record: CachedRateLimit,
    /// 本次请求是否计入并放行
    pub admitted: bool,
}

/// 限流计数存储
///
/// `increment_or_create` 必须是单个原子操作：窗口不存在或已过期时以计数 1 新建，
/// 计数未达上限时加一（不重置窗口），达到上限时不做任何修改。
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CachedRateLimit>, StoreError>;

    async fn increment_or_create(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<CounterOutcome, StoreError>;
}

/// 进程内计数存储，基于分片加锁的 DashMap
///
/// 过期记录在读取时视为不存在，并由 `purge_expired` 定期清理。
pub struct MemoryCounterStore {
    entries: DashMap<String, CachedRateLimit>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// 删除所有已过期的窗口，返回删除数量
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, record| !record.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<CachedRateLimit>, StoreError> {
        let now = self.clock.now();
        Ok(self
            .entries
            .get(key)
            .filter(|record| !record.is_expired(now))
            .map(|record| record.value().clone()))
    }

    async fn increment_or_create(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<CounterOutcome, StoreError> {
        let span = checked_window(limit, window)?;
        let now = self.clock.now();
        let reset_at = now
            .checked_add_signed(span)
            .ok_or(StoreError::WindowOutOfRange(window))?;

        // entry 持有分片写锁，读、判断、写在同一临界区内完成
        let mut record = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CachedRateLimit {
                key: key.to_string(),
                count: 0,
                reset_at,
            });

        if record.is_expired(now) {
            record.count = 0;
            record.reset_at = reset_at;
        }

        let admitted = record.count < limit;
        if admitted {
            record.count += 1;
        }

        Ok(CounterOutcome {
            record: record.value().clone(),
            admitted,
        })
    }
}
