// 缓存模块
// 限流计数的数据结构、键和存储实现

pub mod keys;
pub mod models;
pub mod operations;

pub use models::CachedRateLimit;
pub use operations::{CounterOutcome, CounterStore, MemoryCounterStore, RedisCounterStore, StoreError};
