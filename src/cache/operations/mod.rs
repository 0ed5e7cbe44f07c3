/// 缓存操作
pub mod rate_limit;
pub mod redis_rate_limit;

pub use rate_limit::{CounterOutcome, CounterStore, MemoryCounterStore, StoreError};
pub use redis_rate_limit::RedisCounterStore;
