/// 缓存键模块
pub mod rate_limit_keys;

pub use rate_limit_keys::{api_key_rate_limit_key, ip_rate_limit_key};
