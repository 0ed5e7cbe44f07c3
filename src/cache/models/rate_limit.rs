use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 速率限制计数记录
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CachedRateLimit {
    pub key: String,
    pub count: u32,
    /// 当前窗口结束时间
    pub reset_at: DateTime<Utc>,
}

impl CachedRateLimit {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.reset_at <= now
    }

    /// 距离窗口重置的剩余时间，已过期时为零
    pub fn remaining(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.reset_at - now).to_std().unwrap_or_default()
    }
}
