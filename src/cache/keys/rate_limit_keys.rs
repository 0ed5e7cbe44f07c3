/// API key 限流缓存键前缀
const API_KEY_RATE_LIMIT_PREFIX: &str = "rate_limit:api_key:";

/// IP 限流缓存键前缀
const IP_RATE_LIMIT_PREFIX: &str = "rate_limit:ip:";

/// 生成 API key 限流缓存键
pub fn api_key_rate_limit_key(api_key: &str) -> String {
    format!("{}{}", API_KEY_RATE_LIMIT_PREFIX, api_key)
}

/// 生成 IP 限流缓存键
pub fn ip_rate_limit_key(ip: &str) -> String {
    format!("{}{}", IP_RATE_LIMIT_PREFIX, ip)
}
