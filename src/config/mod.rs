use std::env;
use std::time::Duration;

use thiserror::Error;

/// 启动配置错误，出现即终止启动
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("JWT secret must not be empty")]
    EmptySecret,

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{0} is too large")]
    OutOfRange(&'static str),
}

/// 令牌有效期和限流窗口的上限
pub const MAX_DURATION: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

/// 时钟偏差上限
pub const MAX_LEEWAY: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_lifetime_hours: u64,
    pub jwt_leeway_secs: u64,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub redis_url: Option<String>,
    pub ip_rate_limit_requests: u32,
    pub ip_rate_limit_window_secs: u64,
    pub api_key_rate_limit_requests: u32,
    pub api_key_rate_limit_window_secs: u64,
    pub trust_proxy_headers: bool,
    /// `owner:key` 形式的 API key 列表
    pub api_keys: Vec<(String, String)>,
    pub fcm_project_id: Option<String>,
    pub fcm_access_token: Option<String>,
}

const DEFAULT_JWT_LIFETIME_HOURS: u64 = 10;

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 从任意键值来源读取配置，`from_env` 与测试共用
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| lookup(key).ok_or(ConfigError::Missing(key));

        let jwt_secret = required("JWT_SECRET")?;
        if jwt_secret.trim().is_empty() {
            return Err(ConfigError::EmptySecret);
        }

        let config = Config {
            jwt_secret,
            jwt_issuer: required("JWT_ISSUER")?,
            jwt_audience: required("JWT_AUDIENCE")?,
            jwt_lifetime_hours: parse_or(
                &lookup,
                "JWT_LIFETIME_HOURS",
                DEFAULT_JWT_LIFETIME_HOURS,
            )?,
            jwt_leeway_secs: parse_or(&lookup, "JWT_LEEWAY_SECS", 0)?,
            server_host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port: parse_or(&lookup, "SERVER_PORT", 3000)?,
            api_base_uri: lookup("API_BASE_URI").unwrap_or_else(|| "/api".to_string()),
            redis_url: lookup("REDIS_URL").filter(|url| !url.trim().is_empty()),
            ip_rate_limit_requests: parse_or(&lookup, "IP_RATE_LIMIT_REQUESTS", 100)?,
            ip_rate_limit_window_secs: parse_or(&lookup, "IP_RATE_LIMIT_WINDOW", 60)?,
            api_key_rate_limit_requests: parse_or(&lookup, "API_KEY_RATE_LIMIT_REQUESTS", 20)?,
            api_key_rate_limit_window_secs: parse_or(&lookup, "API_KEY_RATE_LIMIT_WINDOW", 100)?,
            trust_proxy_headers: parse_or(&lookup, "TRUST_PROXY_HEADERS", false)?,
            api_keys: parse_api_keys(lookup("API_KEYS").as_deref())?,
            fcm_project_id: lookup("FCM_PROJECT_ID").filter(|v| !v.is_empty()),
            fcm_access_token: lookup("FCM_ACCESS_TOKEN").filter(|v| !v.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_lifetime_hours == 0 {
            return Err(ConfigError::Zero("JWT_LIFETIME_HOURS"));
        }
        if self.ip_rate_limit_requests == 0 {
            return Err(ConfigError::Zero("IP_RATE_LIMIT_REQUESTS"));
        }
        if self.ip_rate_limit_window_secs == 0 {
            return Err(ConfigError::Zero("IP_RATE_LIMIT_WINDOW"));
        }
        if self.api_key_rate_limit_requests == 0 {
            return Err(ConfigError::Zero("API_KEY_RATE_LIMIT_REQUESTS"));
        }
        if self.api_key_rate_limit_window_secs == 0 {
            return Err(ConfigError::Zero("API_KEY_RATE_LIMIT_WINDOW"));
        }

        let bounded = [
            ("JWT_LIFETIME_HOURS", self.jwt_lifetime(), MAX_DURATION),
            ("JWT_LEEWAY_SECS", self.jwt_leeway(), MAX_LEEWAY),
            ("IP_RATE_LIMIT_WINDOW", self.ip_rate_limit_window(), MAX_DURATION),
            (
                "API_KEY_RATE_LIMIT_WINDOW",
                self.api_key_rate_limit_window(),
                MAX_DURATION,
            ),
        ];
        for (key, value, max) in bounded {
            if value > max {
                return Err(ConfigError::OutOfRange(key));
            }
        }
        Ok(())
    }

    pub fn jwt_lifetime(&self) -> Duration {
        Duration::from_secs(self.jwt_lifetime_hours.saturating_mul(3600))
    }

    pub fn jwt_leeway(&self) -> Duration {
        Duration::from_secs(self.jwt_leeway_secs)
    }

    pub fn ip_rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.ip_rate_limit_window_secs)
    }

    pub fn api_key_rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.api_key_rate_limit_window_secs)
    }

    pub fn fcm_enabled(&self) -> bool {
        self.fcm_project_id.is_some() && self.fcm_access_token.is_some()
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        // 兼容 "10h" 这种写法
        Some(raw) => raw
            .trim()
            .trim_end_matches(['h', 's'])
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn parse_api_keys(raw: Option<&str>) -> Result<Vec<(String, String)>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };

    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((owner, key)) if !owner.is_empty() && !key.is_empty() => {
                Ok((owner.to_string(), key.to_string()))
            }
            _ => Err(ConfigError::Invalid {
                key: "API_KEYS",
                value: entry.to_string(),
            }),
        })
        .collect()
}
