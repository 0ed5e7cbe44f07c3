use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{Config, ConfigError, MAX_DURATION, MAX_LEEWAY};

/// 令牌签发与校验所需的配置，进程启动时构造一次
#[derive(Clone)]
pub struct TokenConfig {
    pub secret: Vec<u8>,
    pub issuer: String,
    pub audience: String,
    pub lifetime: Duration,
    /// nbf/exp 校验时允许的时钟偏差
    pub leeway: Duration,
}

impl TokenConfig {
    pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(10 * 3600);

    pub fn new(secret: impl Into<Vec<u8>>, issuer: &str, audience: &str) -> Self {
        Self {
            secret: secret.into(),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            lifetime: Self::DEFAULT_LIFETIME,
            leeway: Duration::ZERO,
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }
}

impl From<&Config> for TokenConfig {
    fn from(config: &Config) -> Self {
        TokenConfig::new(
            config.jwt_secret.as_bytes(),
            &config.jwt_issuer,
            &config.jwt_audience,
        )
        .with_lifetime(config.jwt_lifetime())
        .with_leeway(config.jwt_leeway())
    }
}

// 不把密钥打进日志
impl std::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("lifetime", &self.lifetime)
            .field("leeway", &self.leeway)
            .finish()
    }
}

/// 令牌载荷，时间戳均为 UTC Unix 秒
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,  // 用户ID
    pub name: String, // 用户名
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub aud: String,
    pub iss: String,
}

/// 校验通过后挂到请求上的调用者身份
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("invalid token signature")]
    SignatureInvalid,

    #[error("token issuer mismatch")]
    IssuerMismatch,

    #[error("token audience mismatch")]
    AudienceMismatch,

    #[error("token has expired")]
    TokenExpired,

    #[error("token is not valid yet")]
    TokenNotYetValid,

    #[error("claim must not be empty: {0}")]
    EmptyClaim(&'static str),

    #[error("token encoding failed: {0}")]
    Encoding(String),
}

impl AuthError {
    /// 返回给客户端的机器可读原因
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::MalformedToken(_) => "malformed_token",
            AuthError::SignatureInvalid => "signature_invalid",
            AuthError::IssuerMismatch => "issuer_mismatch",
            AuthError::AudienceMismatch => "audience_mismatch",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenNotYetValid => "token_not_yet_valid",
            AuthError::EmptyClaim(_) => "invalid_claims",
            AuthError::Encoding(_) => "token_encoding_failed",
        }
    }

    /// 是否属于请求方可见的校验失败（401）
    pub fn is_validation_error(&self) -> bool {
        !matches!(self, AuthError::EmptyClaim(_) | AuthError::Encoding(_))
    }
}

/// 签发结果
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: TokenClaims,
}

/// JWT 签发与校验，无内部可变状态，可在请求间共享
#[derive(Clone)]
pub struct TokenService {
    config: Arc<TokenConfig>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(config: TokenConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        if config.secret.is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        if config.lifetime.is_zero() {
            return Err(ConfigError::Zero("token lifetime"));
        }
        if config.lifetime > MAX_DURATION {
            return Err(ConfigError::OutOfRange("token lifetime"));
        }
        if config.leeway > MAX_LEEWAY {
            return Err(ConfigError::OutOfRange("token leeway"));
        }

        // 库只负责验签，iss/aud/时间窗口按固定顺序自行检查
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Ok(Self {
            encoding_key: EncodingKey::from_secret(&config.secret),
            decoding_key: DecodingKey::from_secret(&config.secret),
            config: Arc::new(config),
            validation,
            clock,
        })
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// 按当前时间构造载荷
    pub fn build_claims(&self, username: &str, user_id: &str) -> Result<TokenClaims, AuthError> {
        if username.trim().is_empty() {
            return Err(AuthError::EmptyClaim("username"));
        }
        if user_id.trim().is_empty() {
            return Err(AuthError::EmptyClaim("user_id"));
        }

        let now = self.clock.now().timestamp();
        let exp = i64::try_from(self.config.lifetime.as_secs())
            .ok()
            .and_then(|lifetime| now.checked_add(lifetime))
            .ok_or_else(|| AuthError::Encoding("token lifetime out of range".into()))?;

        Ok(TokenClaims {
            sub: user_id.to_string(),
            name: username.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            nbf: now,
            exp,
            aud: self.config.audience.clone(),
            iss: self.config.issuer.clone(),
        })
    }

    pub fn sign(&self, claims: &TokenClaims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::Encoding(e.to_string()))
    }

    pub fn issue_token(&self, username: &str, user_id: &str) -> Result<IssuedToken, AuthError> {
        let claims = self.build_claims(username, user_id)?;
        let token = self.sign(&claims)?;
        tracing::debug!(user_id = %claims.sub, jti = %claims.jti, "issued token");
        Ok(IssuedToken { token, claims })
    }

    /// 签发紧凑格式的令牌字符串
    pub fn issue(&self, username: &str, user_id: &str) -> Result<String, AuthError> {
        self.issue_token(username, user_id).map(|issued| issued.token)
    }

    /// 仅验签并解出载荷，不检查 iss/aud/时间
    pub fn decode_claims(&self, token: &str) -> Result<TokenClaims, AuthError> {
        decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(map_jwt_error)
    }

    /// 校验顺序：签名 → 签发方 → 受众 → 时间窗口
    pub fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = self.decode_claims(token)?;

        if claims.iss != self.config.issuer {
            return Err(AuthError::IssuerMismatch);
        }
        if claims.aud != self.config.audience {
            return Err(AuthError::AudienceMismatch);
        }

        let now = self.clock.now().timestamp();
        let leeway = i64::try_from(self.config.leeway.as_secs()).unwrap_or(i64::MAX);
        if now.saturating_add(leeway) < claims.nbf {
            return Err(AuthError::TokenNotYetValid);
        }
        if now.saturating_sub(leeway) > claims.exp {
            return Err(AuthError::TokenExpired);
        }

        Ok(Identity {
            user_id: claims.sub,
            username: claims.name,
        })
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => AuthError::SignatureInvalid,
        ErrorKind::InvalidToken => AuthError::MalformedToken("not a compact JWS".into()),
        ErrorKind::Base64(_) => AuthError::MalformedToken("invalid base64 encoding".into()),
        ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
            AuthError::MalformedToken("invalid claims payload".into())
        }
        _ => AuthError::MalformedToken(err.to_string()),
    }
}
