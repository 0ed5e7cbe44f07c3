use std::time::Duration;

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::cache::StoreError;
use crate::infrastructure::AuthError;
use crate::notification::NotificationError;
use crate::utils::{error_codes, error_to_api_response};

/// 请求级错误，只影响当前请求
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("caller key could not be derived")]
    KeyUnresolvable,

    #[error("missing API key")]
    ApiKeyMissing,

    #[error("API key rejected")]
    ApiKeyRejected,

    #[error("rate limit exceeded, retry after {}s", retry_after_secs(.retry_after))]
    RateLimitExceeded { retry_after: Duration },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Notification(#[from] NotificationError),
}

/// 向上取整到秒，至少 1 秒
pub fn retry_after_secs(retry_after: &Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Auth(e) if e.is_validation_error() => StatusCode::UNAUTHORIZED,
            AppError::Auth(AuthError::EmptyClaim(_)) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::KeyUnresolvable | AppError::ApiKeyMissing | AppError::ApiKeyRejected => {
                StatusCode::UNAUTHORIZED
            }
            AppError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Notification(e) if e.is_invalid_request() => StatusCode::BAD_REQUEST,
            AppError::Notification(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            AppError::Auth(e) => e.reason(),
            AppError::KeyUnresolvable => "key_unresolvable",
            AppError::ApiKeyMissing => "api_key_missing",
            AppError::ApiKeyRejected => "api_key_rejected",
            AppError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            AppError::Store(_) => "store_unavailable",
            AppError::Notification(e) if e.is_invalid_request() => "invalid_notification",
            AppError::Notification(_) => "notification_failed",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let reason = self.reason();

        let (code, msg) = match &self {
            AppError::Auth(AuthError::TokenExpired) => {
                (error_codes::TOKEN_EXPIRED, "令牌已过期，请刷新".to_string())
            }
            AppError::Auth(AuthError::EmptyClaim(claim)) => (
                error_codes::VALIDATION_ERROR,
                format!("{} 不能为空", claim),
            ),
            AppError::Auth(e) if e.is_validation_error() => {
                (error_codes::AUTH_FAILED, "未授权访问".to_string())
            }
            AppError::KeyUnresolvable => (
                error_codes::AUTH_FAILED,
                "无法识别请求来源".to_string(),
            ),
            AppError::ApiKeyMissing | AppError::ApiKeyRejected => {
                (error_codes::API_KEY_INVALID, "API key 无效".to_string())
            }
            AppError::RateLimitExceeded { retry_after } => (
                error_codes::RATE_LIMIT,
                format!(
                    "请求过于频繁，请在{}秒后重试",
                    retry_after_secs(retry_after)
                ),
            ),
            AppError::Notification(e) if e.is_invalid_request() => {
                (error_codes::VALIDATION_ERROR, e.to_string())
            }
            AppError::Notification(e) => {
                tracing::error!("Notification delivery failed: {}", e);
                (error_codes::UPSTREAM_ERROR, "推送发送失败".to_string())
            }
            // 内部细节只写日志，不返回给客户端
            AppError::Auth(e) => {
                tracing::error!("Token service failure: {}", e);
                (error_codes::INTERNAL_ERROR, "内部服务器错误".to_string())
            }
            AppError::Store(e) => {
                tracing::error!("Rate limit store failure: {}", e);
                (error_codes::INTERNAL_ERROR, "内部服务器错误".to_string())
            }
        };

        let mut response = (status, error_to_api_response::<()>(code, reason, msg)).into_response();

        if let AppError::RateLimitExceeded { retry_after } = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs(retry_after).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}
