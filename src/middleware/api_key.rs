use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};

use crate::{AppState, error::AppError};

pub const API_KEY_HEADER: &str = "x-api-key";

/// 读取非空的 `X-Api-Key`
pub fn api_key_from(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
}

/// 要求合法 API key，成功后把 `ApiKeyOwner` 放进请求扩展
pub async fn require_api_key(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    // 请求体不是 Sync，不能跨 await 借用请求
    let Some(api_key) = api_key_from(req.headers()).map(str::to_owned) else {
        tracing::warn!(uri = %req.uri(), "request without API key");
        return Err(AppError::ApiKeyMissing);
    };

    let Some(owner) = state.api_keys.lookup(&api_key).await else {
        tracing::warn!(uri = %req.uri(), "unknown API key");
        return Err(AppError::ApiKeyRejected);
    };

    tracing::debug!(owner = %owner.name, "API key accepted");
    req.extensions_mut().insert(owner);
    Ok(next.run(req).await)
}
