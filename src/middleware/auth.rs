use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};

use crate::{AppState, error::AppError, infrastructure::AuthError};

/// 从 `Authorization: Bearer <token>` 中取出令牌
pub fn bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    if !headers.contains_key(AUTHORIZATION) {
        return Err(AuthError::MissingToken);
    }

    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|Authorization(bearer)| bearer.token().to_string())
        .ok_or_else(|| AuthError::MalformedToken("expected a bearer token".into()))
}

/// 校验令牌，成功后把 `Identity` 放进请求扩展，失败直接拒绝
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let identity = bearer_token(req.headers())
        .and_then(|token| state.tokens.validate(&token))
        .map_err(|e| {
            tracing::warn!(reason = e.reason(), uri = %req.uri(), "rejected bearer token");
            e
        })?;

    tracing::debug!(user_id = %identity.user_id, "authenticated request");
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
