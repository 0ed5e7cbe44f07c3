use std::sync::Arc;

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};

use crate::{
    AppState,
    middleware::{RateLimiter, auth_middleware, log_errors, rate_limit, require_api_key},
    routes,
};

/// 各路由组使用的限流器
#[derive(Clone)]
pub struct RouteLimiters {
    /// 令牌签发，按 API key 计数
    pub token: Arc<RateLimiter>,
    /// 用户接口，按来源 IP 计数
    pub user: Arc<RateLimiter>,
}

// layer 后加的先执行：限流 → 鉴权 → handler

fn token_routes(state: &AppState, limiter: Arc<RateLimiter>) -> Router<AppState> {
    Router::new()
        .route("/auth/token", post(routes::auth::issue_token))
        .layer(from_fn_with_state(state.clone(), require_api_key))
        .layer(from_fn_with_state(limiter, rate_limit))
}

fn user_routes(state: &AppState, limiter: Arc<RateLimiter>) -> Router<AppState> {
    Router::new()
        .route("/users/me", get(routes::user::me))
        .layer(from_fn_with_state(state.clone(), auth_middleware))
        .layer(from_fn_with_state(limiter, rate_limit))
}

fn notification_routes(state: &AppState) -> Option<Router<AppState>> {
    let sender = state.notifier.clone()?;
    Some(
        Router::new()
            .route(
                "/notifications/send",
                post(routes::notification::send_notification),
            )
            .route(
                "/notifications/send-batch",
                post(routes::notification::send_batch_notification),
            )
            .layer(from_fn_with_state(state.clone(), auth_middleware))
            .with_state(sender),
    )
}

// 创建主路由
pub fn create_router(state: AppState, limiters: RouteLimiters) -> Router {
    let mut api = Router::new()
        .merge(token_routes(&state, limiters.token))
        .merge(user_routes(&state, limiters.user));

    if let Some(notifications) = notification_routes(&state) {
        api = api.merge(notifications);
    } else {
        tracing::info!("Push notifications not configured, notification routes disabled");
    }

    let base = state.config.api_base_uri.trim_end_matches('/');
    let router = if base.is_empty() {
        api
    } else {
        Router::new().nest(base, api)
    };

    router.layer(from_fn(log_errors)).with_state(state)
}
