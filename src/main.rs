use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use api_guard::{
    AppState,
    cache::{CounterStore, MemoryCounterStore, RedisCounterStore},
    clock::SystemClock,
    config::Config,
    infrastructure::{StaticApiKeyStore, TokenConfig, TokenService},
    middleware::{RateLimitPolicy, RateLimiter},
    notification::{FcmSender, PushSender},
    router::{RouteLimiters, create_router},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// 内存计数清理周期
const PURGE_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置，缺少密钥等配置时直接退出
    let config = Config::from_env().expect("Failed to load configuration");

    let tokens = TokenService::new(TokenConfig::from(&config), Arc::new(SystemClock))
        .expect("Invalid token configuration");

    // 设置限流计数存储
    let store: Arc<dyn CounterStore> = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str()).expect("Failed to create Redis client");
            tracing::info!("Rate limit counters stored in Redis");
            Arc::new(RedisCounterStore::new(Arc::new(client)))
        }
        None => {
            let memory = Arc::new(MemoryCounterStore::new());
            let sweeper = memory.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(PURGE_INTERVAL);
                loop {
                    ticker.tick().await;
                    let purged = sweeper.purge_expired();
                    if purged > 0 {
                        tracing::debug!(purged, "expired rate limit windows removed");
                    }
                }
            });
            tracing::info!("Rate limit counters stored in memory");
            memory as Arc<dyn CounterStore>
        }
    };

    let api_keys = StaticApiKeyStore::new(config.api_keys.iter().map(|(o, k)| (o.clone(), k)));
    if api_keys.is_empty() {
        tracing::warn!("No API keys configured, token issuance will reject every caller");
    }

    let notifier: Option<Arc<dyn PushSender>> =
        match (&config.fcm_project_id, &config.fcm_access_token) {
            (Some(project), Some(token)) => Some(Arc::new(FcmSender::new(project, token))),
            _ => None,
        };

    let limiters = RouteLimiters {
        token: Arc::new(RateLimiter::new(
            store.clone(),
            RateLimitPolicy::api_key(
                config.api_key_rate_limit_requests,
                config.api_key_rate_limit_window(),
            ),
        )
        .expect("Invalid API key rate limit")),
        user: Arc::new(RateLimiter::new(
            store,
            RateLimitPolicy::client_ip(
                config.ip_rate_limit_requests,
                config.ip_rate_limit_window(),
                config.trust_proxy_headers,
            ),
        )
        .expect("Invalid IP rate limit")),
    };

    // 设置应用状态
    let state = AppState {
        config: Arc::new(config.clone()),
        tokens: Arc::new(tokens),
        api_keys: Arc::new(api_keys),
        notifier,
    };

    let router = create_router(state, limiters).layer(TraceLayer::new_for_http());

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(CorsLayer::permissive())
    };

    // 启动服务器
    let addr = SocketAddr::new(
        config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
