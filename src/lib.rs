use std::sync::Arc;

use config::Config;
use infrastructure::{ApiKeyStore, TokenService};
use notification::PushSender;

pub mod cache;
pub mod clock;
pub mod common;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod middleware;
pub mod notification;
pub mod router;
pub mod routes;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub tokens: Arc<TokenService>,
    pub api_keys: Arc<dyn ApiKeyStore>,
    /// 未配置推送时为 None
    pub notifier: Option<Arc<dyn PushSender>>,
}
