mod api_key;
mod auth;
mod error_handler;
mod rate_limit;

pub use api_key::{API_KEY_HEADER, api_key_from, require_api_key};
pub use auth::{auth_middleware, bearer_token};
pub use error_handler::log_errors;
pub use rate_limit::{KeyStrategy, RateLimitDecision, RateLimitPolicy, RateLimiter, rate_limit};
