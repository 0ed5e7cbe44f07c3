pub mod api_key;
pub mod auth;

pub use api_key::{ApiKeyOwner, ApiKeyStore, StaticApiKeyStore};
pub use auth::{AuthError, Identity, IssuedToken, TokenClaims, TokenConfig, TokenService};
