use serde::{Deserialize, Serialize};

/// 上游登录流程完成凭证校验后请求签发令牌
#[derive(Debug, Deserialize)]
pub struct IssueTokenRequest {
    pub username: String,
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IssueTokenResponse {
    pub token: String,
    pub token_type: String,
    /// Unix 秒
    pub expires_at: i64,
}
