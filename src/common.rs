use serde::{Deserialize, Serialize};

/// 统一的接口响应结构
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    /// 机器可读的失败原因，例如 `token_expired`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resp_data: Option<T>,
}
