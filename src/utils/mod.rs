use axum::Json;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::common::ApiResponse;

pub fn success_to_api_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: error_codes::SUCCESS,
        msg: "success".into(),
        reason: None,
        resp_data: Some(data),
    })
}

pub fn error_to_api_response<T>(code: i32, reason: &str, msg: String) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code,
        msg,
        reason: Some(reason.to_string()),
        resp_data: None,
    })
}

/// 十六进制 SHA-256 摘要，API key 只以摘要形式驻留内存
pub fn sha256_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

pub mod error_codes {
    pub const SUCCESS: i32 = 0;
    pub const VALIDATION_ERROR: i32 = 1000;
    pub const AUTH_FAILED: i32 = 1002;
    pub const TOKEN_EXPIRED: i32 = 1006;
    pub const API_KEY_INVALID: i32 = 1007;
    pub const RATE_LIMIT: i32 = 1005;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const UPSTREAM_ERROR: i32 = 5002;
}
