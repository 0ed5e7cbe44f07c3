//! 推送通知：请求校验、FCM 消息组装和发送。

use thiserror::Error;

pub mod fcm;
pub mod model;

pub use fcm::{BatchResponse, FcmSender, PushSender, SendResult, send_batch};
pub use model::{
    MAX_MULTICAST_TOKENS, MultiDeviceNotificationRequest, NotificationContent, NotificationRequest,
};

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("image url must be an absolute http(s) url: {0}")]
    InvalidImageUrl(String),

    #[error("too many device tokens: {count} (max {max})")]
    TooManyTokens { count: usize, max: usize },

    #[error("push request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("push service rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

impl NotificationError {
    /// 请求本身不合法，而不是下游失败
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            NotificationError::MissingField(_)
                | NotificationError::InvalidImageUrl(_)
                | NotificationError::TooManyTokens { .. }
        )
    }
}
