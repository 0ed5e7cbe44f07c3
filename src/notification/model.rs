use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::NotificationError;

const ANDROID_ICON: &str = "ic_notification";
const ANDROID_COLOR: &str = "#f45342";
const APNS_SOUND: &str = "default";
const APNS_BADGE: u32 = 1;
const WEBPUSH_ICON: &str = "https://www.example.com/icon.png";
const DATE_KEY: &str = "Date";

/// FCM 单次多播的设备数上限
pub const MAX_MULTICAST_TOKENS: usize = 500;

/// 单设备推送请求
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
    #[serde(default = "Utc::now")]
    pub date: DateTime<Utc>,
    pub token: String,
}

/// 多设备推送请求
#[derive(Debug, Clone, Deserialize)]
pub struct MultiDeviceNotificationRequest {
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
    #[serde(default = "Utc::now")]
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub tokens: Vec<String>,
}

/// 各设备共用的推送内容
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
    pub date: DateTime<Utc>,
}

impl NotificationContent {
    fn validate(&self) -> Result<(), NotificationError> {
        if self.title.trim().is_empty() {
            return Err(NotificationError::MissingField("title"));
        }
        if self.body.trim().is_empty() {
            return Err(NotificationError::MissingField("body"));
        }
        if let Some(url) = &self.image_url {
            let parsed =
                Url::parse(url).map_err(|_| NotificationError::InvalidImageUrl(url.clone()))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(NotificationError::InvalidImageUrl(url.clone()));
            }
        }
        Ok(())
    }
}

impl NotificationRequest {
    pub fn into_parts(self) -> Result<(NotificationContent, String), NotificationError> {
        let content = NotificationContent {
            title: self.title,
            body: self.body,
            image_url: self.image_url.filter(|url| !url.is_empty()),
            date: self.date,
        };
        content.validate()?;
        if self.token.trim().is_empty() {
            return Err(NotificationError::MissingField("token"));
        }
        Ok((content, self.token))
    }
}

impl MultiDeviceNotificationRequest {
    pub fn into_parts(self) -> Result<(NotificationContent, Vec<String>), NotificationError> {
        let content = NotificationContent {
            title: self.title,
            body: self.body,
            image_url: self.image_url.filter(|url| !url.is_empty()),
            date: self.date,
        };
        content.validate()?;

        let tokens: Vec<String> = self
            .tokens
            .into_iter()
            .filter(|token| !token.trim().is_empty())
            .collect();
        if tokens.is_empty() {
            return Err(NotificationError::MissingField("tokens"));
        }
        if tokens.len() > MAX_MULTICAST_TOKENS {
            return Err(NotificationError::TooManyTokens {
                count: tokens.len(),
                max: MAX_MULTICAST_TOKENS,
            });
        }
        Ok((content, tokens))
    }
}

// FCM HTTP v1 消息体

#[derive(Debug, Serialize)]
pub struct SendRequest {
    pub message: Message,
}

#[derive(Debug, Serialize)]
pub struct Message {
    pub token: String,
    pub notification: Notification,
    pub android: AndroidConfig,
    pub apns: ApnsConfig,
    pub webpush: WebpushConfig,
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AndroidConfig {
    pub priority: &'static str,
    pub notification: AndroidNotification,
}

#[derive(Debug, Serialize)]
pub struct AndroidNotification {
    pub icon: &'static str,
    pub color: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ApnsConfig {
    pub payload: ApnsPayload,
}

#[derive(Debug, Serialize)]
pub struct ApnsPayload {
    pub aps: Aps,
}

#[derive(Debug, Serialize)]
pub struct Aps {
    pub alert: ApsAlert,
    pub badge: u32,
    pub sound: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ApsAlert {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct WebpushConfig {
    pub notification: WebpushNotification,
}

#[derive(Debug, Serialize)]
pub struct WebpushNotification {
    pub icon: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

/// 为单个设备组装完整消息
pub fn build_message(content: &NotificationContent, device_token: &str) -> Message {
    let data = BTreeMap::from([(DATE_KEY.to_string(), content.date.to_rfc3339())]);

    Message {
        token: device_token.to_string(),
        notification: Notification {
            title: content.title.clone(),
            body: content.body.clone(),
            image: content.image_url.clone(),
        },
        android: AndroidConfig {
            priority: "HIGH",
            notification: AndroidNotification {
                icon: ANDROID_ICON,
                color: ANDROID_COLOR,
            },
        },
        apns: ApnsConfig {
            payload: ApnsPayload {
                aps: Aps {
                    alert: ApsAlert {
                        title: content.title.clone(),
                        body: content.body.clone(),
                    },
                    badge: APNS_BADGE,
                    sound: APNS_SOUND,
                },
            },
        },
        webpush: WebpushConfig {
            notification: WebpushNotification {
                icon: WEBPUSH_ICON,
                image: content.image_url.clone(),
                title: content.title.clone(),
                body: content.body.clone(),
                data: data.clone(),
            },
        },
        data,
    }
}
