use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use serde::{Deserialize, Serialize};

use super::NotificationError;
use super::model::{NotificationContent, SendRequest, build_message};

const FCM_BASE_URL: &str = "https://fcm.googleapis.com";

/// 批量发送时同时在途的请求数
const MAX_CONCURRENT_SENDS: usize = 32;

/// 推送发送接口，投递与重试由下游负责
#[async_trait]
pub trait PushSender: Send + Sync {
    /// 发送到单个设备，返回消息 ID
    async fn send(
        &self,
        content: &NotificationContent,
        device_token: &str,
    ) -> Result<String, NotificationError>;
}

/// 单个设备的发送结果
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SendResult {
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BatchResponse {
    pub success_count: usize,
    pub failure_count: usize,
    pub responses: Vec<SendResult>,
}

/// 并发发送到多个设备，单个失败不影响其余设备，结果顺序与输入一致
pub async fn send_batch(
    sender: &dyn PushSender,
    content: &NotificationContent,
    device_tokens: &[String],
) -> BatchResponse {
    let results: Vec<_> = stream::iter(0..device_tokens.len())
        .map(|i| async move {
            let token = &device_tokens[i];
            (token, sender.send(content, token).await)
        })
        .buffered(MAX_CONCURRENT_SENDS)
        .collect()
        .await;

    let responses: Vec<SendResult> = results
        .into_iter()
        .map(|(token, result)| match result {
            Ok(message_id) => SendResult {
                token: token.clone(),
                message_id: Some(message_id),
                error: None,
            },
            Err(e) => {
                tracing::warn!("Push to device failed: {}", e);
                SendResult {
                    token: token.clone(),
                    message_id: None,
                    error: Some(e.to_string()),
                }
            }
        })
        .collect();

    let success_count = responses.iter().filter(|r| r.message_id.is_some()).count();
    BatchResponse {
        success_count,
        failure_count: responses.len() - success_count,
        responses,
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    name: String,
}

/// FCM HTTP v1 发送器，access token 由外部获取并注入
pub struct FcmSender {
    client: reqwest::Client,
    endpoint: String,
    access_token: String,
}

impl FcmSender {
    pub fn new(project_id: &str, access_token: &str) -> Self {
        Self::with_base_url(FCM_BASE_URL, project_id, access_token)
    }

    pub fn with_base_url(base_url: &str, project_id: &str, access_token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!(
                "{}/v1/projects/{}/messages:send",
                base_url.trim_end_matches('/'),
                project_id
            ),
            access_token: access_token.to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl PushSender for FcmSender {
    async fn send(
        &self,
        content: &NotificationContent,
        device_token: &str,
    ) -> Result<String, NotificationError> {
        let request = SendRequest {
            message: build_message(content, device_token),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let sent: SendResponse = response.json().await?;
        tracing::debug!(message_id = %sent.name, "push notification accepted");
        Ok(sent.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailOn(&'static str);

    #[async_trait]
    impl PushSender for FailOn {
        async fn send(
            &self,
            _content: &NotificationContent,
            device_token: &str,
        ) -> Result<String, NotificationError> {
            if device_token == self.0 {
                Err(NotificationError::Rejected {
                    status: 404,
                    body: "UNREGISTERED".into(),
                })
            } else {
                Ok(format!("projects/demo/messages/{}", device_token))
            }
        }
    }

    fn content() -> NotificationContent {
        NotificationContent {
            title: "t".into(),
            body: "b".into(),
            image_url: None,
            date: Utc::now(),
        }
    }

    #[test]
    fn endpoint_built_from_project() {
        let sender = FcmSender::with_base_url("http://localhost:9099/", "demo", "token");
        assert_eq!(
            sender.endpoint(),
            "http://localhost:9099/v1/projects/demo/messages:send"
        );
        assert_eq!(
            FcmSender::new("demo", "token").endpoint(),
            "https://fcm.googleapis.com/v1/projects/demo/messages:send"
        );
    }

    /// 记录同时在途的最大请求数
    #[derive(Default)]
    struct Gauge {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl PushSender for Gauge {
        async fn send(
            &self,
            _content: &NotificationContent,
            device_token: &str,
        ) -> Result<String, NotificationError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(device_token.to_string())
        }
    }

    #[tokio::test]
    async fn batch_concurrency_is_bounded() {
        let gauge = Gauge::default();
        let tokens: Vec<String> = (0..200).map(|i| format!("device-{i}")).collect();
        let result = send_batch(&gauge, &content(), &tokens).await;

        assert_eq!(result.success_count, 200);
        assert_eq!(result.responses[199].message_id.as_deref(), Some("device-199"));
        let peak = gauge.peak.load(Ordering::SeqCst);
        assert!(peak > 1 && peak <= MAX_CONCURRENT_SENDS, "peak {peak}");
    }

    #[tokio::test]
    async fn batch_counts_partial_failures() {
        let tokens = vec!["a".to_string(), "dead".to_string(), "c".to_string()];
        let result = send_batch(&FailOn("dead"), &content(), &tokens).await;

        assert_eq!(result.success_count, 2);
        assert_eq!(result.failure_count, 1);
        assert_eq!(result.responses[1].token, "dead");
        assert!(result.responses[1].error.as_deref().unwrap().contains("404"));
        assert_eq!(
            result.responses[2].message_id.as_deref(),
            Some("projects/demo/messages/c")
        );
    }
}
