use std::sync::Arc;

use axum::{
    extract::{Extension, Json, State},
    response::IntoResponse,
};
use serde::Serialize;

use crate::{
    error::AppError,
    infrastructure::Identity,
    notification::{MultiDeviceNotificationRequest, NotificationRequest, PushSender, send_batch},
    utils::success_to_api_response,
};

#[derive(Debug, Serialize)]
pub struct SendNotificationResponse {
    pub message_id: String,
}

#[axum::debug_handler]
pub async fn send_notification(
    Extension(identity): Extension<Identity>,
    State(sender): State<Arc<dyn PushSender>>,
    Json(req): Json<NotificationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (content, device_token) = req.into_parts()?;
    let message_id = sender.send(&content, &device_token).await?;

    tracing::info!(user_id = %identity.user_id, %message_id, "notification sent");
    Ok(success_to_api_response(SendNotificationResponse { message_id }))
}

#[axum::debug_handler]
pub async fn send_batch_notification(
    Extension(identity): Extension<Identity>,
    State(sender): State<Arc<dyn PushSender>>,
    Json(req): Json<MultiDeviceNotificationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (content, device_tokens) = req.into_parts()?;
    let result = send_batch(sender.as_ref(), &content, &device_tokens).await;

    tracing::info!(
        user_id = %identity.user_id,
        success = result.success_count,
        failure = result.failure_count,
        "batch notification sent"
    );
    Ok(success_to_api_response(result))
}
