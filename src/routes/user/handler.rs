use axum::{extract::Extension, response::IntoResponse};

use crate::{infrastructure::Identity, utils::success_to_api_response};

use super::model::CurrentUserResponse;

#[axum::debug_handler]
pub async fn me(Extension(identity): Extension<Identity>) -> impl IntoResponse {
    success_to_api_response(CurrentUserResponse {
        user_id: identity.user_id,
        username: identity.username,
    })
}
