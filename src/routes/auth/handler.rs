use axum::{
    extract::{Extension, Json, State},
    response::IntoResponse,
};

use crate::{
    AppState, error::AppError, infrastructure::ApiKeyOwner, utils::success_to_api_response,
};

use super::model::{IssueTokenRequest, IssueTokenResponse};

#[axum::debug_handler]
pub async fn issue_token(
    Extension(owner): Extension<ApiKeyOwner>,
    State(state): State<AppState>,
    Json(req): Json<IssueTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let issued = state.tokens.issue_token(&req.username, &req.user_id)?;

    tracing::info!(
        issuer = %owner.name,
        user_id = %issued.claims.sub,
        "token issued"
    );

    Ok(success_to_api_response(IssueTokenResponse {
        token: issued.token,
        token_type: "Bearer".to_string(),
        expires_at: issued.claims.exp,
    }))
}
