//! Obfuscated title token issue
//!
//! POST /api/token

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::types::TitleId;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub title_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: i64,
}

/// POST /api/token
pub async fn issue_token(
    State(state): State<AppState>,
    Json(request): Json<TokenRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let title_id = TitleId::parse(&request.title_id).ok_or_else(|| {
        ApiError::BadRequest(format!("Invalid title id '{}'", request.title_id))
    })?;

    let now = chrono::Utc::now().timestamp();
    let token = state
        .signer
        .sign_at(&title_id, now)
        .ok_or_else(|| ApiError::ServiceUnavailable("Token secret is not configured".to_string()))?;
    let verified = state
        .signer
        .verify_at(&token, now)
        .map_err(|e| ApiError::Internal(format!("Issued token failed verification: {}", e)))?;

    Ok(Json(TokenResponse {
        token,
        expires_at: verified.expires_at,
    }))
}

pub fn token_routes() -> Router<AppState> {
    Router::new().route("/api/token", post(issue_token))
}
