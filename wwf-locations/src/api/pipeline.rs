//! Pipeline control
//!
//! POST /api/pipeline/:id, GET /api/pipeline/progress, GET /api/pipeline/result
//!
//! Every route is scoped to the client session named by the `x-session-id`
//! header or the `session` query parameter (EventSource cannot set headers).

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::services::pipeline::RunReport;
use crate::services::pipeline_sessions::is_valid_session_id;
use crate::services::progress_broadcaster::ProgressSnapshot;
use crate::AppState;

pub const SESSION_HEADER: &str = "x-session-id";

/// Client session a pipeline request belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Deserialize)]
struct SessionQuery {
    session: Option<String>,
}

#[async_trait]
impl<S> FromRequestParts<S> for SessionId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string());
        let raw = match from_header {
            Some(value) => value,
            None => Query::<SessionQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(query)| query.session)
                .ok_or_else(|| {
                    ApiError::BadRequest(format!(
                        "Session id is required ({} header or session query parameter)",
                        SESSION_HEADER
                    ))
                })?,
        };

        if !is_valid_session_id(&raw) {
            return Err(ApiError::BadRequest(format!("Invalid session id '{}'", raw)));
        }
        Ok(SessionId(raw))
    }
}

/// POST /api/pipeline/:id response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPipelineResponse {
    pub session_id: String,
    pub run_id: Uuid,
    pub target_id: String,
}

/// POST /api/pipeline/:id
///
/// Starts a run in the background and returns 202. A run of the same session
/// still in flight is superseded; other sessions are untouched.
pub async fn start_pipeline(
    State(state): State<AppState>,
    session: SessionId,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<StartPipelineResponse>)> {
    if id.trim().is_empty() {
        return Err(ApiError::BadRequest("Movie id is required".to_string()));
    }

    let runner = state.sessions.get_or_create(session.as_str()).await;
    let ticket = runner.spawn(&id);
    Ok((
        StatusCode::ACCEPTED,
        Json(StartPipelineResponse {
            session_id: session.0,
            run_id: ticket.run_id(),
            target_id: ticket.target_id().to_string(),
        }),
    ))
}

/// GET /api/pipeline/progress
///
/// Idle snapshot for a session that never started a run.
pub async fn get_progress(
    State(state): State<AppState>,
    session: SessionId,
) -> Json<ProgressSnapshot> {
    let snapshot = match state.sessions.get(session.as_str()).await {
        Some(runner) => runner.broadcaster().snapshot(),
        None => ProgressSnapshot::default(),
    };
    Json(snapshot)
}

/// GET /api/pipeline/result
pub async fn get_result(
    State(state): State<AppState>,
    session: SessionId,
) -> ApiResult<Json<RunReport>> {
    let report = match state.sessions.get(session.as_str()).await {
        Some(runner) => runner.last_report().await,
        None => None,
    };
    report
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No pipeline run has finished".to_string()))
}

pub fn pipeline_routes() -> Router<AppState> {
    Router::new()
        .route("/api/pipeline/:id", post(start_pipeline))
        .route("/api/pipeline/progress", get(get_progress))
        .route("/api/pipeline/result", get(get_result))
}
