//! Server-Sent Events for pipeline progress

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use wwf_common::sse::create_event_sse_stream;

use crate::api::pipeline::SessionId;
use crate::AppState;

/// GET /api/pipeline/events?session=<id>
///
/// Streams the session's PipelineStarted, PipelineProgress,
/// PipelineCompleted and PipelineFailed events.
pub async fn pipeline_event_stream(
    State(state): State<AppState>,
    session: SessionId,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    create_event_sse_stream("wwf-locations", &state.event_bus, move |event| {
        event.session_id() == Some(session.as_str())
    })
}
