//! Server-Sent Events (SSE) utilities
//!
//! Shared SSE implementations for WWF services.

use crate::events::{EventBus, WwfEvent};
use axum::response::sse::{Event, Sse};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Heartbeat interval for every SSE stream
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// One item of an SSE stream before it is rendered
#[derive(Debug, Clone)]
pub enum SseFrame {
    Connected,
    Heartbeat,
    Event(WwfEvent),
}

impl SseFrame {
    fn into_event(self) -> Option<Event> {
        match self {
            SseFrame::Connected => Some(Event::default().event("ConnectionStatus").data("connected")),
            SseFrame::Heartbeat => Some(Event::default().comment("heartbeat")),
            SseFrame::Event(event) => to_sse_event(&event),
        }
    }
}

/// Convert an event into an SSE frame (`event:` = event type, `data:` = JSON)
pub fn to_sse_event(event: &WwfEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event(event.event_type()).data(json)),
        Err(e) => {
            warn!("SSE: Failed to serialize event {}: {}", event.event_type(), e);
            None
        }
    }
}

/// Frames for one client: `Connected`, then matching events, with a
/// heartbeat on a fixed interval that event traffic does not reset.
/// Lagged receivers skip the dropped events and keep streaming.
pub fn event_frames<F>(
    service_name: &'static str,
    mut rx: broadcast::Receiver<WwfEvent>,
    filter: F,
) -> impl Stream<Item = SseFrame> + Send + 'static
where
    F: Fn(&WwfEvent) -> bool + Send + Sync + 'static,
{
    async_stream::stream! {
        yield SseFrame::Connected;

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    debug!("SSE: Sending heartbeat");
                    yield SseFrame::Heartbeat;
                }

                received = rx.recv() => {
                    match received {
                        Ok(event) => {
                            if filter(&event) {
                                debug!("SSE: Broadcasting {} event", event.event_type());
                                yield SseFrame::Event(event);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("SSE: {} client lagged, skipped {} events", service_name, skipped);
                        }
                        Err(RecvError::Closed) => {
                            info!("SSE: {} event bus closed, ending stream", service_name);
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Stream EventBus events matching `filter` to an SSE client
pub fn create_event_sse_stream<F>(
    service_name: &'static str,
    event_bus: &EventBus,
    filter: F,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    F: Fn(&WwfEvent) -> bool + Send + Sync + 'static,
{
    info!("New SSE client connected to {} events", service_name);

    let frames = event_frames(service_name, event_bus.subscribe(), filter)
        .filter_map(|frame| async move { frame.into_event().map(Ok::<Event, Infallible>) });
    Sse::new(frames)
}
