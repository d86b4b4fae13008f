//! Event types and EventBus for WWF services
//!
//! Events are broadcast via [`EventBus`] and serialized for SSE transmission.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Lifecycle of a pipeline run as seen by observers
///
/// Transitions only Idle → Running → Done, or Running → Done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    /// No run has started yet
    #[default]
    Idle,
    /// A run is resolving, fetching or geocoding
    Running,
    /// The run finished (successfully, empty, or after an upstream error)
    Done,
}

impl ProgressStatus {
    /// Whether moving from `self` to `next` is a forward transition
    pub fn can_transition_to(self, next: ProgressStatus) -> bool {
        matches!(
            (self, next),
            (ProgressStatus::Idle, ProgressStatus::Running)
                | (ProgressStatus::Running, ProgressStatus::Running)
                | (ProgressStatus::Running, ProgressStatus::Done)
        )
    }
}

/// WWF event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WwfEvent {
    /// A pipeline run took over the session
    PipelineStarted {
        /// Client session that owns the run
        session_id: String,
        /// Unique run identifier
        run_id: Uuid,
        /// User-facing identifier the run was started with
        target_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Progress counters changed
    PipelineProgress {
        session_id: String,
        run_id: Uuid,
        target_id: String,
        total: usize,
        processed: usize,
        found: usize,
        status: ProgressStatus,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Run finished and its results were committed
    PipelineCompleted {
        session_id: String,
        run_id: Uuid,
        target_id: String,
        /// Canonical title id, when resolution succeeded
        title_id: Option<String>,
        /// "stored", "external", or none when nothing was fetched
        source: Option<String>,
        total: usize,
        found: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Run aborted early (invalid input, upstream unavailable, rate limited)
    PipelineFailed {
        session_id: String,
        run_id: Uuid,
        target_id: String,
        kind: String,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A search was written to the search history
    SearchRecorded {
        movie_id: String,
        title: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl WwfEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            WwfEvent::PipelineStarted { .. } => "PipelineStarted",
            WwfEvent::PipelineProgress { .. } => "PipelineProgress",
            WwfEvent::PipelineCompleted { .. } => "PipelineCompleted",
            WwfEvent::PipelineFailed { .. } => "PipelineFailed",
            WwfEvent::SearchRecorded { .. } => "SearchRecorded",
        }
    }

    /// Owning session of a pipeline event; `None` for every other event
    pub fn session_id(&self) -> Option<&str> {
        match self {
            WwfEvent::PipelineStarted { session_id, .. }
            | WwfEvent::PipelineProgress { session_id, .. }
            | WwfEvent::PipelineCompleted { session_id, .. }
            | WwfEvent::PipelineFailed { session_id, .. } => Some(session_id),
            WwfEvent::SearchRecorded { .. } => None,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// Uses tokio::broadcast internally: publishing never blocks, slow
/// subscribers observe `Lagged` instead of stalling producers.
///
/// ```
/// use wwf_common::events::{EventBus, WwfEvent};
///
/// let event_bus = EventBus::new(100);
/// let _rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(WwfEvent::SearchRecorded {
///     movie_id: "tt0120737".to_string(),
///     title: "The Lord of the Rings".to_string(),
///     timestamp: chrono::Utc::now(),
/// });
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<WwfEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<WwfEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring the absence of subscribers
    pub fn emit_lossy(&self, event: WwfEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("No subscribers for event: {}", e.0.event_type());
        }
    }

    /// Channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}
