//! Progress Broadcaster
//!
//! Single observable [`PipelineProgress`] value for one client session, held
//! in a `tokio::sync::watch` channel. Every write goes through a [`RunTicket`]:
//! starting a run makes its ticket the active one, and writes carrying any
//! other ticket are rejected. Updates are forward-only within a run.
//!
//! Accepted writes are mirrored to the [`EventBus`] as
//! `WwfEvent::PipelineProgress`, stamped with the session id so SSE clients
//! only follow their own session.

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;
use wwf_common::events::{EventBus, ProgressStatus, WwfEvent};

use crate::types::PipelineProgress;

/// Write capability for one pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTicket {
    run_id: Uuid,
    target_id: String,
}

impl RunTicket {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// User-facing id the run was started with
    pub fn target_id(&self) -> &str {
        &self.target_id
    }
}

/// Observable state: the active run (if any) and its counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub run_id: Option<Uuid>,
    pub target_id: Option<String>,
    #[serde(flatten)]
    pub progress: PipelineProgress,
}

/// Partial progress update; `None` keeps the current value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub processed: Option<usize>,
    pub found: Option<usize>,
    pub status: Option<ProgressStatus>,
}

impl ProgressUpdate {
    pub fn counts(processed: usize, found: usize) -> Self {
        Self {
            processed: Some(processed),
            found: Some(found),
            status: Some(ProgressStatus::Running),
        }
    }

    pub fn done() -> Self {
        Self {
            status: Some(ProgressStatus::Done),
            ..Default::default()
        }
    }
}

/// Why a write was refused
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum UpdateRejected {
    #[error("run has been superseded")]
    Stale,

    #[error("counters may not move backward")]
    Backward,

    #[error("counters violate processed <= total or found <= processed")]
    Inconsistent,

    #[error("invalid status transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: ProgressStatus,
        to: ProgressStatus,
    },
}

/// Session used when a broadcaster is built without one
pub const DEFAULT_SESSION: &str = "default";

pub struct ProgressBroadcaster {
    session_id: String,
    tx: watch::Sender<ProgressSnapshot>,
    event_bus: EventBus,
}

impl ProgressBroadcaster {
    pub fn new(event_bus: EventBus) -> Self {
        Self::for_session(DEFAULT_SESSION, event_bus)
    }

    pub fn for_session(session_id: impl Into<String>, event_bus: EventBus) -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::default());
        Self {
            session_id: session_id.into(),
            tx,
            event_bus,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Make a new run the active one and reset counters to a fresh running state
    ///
    /// Any ticket issued earlier becomes stale.
    pub fn begin_run(&self, target_id: &str) -> RunTicket {
        let ticket = RunTicket {
            run_id: Uuid::new_v4(),
            target_id: target_id.to_string(),
        };

        self.tx.send_modify(|state| {
            state.run_id = Some(ticket.run_id);
            state.target_id = Some(ticket.target_id.clone());
            state.progress = PipelineProgress::running(0);
        });

        debug!(
            session_id = %self.session_id,
            run_id = %ticket.run_id,
            target_id = %target_id,
            "Pipeline run started"
        );
        self.event_bus.emit_lossy(WwfEvent::PipelineStarted {
            session_id: self.session_id.clone(),
            run_id: ticket.run_id,
            target_id: ticket.target_id.clone(),
            timestamp: chrono::Utc::now(),
        });
        ticket
    }

    /// `{total, 0, 0, Running}` for the ticket's run
    pub fn reset(&self, ticket: &RunTicket, total: usize) -> Result<PipelineProgress, UpdateRejected> {
        self.write(ticket, |_| Ok(PipelineProgress::running(total)))
    }

    /// Merge a forward-only update into the ticket's run
    pub fn update(
        &self,
        ticket: &RunTicket,
        update: ProgressUpdate,
    ) -> Result<PipelineProgress, UpdateRejected> {
        self.write(ticket, |current| {
            let next = PipelineProgress {
                total: current.total,
                processed: update.processed.unwrap_or(current.processed),
                found: update.found.unwrap_or(current.found),
                status: update.status.unwrap_or(current.status),
            };

            if next.processed < current.processed || next.found < current.found {
                return Err(UpdateRejected::Backward);
            }
            if !next.is_consistent() {
                return Err(UpdateRejected::Inconsistent);
            }
            if !current.status.can_transition_to(next.status) {
                return Err(UpdateRejected::InvalidTransition {
                    from: current.status,
                    to: next.status,
                });
            }
            Ok(next)
        })
    }

    /// Whether `ticket` belongs to the active run
    pub fn is_current(&self, ticket: &RunTicket) -> bool {
        self.tx.borrow().run_id == Some(ticket.run_id)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    /// Check the ticket, compute the next state, and publish it atomically
    fn write<F>(&self, ticket: &RunTicket, next: F) -> Result<PipelineProgress, UpdateRejected>
    where
        F: FnOnce(&PipelineProgress) -> Result<PipelineProgress, UpdateRejected>,
    {
        let mut outcome = Err(UpdateRejected::Stale);
        self.tx.send_if_modified(|state| {
            if state.run_id != Some(ticket.run_id) {
                return false;
            }
            outcome = next(&state.progress);
            match outcome {
                Ok(progress) => {
                    let changed = progress != state.progress;
                    state.progress = progress;
                    changed
                }
                Err(_) => false,
            }
        });

        match &outcome {
            Ok(progress) => {
                self.event_bus.emit_lossy(WwfEvent::PipelineProgress {
                    session_id: self.session_id.clone(),
                    run_id: ticket.run_id,
                    target_id: ticket.target_id.clone(),
                    total: progress.total,
                    processed: progress.processed,
                    found: progress.found,
                    status: progress.status,
                    timestamp: chrono::Utc::now(),
                });
            }
            Err(UpdateRejected::Stale) => {
                debug!(run_id = %ticket.run_id, target_id = %ticket.target_id, "Discarded stale progress write");
            }
            Err(e) => {
                debug!(run_id = %ticket.run_id, "Rejected progress write: {}", e);
            }
        }
        outcome
    }
}
