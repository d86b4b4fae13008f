//! Pipeline orchestration
//!
//! One run: resolve the user id, fetch locations (storage first), geocode raw
//! places, plan the map, record the search, and commit the result for the
//! session. Resolver and fetcher errors end the run early with a terminal
//! `Done` state and zero found; per-item geocode failures never do.
//!
//! A runner serves one client session. A run only commits its result while
//! it is still the active run on the session's [`ProgressBroadcaster`].

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wwf_common::events::{EventBus, ProgressStatus, WwfEvent};

use crate::services::boundary_cache::BoundaryCache;
use crate::services::geocoding_engine::GeocodingEngine;
use crate::services::locations_client::LocationsError;
use crate::services::locations_fetcher::{FetchOutcome, LocationsFetcher};
use crate::services::map_planner::{classify, Boundaries, MapPlan, MapPlanner, RenderClass};
use crate::services::place_resolver::{PlaceResolver, ResolutionError};
use crate::services::progress_broadcaster::{ProgressBroadcaster, ProgressUpdate, RunTicket};
use crate::services::wikidata_client::TitleMeta;
use crate::types::{GeocodedLocation, LocationsOrigin, PipelineProgress, TitleId};

/// Longest title kept in the search history
const MAX_SEARCH_TITLE_CHARS: usize = 80;

/// User-visible error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    ServiceUnavailable,
    RateLimited,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::RateLimited => "rate_limited",
        }
    }
}

/// Errors that end a run early
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Too many requests, please try again in a few moments")]
    RateLimited,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidInput(_) => ErrorKind::InvalidInput,
            PipelineError::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            PipelineError::RateLimited => ErrorKind::RateLimited,
        }
    }
}

impl From<LocationsError> for PipelineError {
    fn from(err: LocationsError) -> Self {
        match err {
            LocationsError::RateLimited => PipelineError::RateLimited,
            LocationsError::ServiceUnavailable(msg) => PipelineError::ServiceUnavailable(msg),
            LocationsError::Upstream(status, msg) => {
                PipelineError::ServiceUnavailable(format!("upstream status {}: {}", status, msg))
            }
        }
    }
}

/// Write side of the search history
#[async_trait]
pub trait SearchRecorder: Send + Sync {
    async fn record_search(&self, movie_id: &str, title: &str) -> wwf_common::Result<()>;
}

/// Finished run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub target_id: String,
    pub title_id: Option<TitleId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<TitleMeta>,
    /// `None` when nothing was fetched
    pub source: Option<LocationsOrigin>,
    /// Set when the run ended with nothing to fetch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_locations: Option<&'static str>,
    pub locations: Vec<GeocodedLocation>,
    pub plan: MapPlan,
    pub progress: PipelineProgress,
    /// Seconds before the no-locations view returns home
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_after_secs: Option<u64>,
}

/// Last committed outcome for the session
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunReport {
    Completed(PipelineResult),
    Failed {
        run_id: Uuid,
        target_id: String,
        kind: ErrorKind,
        message: String,
        progress: PipelineProgress,
    },
}

impl RunReport {
    pub fn run_id(&self) -> Uuid {
        match self {
            RunReport::Completed(result) => result.run_id,
            RunReport::Failed { run_id, .. } => *run_id,
        }
    }
}

pub struct PipelineRunner {
    resolver: Arc<PlaceResolver>,
    fetcher: Arc<LocationsFetcher>,
    engine: GeocodingEngine,
    broadcaster: Arc<ProgressBroadcaster>,
    planner: MapPlanner,
    event_bus: EventBus,
    no_locations_redirect_secs: u64,
    boundaries: Option<&'static BoundaryCache>,
    search_recorder: Option<Arc<dyn SearchRecorder>>,
    last_report: RwLock<Option<RunReport>>,
}

impl PipelineRunner {
    pub fn new(
        resolver: Arc<PlaceResolver>,
        fetcher: Arc<LocationsFetcher>,
        engine: GeocodingEngine,
        broadcaster: Arc<ProgressBroadcaster>,
        planner: MapPlanner,
        event_bus: EventBus,
        no_locations_redirect_secs: u64,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            engine,
            broadcaster,
            planner,
            event_bus,
            no_locations_redirect_secs,
            boundaries: None,
            search_recorder: None,
            last_report: RwLock::new(None),
        }
    }

    /// Attach country/region polygons to plans
    pub fn with_boundaries(mut self, cache: &'static BoundaryCache) -> Self {
        self.boundaries = Some(cache);
        self
    }

    pub fn with_search_recorder(mut self, recorder: Arc<dyn SearchRecorder>) -> Self {
        self.search_recorder = Some(recorder);
        self
    }

    /// A runner for another client session
    ///
    /// Shares the resolver, fetcher, geocoder and recorders; progress and the
    /// last report start fresh.
    pub fn fork(&self, session_id: &str) -> Self {
        let broadcaster = Arc::new(ProgressBroadcaster::for_session(
            session_id,
            self.event_bus.clone(),
        ));
        Self {
            resolver: Arc::clone(&self.resolver),
            fetcher: Arc::clone(&self.fetcher),
            engine: self.engine.with_broadcaster(Arc::clone(&broadcaster)),
            broadcaster,
            planner: self.planner.clone(),
            event_bus: self.event_bus.clone(),
            no_locations_redirect_secs: self.no_locations_redirect_secs,
            boundaries: self.boundaries,
            search_recorder: self.search_recorder.clone(),
            last_report: RwLock::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        self.broadcaster.session_id()
    }

    pub fn broadcaster(&self) -> &Arc<ProgressBroadcaster> {
        &self.broadcaster
    }

    pub fn resolver(&self) -> &Arc<PlaceResolver> {
        &self.resolver
    }

    pub fn fetcher(&self) -> &Arc<LocationsFetcher> {
        &self.fetcher
    }

    /// Last committed report, if any run has finished
    pub async fn last_report(&self) -> Option<RunReport> {
        self.last_report.read().await.clone()
    }

    /// Make a new run the active one
    pub fn begin(&self, user_id: &str) -> RunTicket {
        self.broadcaster.begin_run(user_id.trim())
    }

    /// Start a run and drive it in the background
    pub fn spawn(self: &Arc<Self>, user_id: &str) -> RunTicket {
        let ticket = self.begin(user_id);
        let runner = Arc::clone(self);
        let run_ticket = ticket.clone();
        tokio::spawn(async move {
            let _ = runner.execute(run_ticket).await;
        });
        ticket
    }

    /// Start a run and drive it to the end
    pub async fn run(&self, user_id: &str) -> Result<PipelineResult, PipelineError> {
        let ticket = self.begin(user_id);
        self.execute(ticket).await
    }

    /// Drive the run identified by `ticket`
    pub async fn execute(&self, ticket: RunTicket) -> Result<PipelineResult, PipelineError> {
        let user_id = ticket.target_id().to_string();

        let resolved = match self.resolver.resolve(&user_id).await {
            Ok(resolved) => resolved,
            Err(ResolutionError::NotFound(id)) => {
                info!(target_id = %user_id, entity_id = %id, "No title linked to knowledge-base id");
                return Ok(self.finish_empty(&ticket, None, "no_linked_title").await);
            }
            Err(ResolutionError::InvalidId(id)) => {
                return Err(self
                    .fail(&ticket, PipelineError::InvalidInput(format!("Invalid title id '{}'", id)))
                    .await);
            }
            Err(ResolutionError::Upstream(msg)) => {
                return Err(self.fail(&ticket, PipelineError::ServiceUnavailable(msg)).await);
            }
        };
        let title_id = resolved.title_id.clone();

        let fetched = match self.fetcher.fetch(&title_id).await {
            Ok(fetched) => fetched,
            Err(e) => return Err(self.fail(&ticket, e.into()).await),
        };
        let source = fetched.outcome.origin();

        let (locations, no_locations) = match fetched.outcome {
            FetchOutcome::Stored(rows) => {
                let total = rows.len();
                let _ = self.broadcaster.reset(&ticket, total);
                let _ = self.broadcaster.update(
                    &ticket,
                    ProgressUpdate {
                        processed: Some(total),
                        found: Some(total),
                        status: Some(ProgressStatus::Done),
                    },
                );
                (rows, None)
            }
            FetchOutcome::External(places) => {
                let locations = self.engine.run_to_completion(ticket.clone(), places).await;
                (locations, None)
            }
            FetchOutcome::NoLocations(reason) => {
                self.mark_done_empty(&ticket);
                (Vec::new(), Some(reason.as_str()))
            }
        };

        // a superseded run cannot commit, so skip the remaining lookups
        let current = self.broadcaster.is_current(&ticket);
        if !current {
            debug!(run_id = %ticket.run_id(), "Run superseded; skipping title lookup and planning");
        }
        let title = match resolved.title.or(fetched.title) {
            Some(title) => Some(title),
            None if current => self.resolver.title_label(&title_id).await,
            None => None,
        };
        let plan = if current {
            self.plan(&locations).await
        } else {
            MapPlan::default()
        };
        let found = locations.iter().filter(|l| l.is_plottable()).count();
        let result = PipelineResult {
            run_id: ticket.run_id(),
            target_id: user_id,
            redirect_after_secs: plan.is_empty().then_some(self.no_locations_redirect_secs),
            title_id: Some(title_id),
            title,
            meta: resolved.meta,
            source,
            no_locations,
            progress: PipelineProgress {
                total: locations.len(),
                processed: locations.len(),
                found,
                status: ProgressStatus::Done,
            },
            locations,
            plan,
        };

        self.record_search(&ticket, &result);
        self.commit(&ticket, RunReport::Completed(result.clone())).await;
        Ok(result)
    }

    async fn finish_empty(
        &self,
        ticket: &RunTicket,
        title_id: Option<TitleId>,
        reason: &'static str,
    ) -> PipelineResult {
        self.mark_done_empty(ticket);
        let result = PipelineResult {
            run_id: ticket.run_id(),
            target_id: ticket.target_id().to_string(),
            title_id,
            title: None,
            meta: None,
            source: None,
            no_locations: Some(reason),
            locations: Vec::new(),
            plan: MapPlan::default(),
            progress: PipelineProgress {
                status: ProgressStatus::Done,
                ..Default::default()
            },
            redirect_after_secs: Some(self.no_locations_redirect_secs),
        };
        self.commit(ticket, RunReport::Completed(result.clone())).await;
        result
    }

    async fn fail(&self, ticket: &RunTicket, err: PipelineError) -> PipelineError {
        warn!(
            session_id = %self.session_id(),
            target_id = %ticket.target_id(),
            kind = err.kind().as_str(),
            "Pipeline run failed: {}",
            err
        );
        self.mark_done_empty(ticket);

        let report = RunReport::Failed {
            run_id: ticket.run_id(),
            target_id: ticket.target_id().to_string(),
            kind: err.kind(),
            message: err.to_string(),
            progress: PipelineProgress {
                status: ProgressStatus::Done,
                ..Default::default()
            },
        };
        if self.commit(ticket, report).await {
            self.event_bus.emit_lossy(WwfEvent::PipelineFailed {
                session_id: self.session_id().to_string(),
                run_id: ticket.run_id(),
                target_id: ticket.target_id().to_string(),
                kind: err.kind().as_str().to_string(),
                message: err.to_string(),
                timestamp: chrono::Utc::now(),
            });
        }
        err
    }

    /// `{0, 0, 0, Done}` for a run that has nothing to geocode
    fn mark_done_empty(&self, ticket: &RunTicket) {
        let _ = self.broadcaster.reset(ticket, 0);
        let _ = self.broadcaster.update(ticket, ProgressUpdate::done());
    }

    async fn plan(&self, locations: &[GeocodedLocation]) -> MapPlan {
        let needs = |class: RenderClass| locations.iter().any(|l| classify(l) == class);

        let (countries, regions) = match self.boundaries {
            Some(cache) => {
                let countries = if needs(RenderClass::Country) {
                    cache.countries().await
                } else {
                    None
                };
                let regions = if needs(RenderClass::Region) {
                    cache.regions().await
                } else {
                    None
                };
                (countries, regions)
            }
            None => (None, None),
        };

        self.planner.plan(
            locations,
            Boundaries {
                countries: countries.as_deref(),
                regions: regions.as_deref(),
            },
        )
    }

    /// Fire-and-forget write to the search history
    fn record_search(&self, ticket: &RunTicket, result: &PipelineResult) {
        let (Some(recorder), Some(title_id)) = (self.search_recorder.clone(), result.title_id.clone())
        else {
            return;
        };
        if !self.broadcaster.is_current(ticket) {
            return;
        }

        let title: String = result
            .title
            .clone()
            .unwrap_or_else(|| title_id.to_string())
            .chars()
            .take(MAX_SEARCH_TITLE_CHARS)
            .collect();
        let event_bus = self.event_bus.clone();

        tokio::spawn(async move {
            match recorder.record_search(title_id.as_str(), &title).await {
                Ok(()) => event_bus.emit_lossy(WwfEvent::SearchRecorded {
                    movie_id: title_id.to_string(),
                    title,
                    timestamp: chrono::Utc::now(),
                }),
                Err(e) => warn!(title_id = %title_id, "Failed to record search: {}", e),
            }
        });
    }

    /// Store `report` as the session's result if the run is still active
    async fn commit(&self, ticket: &RunTicket, report: RunReport) -> bool {
        let mut last = self.last_report.write().await;
        if !self.broadcaster.is_current(ticket) {
            debug!(run_id = %ticket.run_id(), "Discarding result of superseded run");
            return false;
        }

        if let RunReport::Completed(result) = &report {
            info!(
                session_id = %self.session_id(),
                target_id = %result.target_id,
                title_id = ?result.title_id.as_ref().map(TitleId::as_str),
                total = result.progress.total,
                found = result.progress.found,
                "Pipeline run completed"
            );
            self.event_bus.emit_lossy(WwfEvent::PipelineCompleted {
                session_id: self.session_id().to_string(),
                run_id: result.run_id,
                target_id: result.target_id.clone(),
                title_id: result.title_id.as_ref().map(TitleId::to_string),
                source: result.source.map(|s| s.as_str().to_string()),
                total: result.progress.total,
                found: result.progress.found,
                timestamp: chrono::Utc::now(),
            });
        }
        *last = Some(report);
        true
    }
}
