//! Geocoding Engine
//!
//! Geocodes a run's places strictly one at a time, in input order, and
//! yields each [`GeocodedLocation`] as soon as its request settles. A failed
//! geocode never aborts the run: the location is yielded with null
//! coordinates.
//!
//! Progress goes to the [`ProgressBroadcaster`] under the run's ticket:
//! - `reset(total)` before the first request
//! - a running update after an item, at most once per throttle interval,
//!   and always after the final item
//! - a terminal `Done` update once every item was attempted
//!
//! A superseded run keeps geocoding to the end, but every write it makes is
//! refused by the broadcaster.

use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::services::geocoder::{GeocodeOutcome, Geocoder};
use crate::services::progress_broadcaster::{ProgressBroadcaster, ProgressUpdate, RunTicket};
use crate::types::{GeocodedLocation, PlaceRecord};

#[derive(Clone)]
pub struct GeocodingEngine {
    geocoder: Arc<dyn Geocoder>,
    broadcaster: Arc<ProgressBroadcaster>,
    throttle: Duration,
}

impl GeocodingEngine {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        broadcaster: Arc<ProgressBroadcaster>,
        throttle: Duration,
    ) -> Self {
        Self {
            geocoder,
            broadcaster,
            throttle,
        }
    }

    /// Same geocoder and throttle, publishing to another session's broadcaster
    pub fn with_broadcaster(&self, broadcaster: Arc<ProgressBroadcaster>) -> Self {
        Self {
            geocoder: Arc::clone(&self.geocoder),
            broadcaster,
            throttle: self.throttle,
        }
    }

    /// Geocode `places` in order, yielding one location per place
    pub fn run(
        &self,
        ticket: RunTicket,
        places: Vec<PlaceRecord>,
    ) -> impl Stream<Item = GeocodedLocation> + Send + 'static {
        let geocoder = Arc::clone(&self.geocoder);
        let broadcaster = Arc::clone(&self.broadcaster);
        let throttle = self.throttle;

        async_stream::stream! {
            let total = places.len();
            let _ = broadcaster.reset(&ticket, total);

            let mut processed = 0usize;
            let mut found = 0usize;
            let mut last_publish: Option<Instant> = None;

            for place in &places {
                let mut location = GeocodedLocation::pending(place);

                match geocoder.geocode(&place.raw_text).await {
                    GeocodeOutcome::Found(hit) => {
                        location.apply(&hit);
                        found += 1;
                    }
                    GeocodeOutcome::NotFound { .. } => {
                        debug!(place = %place.raw_text, "No coordinates for place");
                    }
                    GeocodeOutcome::TransportError(e) => {
                        warn!(place = %place.raw_text, "Geocode failed: {}", e);
                    }
                }
                processed += 1;

                let due = last_publish.map_or(true, |at| at.elapsed() >= throttle);
                if (processed == total || due)
                    && broadcaster
                        .update(&ticket, ProgressUpdate::counts(processed, found))
                        .is_ok()
                {
                    last_publish = Some(Instant::now());
                }

                yield location;
            }

            if broadcaster.update(&ticket, ProgressUpdate::done()).is_ok() {
                debug!(run_id = %ticket.run_id(), total, found, "Geocoding finished");
            }
        }
    }

    /// Drive [`run`](Self::run) to the end and collect every location
    pub async fn run_to_completion(
        &self,
        ticket: RunTicket,
        places: Vec<PlaceRecord>,
    ) -> Vec<GeocodedLocation> {
        self.run(ticket, places).collect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::geocoder::GeocodeError;
    use crate::types::GeocodeHit;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wwf_common::events::{EventBus, ProgressStatus, WwfEvent};

    /// Resolves any place containing "Paris", fails "TIMEOUT", misses the rest
    struct StubGeocoder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Geocoder for StubGeocoder {
        async fn geocode(&self, place: &str) -> GeocodeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if place.contains("Paris") {
                GeocodeOutcome::Found(GeocodeHit {
                    lon: 2.2945,
                    lat: 48.8584,
                    bbox: None,
                    place_type: Some("amenity".to_string()),
                    formatted: "Eiffel Tower, Paris, France".to_string(),
                })
            } else if place == "TIMEOUT" {
                GeocodeOutcome::TransportError(GeocodeError::Timeout)
            } else {
                GeocodeOutcome::NotFound {
                    formatted: place.to_string(),
                }
            }
        }
    }

    fn places(raw: &[&str]) -> Vec<PlaceRecord> {
        raw.iter().map(|p| PlaceRecord::new(*p, None)).collect()
    }

    fn setup(throttle: Duration) -> (GeocodingEngine, Arc<ProgressBroadcaster>, EventBus) {
        let bus = EventBus::new(256);
        let broadcaster = Arc::new(ProgressBroadcaster::new(bus.clone()));
        let engine = GeocodingEngine::new(
            Arc::new(StubGeocoder {
                calls: AtomicUsize::new(0),
            }),
            broadcaster.clone(),
            throttle,
        );
        (engine, broadcaster, bus)
    }

    fn progress_events(rx: &mut tokio::sync::broadcast::Receiver<WwfEvent>) -> Vec<(usize, usize, usize, ProgressStatus)> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let WwfEvent::PipelineProgress {
                total,
                processed,
                found,
                status,
                ..
            } = event
            {
                out.push((total, processed, found, status));
            }
        }
        out
    }

    #[tokio::test]
    async fn test_partial_failure_scenario() {
        let (engine, broadcaster, _bus) = setup(Duration::ZERO);
        let ticket = broadcaster.begin_run("tt0000001");

        let results = engine
            .run_to_completion(ticket, places(&["Eiffel Tower, Paris", "INVALID_PLACE_XYZ"]))
            .await;

        assert_eq!(results.len(), 2);
        assert!(results[0].is_plottable());
        assert!(!results[1].is_plottable());
        assert_eq!(results[1].formatted, "INVALID_PLACE_XYZ");

        let progress = broadcaster.snapshot().progress;
        assert_eq!(
            (progress.total, progress.processed, progress.found, progress.status),
            (2, 2, 1, ProgressStatus::Done)
        );
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let (engine, broadcaster, bus) = setup(Duration::ZERO);
        let mut rx = bus.subscribe();
        let ticket = broadcaster.begin_run("tt1");

        engine
            .run_to_completion(ticket, places(&["Paris", "TIMEOUT", "Nowhere", "Paris, France"]))
            .await;

        let events = progress_events(&mut rx);
        assert_eq!(events.first(), Some(&(4, 0, 0, ProgressStatus::Running)));
        assert_eq!(events.last(), Some(&(4, 4, 2, ProgressStatus::Done)));
        for pair in events.windows(2) {
            assert!(pair[1].1 >= pair[0].1);
            assert!(pair[1].2 >= pair[0].2);
        }
        assert!(events.iter().all(|(t, p, f, _)| p <= t && f <= p));
    }

    #[tokio::test]
    async fn test_throttle_still_publishes_final_item() {
        let (engine, broadcaster, bus) = setup(Duration::from_secs(3600));
        let mut rx = bus.subscribe();
        let ticket = broadcaster.begin_run("tt1");

        engine
            .run_to_completion(ticket, places(&["Paris", "a", "b", "c"]))
            .await;

        // reset, first item, final item, done
        let events = progress_events(&mut rx);
        assert_eq!(
            events,
            vec![
                (4, 0, 0, ProgressStatus::Running),
                (4, 1, 1, ProgressStatus::Running),
                (4, 4, 1, ProgressStatus::Running),
                (4, 4, 1, ProgressStatus::Done),
            ]
        );
    }

    #[tokio::test]
    async fn test_identical_runs_give_identical_results() {
        let (engine, broadcaster, _bus) = setup(Duration::ZERO);
        let input = places(&["Eiffel Tower, Paris", "Nowhere", "Paris"]);

        let first = engine
            .run_to_completion(broadcaster.begin_run("tt1"), input.clone())
            .await;
        let second = engine
            .run_to_completion(broadcaster.begin_run("tt1"), input)
            .await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_input_finishes() {
        let (engine, broadcaster, _bus) = setup(Duration::ZERO);
        let results = engine
            .run_to_completion(broadcaster.begin_run("tt1"), Vec::new())
            .await;

        assert!(results.is_empty());
        let progress = broadcaster.snapshot().progress;
        assert_eq!(progress.total, 0);
        assert!(progress.is_done());
    }

    /// Starts a new run on the broadcaster when it sees "SWITCH"
    struct SwitchingGeocoder {
        broadcaster: Arc<ProgressBroadcaster>,
    }

    #[async_trait]
    impl Geocoder for SwitchingGeocoder {
        async fn geocode(&self, place: &str) -> GeocodeOutcome {
            if place == "SWITCH" {
                let ticket = self.broadcaster.begin_run("tt2");
                let _ = self.broadcaster.reset(&ticket, 7);
            }
            GeocodeOutcome::Found(GeocodeHit {
                lon: 0.0,
                lat: 0.0,
                bbox: None,
                place_type: None,
                formatted: place.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_superseded_run_stops_publishing() {
        let broadcaster = Arc::new(ProgressBroadcaster::new(EventBus::new(64)));
        let engine = GeocodingEngine::new(
            Arc::new(SwitchingGeocoder {
                broadcaster: broadcaster.clone(),
            }),
            broadcaster.clone(),
            Duration::ZERO,
        );

        let ticket = broadcaster.begin_run("tt1");
        let results = engine
            .run_to_completion(ticket, places(&["a", "SWITCH", "c"]))
            .await;

        // the stale run still yields its own results
        assert_eq!(results.len(), 3);

        let snap = broadcaster.snapshot();
        assert_eq!(snap.target_id.as_deref(), Some("tt2"));
        assert_eq!(snap.progress.total, 7);
        assert_eq!(snap.progress.processed, 0);
        assert_eq!(snap.progress.status, ProgressStatus::Running);
    }
}
