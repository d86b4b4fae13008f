//! End-to-end pipeline runs against in-process stubs

mod helpers;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use helpers::{harness, stored_row, StubGeocoder, StubKnowledgeBase, StubLocations, StubStore};
use tokio::sync::broadcast;
use wwf_common::events::{ProgressStatus, WwfEvent};
use wwf_locations::services::{
    encode_movie_id, LocationsError, LocationsPage, PipelineError, PipelineSessions, RunReport,
};
use wwf_locations::types::{LocationsOrigin, PipelineProgress, PlaceRecord, TitleId};

type Counters = (usize, usize, usize, ProgressStatus);

fn drain(rx: &mut broadcast::Receiver<WwfEvent>) -> Vec<WwfEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn progress_counters(events: &[WwfEvent]) -> Vec<Counters> {
    events
        .iter()
        .filter_map(|event| match event {
            WwfEvent::PipelineProgress {
                total,
                processed,
                found,
                status,
                ..
            } => Some((*total, *processed, *found, *status)),
            _ => None,
        })
        .collect()
}

fn done(total: usize, found: usize) -> PipelineProgress {
    PipelineProgress {
        total,
        processed: total,
        found,
        status: ProgressStatus::Done,
    }
}

#[tokio::test]
async fn test_one_hit_one_miss() {
    let h = harness(
        StubKnowledgeBase::default(),
        StubStore::default(),
        StubLocations::default().with_places(
            "tt0120737",
            "The Lord of the Rings",
            &["Eiffel Tower, Paris", "INVALID"],
        ),
        StubGeocoder::new(),
    );
    let mut rx = h.event_bus.subscribe();

    let result = h.runner.run("tt0120737").await.unwrap();

    assert_eq!(result.progress, done(2, 1));
    assert_eq!(result.source, Some(LocationsOrigin::External));
    assert_eq!(result.title.as_deref(), Some("The Lord of the Rings"));
    assert_eq!(result.locations.len(), 2);
    assert!(result.locations[0].is_plottable());
    assert_eq!(result.locations[0].formatted, "Eiffel Tower, Paris, France");
    assert!(!result.locations[1].is_plottable());
    assert_eq!(result.locations[1].place, "INVALID");
    assert_eq!(result.plan.points.len(), 1);
    assert_eq!(result.plan.unplottable, 1);
    assert_eq!(result.redirect_after_secs, None);
    assert_eq!(h.geocoder.call_count(), 2);

    let snapshot = h.runner.broadcaster().snapshot();
    assert_eq!(snapshot.progress, done(2, 1));

    let events = drain(&mut rx);
    let counters = progress_counters(&events);
    assert_eq!(counters.first(), Some(&(2, 0, 0, ProgressStatus::Running)));
    assert_eq!(counters.last(), Some(&(2, 2, 1, ProgressStatus::Done)));
    assert!(events
        .iter()
        .any(|e| matches!(e, WwfEvent::PipelineCompleted { found: 1, total: 2, .. })));
}

#[tokio::test]
async fn test_progress_never_moves_backward() {
    let h = harness(
        StubKnowledgeBase::default(),
        StubStore::default(),
        StubLocations::default().with_places(
            "tt0000001",
            "Many Places",
            &["Paris 1", "Nowhere", "TIMEOUT", "Paris 2", "Nowhere again"],
        ),
        StubGeocoder::new(),
    );
    let mut rx = h.event_bus.subscribe();

    let result = h.runner.run("tt0000001").await.unwrap();
    assert_eq!(result.progress, done(5, 2));

    let counters = progress_counters(&drain(&mut rx));
    for pair in counters.windows(2) {
        let (_, p0, f0, _) = pair[0];
        let (_, p1, f1, _) = pair[1];
        assert!(p1 >= p0, "processed went backward: {:?}", counters);
        assert!(f1 >= f0, "found went backward: {:?}", counters);
    }
    for (total, processed, found, _) in &counters {
        assert!(processed <= total);
        assert!(found <= processed);
    }
}

#[tokio::test]
async fn test_rate_limit_ends_run_without_geocoding() {
    let h = harness(
        StubKnowledgeBase::default(),
        StubStore::default(),
        StubLocations::default().with_response("tt0120737", Err(LocationsError::RateLimited)),
        StubGeocoder::new(),
    );
    let mut rx = h.event_bus.subscribe();

    let err = h.runner.run("tt0120737").await.unwrap_err();

    assert_eq!(err, PipelineError::RateLimited);
    assert_eq!(h.geocoder.call_count(), 0);
    assert_eq!(h.runner.broadcaster().snapshot().progress, done(0, 0));

    match h.runner.last_report().await {
        Some(RunReport::Failed { kind, progress, .. }) => {
            assert_eq!(kind.as_str(), "rate_limited");
            assert_eq!(progress, done(0, 0));
        }
        other => panic!("expected failed report, got {:?}", other),
    }
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, WwfEvent::PipelineFailed { kind, .. } if kind == "rate_limited")));
}

#[tokio::test]
async fn test_upstream_error_is_service_unavailable() {
    let h = harness(
        StubKnowledgeBase::default(),
        StubStore::default(),
        StubLocations::default().with_response(
            "tt0120737",
            Err(LocationsError::Upstream(500, "boom".to_string())),
        ),
        StubGeocoder::new(),
    );

    let err = h.runner.run("tt0120737").await.unwrap_err();
    assert!(matches!(err, PipelineError::ServiceUnavailable(_)));
    assert_eq!(h.runner.broadcaster().snapshot().progress, done(0, 0));
}

#[tokio::test]
async fn test_stored_rows_skip_geocoding() {
    let h = harness(
        StubKnowledgeBase::default().with_label("tt0120737", "The Lord of the Rings"),
        StubStore::default().with_rows(
            "tt0120737",
            vec![
                stored_row("Matamata", 175.77, -37.81),
                stored_row("Wellington", 174.77, -41.28),
                stored_row("Queenstown", 168.66, -45.03),
            ],
        ),
        StubLocations::default(),
        StubGeocoder::new(),
    );
    let mut rx = h.event_bus.subscribe();

    let result = h.runner.run("tt0120737").await.unwrap();

    assert_eq!(result.source, Some(LocationsOrigin::Stored));
    assert_eq!(result.progress, done(3, 3));
    assert_eq!(result.title.as_deref(), Some("The Lord of the Rings"));
    assert_eq!(h.geocoder.call_count(), 0);
    assert_eq!(h.locations.call_count(), 0);

    let counters = progress_counters(&drain(&mut rx));
    let terminal: Vec<_> = counters
        .iter()
        .filter(|(_, _, _, status)| *status == ProgressStatus::Done)
        .collect();
    assert_eq!(terminal, vec![&(3, 3, 3, ProgressStatus::Done)]);
}

#[tokio::test]
async fn test_missing_and_empty_locations() {
    let h = harness(
        StubKnowledgeBase::default().with_label("tt0000002", "Studio Film"),
        StubStore::default(),
        StubLocations::default().with_response(
            "tt0000002",
            Ok(LocationsPage {
                title: None,
                places: Some(Vec::new()),
            }),
        ),
        StubGeocoder::new(),
    );

    let missing = h.runner.run("tt0000001").await.unwrap();
    assert_eq!(missing.no_locations, Some("missing_field"));
    assert_eq!(missing.progress, done(0, 0));
    assert_eq!(missing.redirect_after_secs, Some(5));

    let empty = h.runner.run("tt0000002").await.unwrap();
    assert_eq!(empty.no_locations, Some("empty_list"));
    assert_eq!(empty.title.as_deref(), Some("Studio Film"));
    assert!(empty.locations.is_empty());
    assert_eq!(h.runner.broadcaster().snapshot().progress, done(0, 0));
    assert_eq!(h.geocoder.call_count(), 0);
}

#[tokio::test]
async fn test_invalid_id_fails_run() {
    let h = harness(
        StubKnowledgeBase::default(),
        StubStore::default(),
        StubLocations::default(),
        StubGeocoder::new(),
    );

    let err = h.runner.run("not a movie").await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));
    assert_eq!(h.locations.call_count(), 0);
    assert_eq!(h.runner.broadcaster().snapshot().progress, done(0, 0));
}

#[tokio::test]
async fn test_knowledge_base_id_without_title() {
    let h = harness(
        StubKnowledgeBase::default(),
        StubStore::default(),
        StubLocations::default(),
        StubGeocoder::new(),
    );

    let result = h.runner.run("Q999999").await.unwrap();
    assert_eq!(result.no_locations, Some("no_linked_title"));
    assert_eq!(result.title_id, None);
    assert_eq!(result.progress, done(0, 0));
    assert_eq!(h.locations.call_count(), 0);
}

#[tokio::test]
async fn test_knowledge_base_id_and_token_resolve() {
    let h = harness(
        StubKnowledgeBase::default().with_film(
            "Q127367",
            "tt0120737",
            "The Lord of the Rings: The Fellowship of the Ring",
        ),
        StubStore::default(),
        StubLocations::default().with_places("tt0120737", "LOTR", &["Paris"]),
        StubGeocoder::new(),
    );

    let by_entity = h.runner.run("q127367").await.unwrap();
    assert_eq!(by_entity.title_id.as_ref().map(TitleId::as_str), Some("tt0120737"));
    assert_eq!(by_entity.target_id, "q127367");

    let title_id = TitleId::parse("tt0120737").unwrap();
    let token = h.signer.sign(&title_id).unwrap();
    let by_token = h.runner.run(&token).await.unwrap();
    assert_eq!(by_token.title_id, Some(title_id.clone()));
    assert_eq!(by_token.progress, done(1, 1));

    // search results link to the token in its URL-encoded form
    let by_encoded_token = h.runner.run(&encode_movie_id(&token)).await.unwrap();
    assert_eq!(by_encoded_token.title_id, Some(title_id));
    assert_eq!(by_encoded_token.progress, done(1, 1));
}

#[tokio::test]
async fn test_encoded_expired_token_fails_run() {
    let h = harness(
        StubKnowledgeBase::default(),
        StubStore::default(),
        StubLocations::default().with_places("tt0120737", "LOTR", &["Paris"]),
        StubGeocoder::new(),
    );

    let token = h
        .signer
        .sign_at(&TitleId::parse("tt0120737").unwrap(), 1_000)
        .unwrap();
    let err = h.runner.run(&encode_movie_id(&token)).await.unwrap_err();

    assert!(matches!(err, PipelineError::InvalidInput(_)));
    assert_eq!(h.geocoder.call_count(), 0);
    assert_eq!(h.locations.call_count(), 0);
}

#[tokio::test]
async fn test_identical_runs_match() {
    let h = harness(
        StubKnowledgeBase::default(),
        StubStore::default(),
        StubLocations::default().with_places(
            "tt0120737",
            "The Lord of the Rings",
            &["Eiffel Tower, Paris", "INVALID", "TIMEOUT"],
        ),
        StubGeocoder::new(),
    );

    let first = h.runner.run("tt0120737").await.unwrap();
    let second = h.runner.run("tt0120737").await.unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.locations, second.locations);
    assert_eq!(first.progress, second.progress);
    assert_eq!(first.plan, second.plan);
}

#[tokio::test]
async fn test_superseded_run_does_not_commit() {
    let h = harness(
        StubKnowledgeBase::default(),
        StubStore::default().with_rows(
            "tt0000002",
            vec![
                stored_row("Rome", 12.49, 41.89),
                stored_row("Venice", 12.33, 45.44),
            ],
        ),
        StubLocations::default().with_places(
            "tt0000001",
            "Slow Film",
            &["Paris 1", "Paris 2", "Paris 3", "Paris 4"],
        ),
        StubGeocoder::slow(Duration::from_millis(40)),
    );

    let first_ticket = h.runner.begin("tt0000001");
    let runner = Arc::clone(&h.runner);
    let first = tokio::spawn(async move { runner.execute(first_ticket).await });

    tokio::time::sleep(Duration::from_millis(60)).await;
    let second = h.runner.run("tt0000002").await.unwrap();
    let first = first.await.unwrap().unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.locations.len(), 4);

    let snapshot = h.runner.broadcaster().snapshot();
    assert_eq!(snapshot.run_id, Some(second.run_id));
    assert_eq!(snapshot.target_id.as_deref(), Some("tt0000002"));
    assert_eq!(snapshot.progress, done(2, 2));

    let report = h.runner.last_report().await.unwrap();
    assert_eq!(report.run_id(), second.run_id);
}

#[tokio::test]
async fn test_superseded_run_skips_title_lookup() {
    let knowledge_base = StubKnowledgeBase::default()
        .with_label("tt0000001", "Slow Film")
        .with_label("tt0000002", "Fast Film");
    let label_calls = Arc::clone(&knowledge_base.label_calls);
    let untitled = LocationsPage {
        title: None,
        places: Some(
            ["Paris 1", "Paris 2", "Paris 3"]
                .iter()
                .map(|p| PlaceRecord::new(*p, None))
                .collect(),
        ),
    };
    let h = harness(
        knowledge_base,
        StubStore::default().with_rows("tt0000002", vec![stored_row("Rome", 12.49, 41.89)]),
        StubLocations::default().with_response("tt0000001", Ok(untitled)),
        StubGeocoder::slow(Duration::from_millis(40)),
    );

    let first_ticket = h.runner.begin("tt0000001");
    let runner = Arc::clone(&h.runner);
    let first = tokio::spawn(async move { runner.execute(first_ticket).await });

    tokio::time::sleep(Duration::from_millis(60)).await;
    let second = h.runner.run("tt0000002").await.unwrap();
    let first = first.await.unwrap().unwrap();

    assert_eq!(second.title.as_deref(), Some("Fast Film"));
    assert_eq!(first.title, None);
    assert!(first.plan.is_empty());
    assert_eq!(label_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_search_is_recorded_with_canonical_id() {
    let h = harness(
        StubKnowledgeBase::default().with_film("Q127367", "tt0120737", "Fellowship"),
        StubStore::default(),
        StubLocations::default().with_places("tt0120737", "Fellowship", &["Paris"]),
        StubGeocoder::new(),
    );
    let mut rx = h.event_bus.subscribe();

    h.runner.run("Q127367").await.unwrap();

    let mut recorded = Vec::new();
    for _ in 0..50 {
        recorded = h.searches.recorded();
        if !recorded.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        recorded,
        vec![("tt0120737".to_string(), "Fellowship".to_string())]
    );

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, WwfEvent::SearchRecorded { movie_id, .. } if movie_id == "tt0120737")));
}

#[tokio::test]
async fn test_spawned_run_reports_result() {
    let h = harness(
        StubKnowledgeBase::default(),
        StubStore::default(),
        StubLocations::default().with_places("tt0120737", "LOTR", &["Paris", "INVALID"]),
        StubGeocoder::new(),
    );

    let ticket = h.runner.spawn("tt0120737");

    let mut report = None;
    for _ in 0..100 {
        report = h.runner.last_report().await;
        if report.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    match report {
        Some(RunReport::Completed(result)) => {
            assert_eq!(result.run_id, ticket.run_id());
            assert_eq!(result.progress, done(2, 1));
        }
        other => panic!("expected completed report, got {:?}", other),
    }
}

#[tokio::test]
async fn test_sessions_keep_their_own_runs() {
    let h = harness(
        StubKnowledgeBase::default(),
        StubStore::default().with_rows("tt0000002", vec![stored_row("Rome", 12.49, 41.89)]),
        StubLocations::default().with_places("tt0000001", "First", &["Paris", "Nowhere"]),
        StubGeocoder::new(),
    );
    let sessions = PipelineSessions::new(Arc::clone(&h.runner), Duration::from_secs(60));
    let mut rx = h.event_bus.subscribe();

    let tab_a = sessions.get_or_create("tab-a").await;
    let tab_b = sessions.get_or_create("tab-b").await;
    assert!(Arc::ptr_eq(&tab_a, &sessions.get_or_create("tab-a").await));

    let first = tab_a.run("tt0000001").await.unwrap();
    let second = tab_b.run("tt0000002").await.unwrap();

    // b's run does not supersede a's
    assert_eq!(tab_a.last_report().await.unwrap().run_id(), first.run_id);
    assert_eq!(tab_b.last_report().await.unwrap().run_id(), second.run_id);
    assert_eq!(tab_a.broadcaster().snapshot().progress, done(2, 1));
    assert_eq!(tab_b.broadcaster().snapshot().progress, done(1, 1));
    assert!(h.runner.last_report().await.is_none());

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .filter(|e| e.session_id() == Some("tab-a"))
        .all(|e| !matches!(e, WwfEvent::PipelineCompleted { run_id, .. } if *run_id == second.run_id)));
    assert!(events.iter().any(
        |e| matches!(e, WwfEvent::PipelineCompleted { session_id, run_id, .. } if session_id == "tab-b" && *run_id == second.run_id)
    ));
}

#[tokio::test]
async fn test_idle_sessions_are_evicted() {
    let h = harness(
        StubKnowledgeBase::default(),
        StubStore::default(),
        StubLocations::default().with_places("tt0000001", "First", &["Paris"]),
        StubGeocoder::new(),
    );
    let sessions = PipelineSessions::new(Arc::clone(&h.runner), Duration::ZERO);
    assert!(sessions.is_empty().await);

    let held = sessions.get_or_create("tab-a").await;
    drop(sessions.get_or_create("tab-b").await);

    // tab-a is still referenced, tab-b is idle
    assert_eq!(sessions.evict_idle().await, 1);
    assert!(sessions.get("tab-b").await.is_none());
    assert!(sessions.get("tab-a").await.is_some());

    drop(held);
    drop(sessions.get_or_create("tab-c").await);
    assert!(sessions.get("tab-a").await.is_none());
    assert_eq!(sessions.len().await, 1);
}
