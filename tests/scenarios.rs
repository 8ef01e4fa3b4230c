//! End-to-end scenarios over the public API.

use chrono::{DateTime, Duration, TimeZone, Utc};
use trackflow::{
    cut_track_with_section, intersect_track, sort_events, AnalysisConfig, AnalysisEngine,
    AreaSection, Coordinate, CountTag, Detection, EventFilter, EventType, FlowRepository,
    LineSection, RelativeOffsetCoordinate, Section, SectionRepository, Track, TrackAnalysisError,
    TrackDataset, TrackId, TrackProvider,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 12, 7, 0, 0).unwrap()
}

/// Track through `points`, one detection per second starting `offset_s` after t0.
fn track(id: &str, class: &str, offset_s: i64, points: &[(f64, f64)]) -> Track {
    let detections = points
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| {
            Detection::new(
                x,
                y,
                0.0,
                0.0,
                class,
                t0() + Duration::seconds(offset_s + i as i64),
                i as u32 + 1,
                "crossing01_2024-09-12_07-00-00.mp4",
            )
        })
        .collect();
    Track::new(id, class, detections).unwrap()
}

fn line(id: &str, points: &[(f64, f64)]) -> Section {
    let coordinates = points.iter().map(|&(x, y)| Coordinate::new(x, y)).collect();
    Section::Line(LineSection::new(id, id, coordinates).unwrap())
}

fn area(id: &str, points: &[(f64, f64)]) -> Section {
    let coordinates = points.iter().map(|&(x, y)| Coordinate::new(x, y)).collect();
    Section::Area(AreaSection::new(id, id, coordinates).unwrap())
}

fn sequential_without_scene() -> AnalysisEngine {
    AnalysisEngine::new(
        AnalysisConfig::default()
            .with_num_workers(1)
            .with_scene_events(false),
    )
    .unwrap()
}

#[test]
fn line_crossing_is_interpolated_between_detections() {
    init_logger();
    let tracks = TrackDataset::new(vec![track(
        "1",
        "car",
        0,
        &[(0.0, 0.0), (10.0, 0.0), (15.0, 0.0), (20.0, 0.0), (25.0, 0.0)],
    )]);
    let sections = SectionRepository::new(vec![line("s", &[(5.0, 0.0), (5.0, 10.0)])]);

    let events = sequential_without_scene()
        .create_events(&tracks, &sections)
        .unwrap();

    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.event_type(), EventType::SectionEnter);
    assert_eq!(event.interpolated_occurrence(), t0() + Duration::milliseconds(500));
    assert_eq!(event.interpolated_event_coordinate(), Coordinate::new(5.0, 0.0));
    // Raw values come from the upper detection
    assert_eq!(event.occurrence(), t0() + Duration::seconds(1));
    assert_eq!(event.event_coordinate(), Coordinate::new(10.0, 0.0));
    assert_eq!(event.hostname(), "crossing01");
    assert!((event.direction_vector().magnitude() - 1.0).abs() < 1e-9);
}

#[test]
fn area_crossing_is_anchored_at_detections() {
    init_logger();
    let tracks = TrackDataset::new(vec![track(
        "1",
        "pedestrian",
        0,
        &[(0.5, 1.5), (1.5, 1.5), (3.0, 1.5)],
    )]);
    let sections = SectionRepository::new(vec![area(
        "square",
        &[(1.0, 1.0), (1.0, 2.0), (2.0, 2.0), (2.0, 1.0), (1.0, 1.0)],
    )]);

    let events = sequential_without_scene()
        .create_events(&tracks, &sections)
        .unwrap();

    let kinds: Vec<(EventType, u32)> = events
        .iter()
        .map(|e| (e.event_type(), e.frame_number()))
        .collect();
    assert_eq!(
        kinds,
        vec![(EventType::SectionEnter, 2), (EventType::SectionLeave, 3)]
    );
    for event in &events {
        assert_eq!(event.interpolated_occurrence(), event.occurrence());
        assert_eq!(event.interpolated_event_coordinate(), event.event_coordinate());
    }
}

fn wiggly_tracks(count: usize) -> TrackDataset {
    TrackDataset::new(
        (0..count)
            .map(|k| {
                let points: Vec<(f64, f64)> = (0..12)
                    .map(|i| {
                        let wiggle = if i % 2 == 0 { 0.0 } else { (k % 3) as f64 * 1.5 };
                        (i as f64 * 10.0, k as f64 * 2.0 + wiggle)
                    })
                    .collect();
                let class = if k % 4 == 0 { "truck" } else { "car" };
                track(&format!("{}", k + 1), class, k as i64, &points)
            })
            .collect(),
    )
}

fn mixed_sections() -> SectionRepository {
    SectionRepository::new(vec![
        line("gate", &[(25.0, -10.0), (25.0, 200.0)]),
        line("zigzag", &[(60.0, -10.0), (64.0, 30.0), (58.0, 60.0), (62.0, 200.0)]),
        area(
            "box",
            &[(30.0, 10.0), (30.0, 40.0), (70.0, 40.0), (70.0, 10.0), (30.0, 10.0)],
        ),
    ])
}

#[test]
fn results_do_not_depend_on_worker_count() {
    init_logger();
    let tracks = wiggly_tracks(40);
    let sections = mixed_sections();

    let reference = AnalysisEngine::new(AnalysisConfig::default().with_num_workers(1))
        .unwrap()
        .create_events(&tracks, &sections)
        .unwrap();
    assert!(reference.len() > 40 * 2);

    for workers in [2, 3, 7, 64] {
        let events = AnalysisEngine::new(AnalysisConfig::default().with_num_workers(workers))
            .unwrap()
            .create_events(&tracks, &sections)
            .unwrap();
        assert_eq!(events, reference, "{} workers", workers);
    }
}

#[test]
fn section_events_follow_detection_order_per_track() {
    init_logger();
    let tracks = wiggly_tracks(12);
    let sections = mixed_sections();

    for track in tracks.tracks() {
        for section in sections_vec(&sections) {
            let events = intersect_track(
                track,
                std::slice::from_ref(&section),
                RelativeOffsetCoordinate::CENTER,
            )
            .unwrap();
            let times: Vec<_> = events.iter().map(|e| e.interpolated_occurrence()).collect();
            assert!(times.windows(2).all(|w| w[0] <= w[1]));
            for event in &events {
                let magnitude = event.direction_vector().magnitude();
                assert!(magnitude == 0.0 || (magnitude - 1.0).abs() < 1e-9);
            }
        }
    }
}

fn sections_vec(repository: &SectionRepository) -> Vec<Section> {
    use trackflow::SectionProvider;
    repository.sections().to_vec()
}

struct InconsistentIndex(TrackDataset);

impl TrackProvider for InconsistentIndex {
    fn usable_track_ids(&self) -> Vec<TrackId> {
        let mut ids = self.0.usable_track_ids();
        ids.insert(0, TrackId::new("404"));
        ids
    }

    fn get(&self, id: &TrackId) -> Option<&Track> {
        self.0.get(id)
    }
}

#[test]
fn unknown_track_id_aborts_the_run() {
    init_logger();
    let tracks = InconsistentIndex(wiggly_tracks(6));
    let engine = AnalysisEngine::new(AnalysisConfig::default().with_num_workers(3)).unwrap();

    let err = engine.create_events(&tracks, &mixed_sections()).unwrap_err();
    match &err {
        TrackAnalysisError::BatchFailed { batch, source } => {
            assert_eq!(*batch, 0);
            assert!(matches!(
                source.as_ref(),
                TrackAnalysisError::TrackNotFound { track_id } if track_id == "404"
            ));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.to_string().contains("404"));
}

#[test]
fn full_pipeline_from_json() {
    init_logger();
    let config = AnalysisConfig::from_json(
        r#"{
            "num_workers": 2,
            "include_scene_events": false,
            "counting": {"interval_seconds": 60, "by_classification": true}
        }"#,
    )
    .unwrap();
    let sections = SectionRepository::from_json(
        r#"[
            {"type": "line", "id": "west", "name": "West",
             "coordinates": [{"x": 5.0, "y": -5.0}, {"x": 5.0, "y": 5.0}]},
            {"type": "line", "id": "east", "name": "East",
             "coordinates": [{"x": 45.0, "y": -5.0}, {"x": 45.0, "y": 5.0}]}
        ]"#,
    )
    .unwrap();
    let flows = FlowRepository::from_json(
        r#"[
            {"id": "we", "name": "West to East", "start": "west", "end": "east"},
            {"id": "ew", "name": "East to West", "start": "east", "end": "west", "distance": 40.0}
        ]"#,
    )
    .unwrap();

    let eastbound = [(0.0, 0.0), (10.0, 0.0), (20.0, 0.0), (30.0, 0.0), (40.0, 0.0), (50.0, 0.0)];
    let westbound: Vec<(f64, f64)> = eastbound.iter().rev().copied().collect();
    let tracks = TrackDataset::new(vec![
        track("1", "car", 0, &eastbound),
        track("2", "car", 10, &eastbound),
        track("3", "car", 20, &eastbound),
        track("4", "bicycle", 30, &westbound),
        // Too short to be analyzed
        track("5", "car", 40, &[(0.0, 0.0)]),
    ]);

    let engine = AnalysisEngine::new(config).unwrap();
    let result = engine
        .analyze(&tracks, &sections, &flows, &EventFilter::new())
        .unwrap();

    assert_eq!(result.stats.track_count, 4);
    assert_eq!(result.events.len(), 8);
    assert_eq!(result.assignments.len(), 4);

    let tag = |flow: &str, class: &str| CountTag {
        flow: flow.into(),
        classification: Some(class.to_string()),
        bucket: Some(t0()),
    };
    assert_eq!(result.count.get(&tag("we", "car")), 3);
    assert_eq!(result.count.get(&tag("ew", "bicycle")), 1);
    assert_eq!(result.count.get(&tag("ew", "car")), 0);
    assert_eq!(result.count.len(), 4);

    let exported: serde_json::Value =
        serde_json::from_str(&result.count.to_json().unwrap()).unwrap();
    assert_eq!(exported.as_array().unwrap().len(), 4);

    // Bicycles only
    let bicycles = engine.assign(
        &result.events,
        &flows,
        &EventFilter::new().with_classifications(["bicycle"]),
    );
    assert_eq!(bicycles.len(), 1);
    assert_eq!(bicycles[0].flow.id.as_str(), "ew");
}

#[test]
fn scene_events_use_configured_offsets() {
    init_logger();
    let bottom = RelativeOffsetCoordinate::new(0.5, 1.0).unwrap();
    let config = AnalysisConfig::default()
        .with_num_workers(1)
        .with_offset(EventType::EnterScene, bottom);
    let detections = vec![
        Detection::new(0.0, 0.0, 4.0, 2.0, "car", t0(), 1, "cam_a.mp4"),
        Detection::new(10.0, 0.0, 4.0, 2.0, "car", t0() + Duration::seconds(1), 2, "cam_a.mp4"),
    ];
    let tracks = TrackDataset::new(vec![Track::new("1", "car", detections).unwrap()]);

    let mut events = AnalysisEngine::new(config)
        .unwrap()
        .create_events(&tracks, &SectionRepository::default())
        .unwrap();
    sort_events(&mut events);

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type(), EventType::EnterScene);
    assert_eq!(events[0].event_coordinate(), Coordinate::new(2.0, 2.0));
    assert!(events[0].section_id().is_none());
    assert_eq!(events[1].event_type(), EventType::LeaveScene);
    assert_eq!(events[1].event_coordinate(), Coordinate::new(12.0, 1.0));
}

#[test]
fn cutting_a_track_at_a_line() {
    init_logger();
    // Out and back across x = 15
    let there_and_back = track(
        "9",
        "car",
        0,
        &[(0.0, 0.0), (10.0, 0.0), (20.0, 0.0), (30.0, 0.0), (20.0, 1.0), (10.0, 1.0)],
    );
    let Section::Line(cutter) = line("cut", &[(15.0, -5.0), (15.0, 5.0)]) else {
        unreachable!()
    };

    let pieces =
        cut_track_with_section(&there_and_back, &cutter, &RelativeOffsetCoordinate::CENTER)
            .unwrap();

    let ids: Vec<&str> = pieces.iter().map(|p| p.id().as_str()).collect();
    assert_eq!(ids, vec!["9_0", "9_1", "9_2"]);
    let sizes: Vec<usize> = pieces.iter().map(|p| p.len()).collect();
    assert_eq!(sizes, vec![2, 3, 1]);
    assert!(pieces.iter().all(|p| p.classification() == "car"));
}
