//! Fan-out integration: raw reports in one side, area-scoped live messages
//! out the other.

use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use aloft::aircraft::{AddressType, Aircraft, AircraftRegistry, AircraftType};
use aloft::airports::AirportsRepository;
use aloft::config::{LiveConfig, TrackerConfig};
use aloft::fix_processor::FixProcessor;
use aloft::fixes::{RawReport, ReportFormat};
use aloft::fixes_repo::FixesRepository;
use aloft::flight_tracker::FlightTracker;
use aloft::flights_repo::FlightsRepository;
use aloft::geometry::BoundingBox;
use aloft::live_feed::ServerMessage;
use aloft::subscriptions::SubscriptionRouter;

fn build_processor(router: std::sync::Arc<SubscriptionRouter>) -> FixProcessor {
    let registry = AircraftRegistry::new();
    registry.register(Aircraft {
        id: Uuid::new_v4(),
        address: 0xDDA5BA,
        address_type: AddressType::Flarm,
        registration: Some("F-CABC".to_string()),
        aircraft_type: AircraftType::Glider,
        is_tow_plane: false,
        club_id: None,
    });

    let fixes_repo = FixesRepository::new(None);
    let flights_repo = FlightsRepository::new();
    let tracker = FlightTracker::new(
        flights_repo.clone(),
        fixes_repo.clone(),
        AirportsRepository::new(Vec::new()),
        registry.clone(),
        TrackerConfig::default(),
    );
    FixProcessor::new(registry, fixes_repo, tracker, LiveConfig::default()).with_router(router)
}

/// Glider at (44.2N, 6.3E), airborne
fn airborne_line(timestamp: DateTime<Utc>) -> RawReport {
    let line = format!(
        "FLRDDA5BA>APRS,qAS,LFNM:/{}h4412.00N/00618.00E'090/060/A=004000 id06DDA5BA +120fpm",
        timestamp.format("%H%M%S"),
    );
    RawReport::new(line.into_bytes(), ReportFormat::Ogn, timestamp)
}

fn drain(receiver: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = receiver.try_recv() {
        messages.push(message);
    }
    messages
}

#[tokio::test]
async fn test_subscribed_viewer_receives_fix_and_flight_events() {
    let router = SubscriptionRouter::new(64);
    let processor = build_processor(router.clone());

    let (connection_id, mut receiver) = router.register();
    // Viewport over the southern Alps, covering (44.2, 6.3)
    router.subscribe(connection_id, BoundingBox::new(45.0, 44.0, 7.0, 6.0));
    drain(&mut receiver);

    let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
    processor.process_raw_report(airborne_line(t0)).await.unwrap();

    let messages = drain(&mut receiver);
    // The new fix itself, plus the refreshed aircraft snapshot for the
    // flight that just opened
    assert!(
        messages
            .iter()
            .any(|m| matches!(m, ServerMessage::FixReceived { .. })),
        "expected a fix_received message, got {messages:?}"
    );
    let aircraft_received = messages.iter().find_map(|m| match m {
        ServerMessage::AircraftReceived {
            aircraft,
            recent_fixes,
        } => Some((aircraft, recent_fixes)),
        _ => None,
    });
    let (aircraft, recent_fixes) = aircraft_received.expect("expected aircraft_received");
    assert_eq!(aircraft.registration.as_deref(), Some("F-CABC"));
    assert!(!recent_fixes.is_empty());
}

#[tokio::test]
async fn test_viewer_outside_area_receives_nothing() {
    let router = SubscriptionRouter::new(64);
    let processor = build_processor(router.clone());

    let (connection_id, mut receiver) = router.register();
    // Viewport over the US east coast; the glider flies in the Alps
    router.subscribe(connection_id, BoundingBox::new(41.0, 40.0, -69.0, -71.0));
    drain(&mut receiver);

    let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
    processor.process_raw_report(airborne_line(t0)).await.unwrap();

    assert!(drain(&mut receiver).is_empty());
}

#[tokio::test]
async fn test_timeout_sweep_pushes_aircraft_update() {
    let router = SubscriptionRouter::new(64);
    let processor = build_processor(router.clone());

    let (connection_id, mut receiver) = router.register();
    router.subscribe(connection_id, BoundingBox::new(45.0, 44.0, 7.0, 6.0));
    drain(&mut receiver);

    let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
    processor.process_raw_report(airborne_line(t0)).await.unwrap();
    drain(&mut receiver);

    // The sweep is driven here with a synthetic clock; in production the
    // background task runs it on an interval and fans the events out
    let events = processor.tracker().sweep_timeouts(t0 + Duration::minutes(6)).await;
    assert_eq!(events.len(), 1);
    let flight = events[0].flight().expect("timeout events carry the flight");
    assert_eq!(
        flight.timed_out_at,
        Some(t0 + Duration::minutes(5)),
        "timeout must land exactly at the window boundary"
    );
}
