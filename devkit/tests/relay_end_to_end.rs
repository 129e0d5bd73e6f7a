//! Guardian ↔ kernel scenarios over the in-process loopback transport.

use corridor_contracts::{
    ActiveCorridorUpdate, Battery, CorridorPhase, Delivery, EventName, PreArrivalNote, ServerEvent, TelemetryUpdate,
};
use corridor_devkit::test_utils::{assert_silent, next_delivery, wait_until};
use corridor_devkit::{RelayHarness, ScriptedBattery, ScriptedLocation};
use corridor_guardian::prearrival::{NoteError, PreArrivalSender};
use corridor_guardian::sampler::GeoSampler;
use corridor_guardian::session::{SessionConfig, SessionState, TelemetrySession};
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(1);

fn sampler_at(lat: f64, lng: f64) -> (GeoSampler, Arc<ScriptedLocation>) {
    let location = Arc::new(ScriptedLocation::at(lat, lng));
    let sampler = GeoSampler::new(location.clone(), Arc::new(ScriptedBattery::fixed(Battery::Percent(82))));
    (sampler, location)
}

fn eta(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_session_snapshot_reaches_room_member_unchanged() {
    let harness = RelayHarness::new();
    let vehicle = harness.peer("ambulance-1-device");
    let viewer = harness.peer("viewer-b");

    let mut own = vehicle.subscribe(EventName::TelemetryUpdate);
    let mut updates = viewer.subscribe(EventName::TelemetryUpdate);
    viewer.channel.join("safe-ambulance-1").unwrap();

    let (sampler, _location) = sampler_at(12.97, 77.59);
    let mut session = TelemetrySession::new(vehicle.channel.clone(), sampler);
    session.start(SessionConfig::new("safe-ambulance-1", "Vehicle ambulance-1")).unwrap();

    let delivery = next_delivery(&mut updates, WAIT).await.unwrap();
    assert_eq!(
        delivery,
        Delivery::new(
            "safe-ambulance-1",
            ServerEvent::TelemetryUpdate(TelemetryUpdate {
                room_id: "safe-ambulance-1".into(),
                lat: 12.97,
                lng: 77.59,
                battery: Battery::Percent(82),
                status: "Vehicle ambulance-1".into(),
            })
        )
    );
    assert_eq!(
        serde_json::to_value(&delivery).unwrap(),
        json!({
            "room": "safe-ambulance-1",
            "event": "telemetry_update",
            "data": {"roomId": "safe-ambulance-1", "lat": 12.97, "lng": 77.59, "battery": "82%", "status": "Vehicle ambulance-1"}
        })
    );

    // l'émetteur ne reçoit pas son propre snapshot
    assert_silent(&mut own, Duration::from_millis(100)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_no_snapshot_after_stop() {
    let harness = RelayHarness::new();
    let vehicle = harness.peer("vehicle");
    let viewer = harness.peer("viewer");
    let mut updates = viewer.subscribe(EventName::TelemetryUpdate);
    viewer.channel.join("safe-cab-9").unwrap();

    let (sampler, location) = sampler_at(48.85, 2.35);
    let mut session = TelemetrySession::new(vehicle.channel.clone(), sampler);
    session.start(SessionConfig::new("safe-cab-9", "Vehicle cab-9")).unwrap();
    next_delivery(&mut updates, WAIT).await.unwrap();

    session.stop();
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(location.cleared(), 1);
    assert!(!harness.hub.is_member("vehicle", "safe-cab-9"));

    assert_silent(&mut updates, Duration::from_millis(5500)).await.unwrap();
    assert!(vehicle.channel.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_cancelling_sampler_twice_schedules_nothing() {
    let location = Arc::new(ScriptedLocation::at(1.0, 1.0));
    let sampler = GeoSampler::new(location.clone(), Arc::new(ScriptedBattery::fixed(Battery::Unknown)));
    let ticks = Arc::new(parking_lot::Mutex::new(0u32));
    let counter = ticks.clone();

    let mut cancel = sampler.start(Duration::from_secs(1), move |_| *counter.lock() += 1, |_| {});
    tokio::time::sleep(Duration::from_millis(1500)).await;
    cancel.cancel();
    cancel.cancel();

    let seen = *ticks.lock();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(*ticks.lock(), seen);
    assert_eq!(location.watches(), 1);
    assert_eq!(location.cleared(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_siren_reaches_only_zone_members() {
    let harness = RelayHarness::new();
    let a = harness.peer("a");
    let b = harness.peer("b");
    let outsider = harness.peer("outsider");

    let mut rx_a = a.subscribe(EventName::VirtualSirenAlert);
    let mut rx_b = b.subscribe(EventName::VirtualSirenAlert);
    let mut rx_out = outsider.subscribe(EventName::VirtualSirenAlert);
    a.channel.join_zone("city-core").unwrap();
    b.channel.join_zone("city-core").unwrap();
    outsider.channel.join_zone("airport").unwrap();

    let receipt = harness.zones.raise_siren_alert("city-core", eta(4));
    assert_eq!(receipt.delivered, 2);

    for rx in [&mut rx_a, &mut rx_b] {
        let delivery = next_delivery(rx, WAIT).await.unwrap();
        assert_eq!(delivery.room, "city-core");
        match delivery.event {
            ServerEvent::VirtualSirenAlert(alert) => {
                assert_eq!(alert.eta_minutes.get(), 4);
                assert!(alert.started_at > 0);
            }
            unexpected => panic!("unexpected {unexpected:?}"),
        }
    }
    assert_silent(&mut rx_out, Duration::from_millis(100)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_late_zone_joiner_misses_corridor_update() {
    let harness = RelayHarness::new();
    let early = harness.peer("early");
    let mut rx_early = early.subscribe(EventName::ActiveCorridorUpdate);
    early.channel.join_zone("city-core").unwrap();

    harness.zones.set_corridor_status("city-core", true, CorridorPhase::PriorityActive);
    next_delivery(&mut rx_early, WAIT).await.unwrap();

    let late = harness.peer("late");
    let mut rx_late = late.subscribe(EventName::ActiveCorridorUpdate);
    late.channel.join_zone("city-core").unwrap();
    assert_silent(&mut rx_late, Duration::from_millis(200)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_late_zone_joiner_catches_up_when_replay_enabled() {
    let harness = RelayHarness::with_corridor_replay();
    harness.zones.set_corridor_status("city-core", true, CorridorPhase::Clearing);

    let late = harness.peer("late");
    let mut rx_late = late.subscribe(EventName::ActiveCorridorUpdate);
    late.channel.join_zone("city-core").unwrap();

    let delivery = next_delivery(&mut rx_late, WAIT).await.unwrap();
    assert_eq!(
        delivery.event,
        ServerEvent::ActiveCorridorUpdate(ActiveCorridorUpdate { active: true, phase: CorridorPhase::Clearing })
    );
}

#[tokio::test(start_paused = true)]
async fn test_rooms_rejoined_after_reconnect() {
    let harness = RelayHarness::new();
    let viewer = harness.peer("viewer");
    let mut sirens = viewer.subscribe(EventName::VirtualSirenAlert);
    viewer.channel.join_zone("city-core").unwrap();
    viewer.channel.join("safe-bus-12").unwrap();

    viewer.transport.drop_connection();
    assert!(!harness.hub.is_member("viewer", "city-core"));
    assert_eq!(harness.zones.raise_siren_alert("city-core", eta(2)).delivered, 0);

    viewer.transport.restore();
    harness.wait_member("viewer", "city-core", WAIT).await.unwrap();
    harness.wait_member("viewer", "safe-bus-12", WAIT).await.unwrap();

    // pas de rejeu de l'alerte émise pendant la coupure
    assert_silent(&mut sirens, Duration::from_millis(100)).await.unwrap();
    harness.zones.raise_siren_alert("city-core", eta(3));
    let delivery = next_delivery(&mut sirens, WAIT).await.unwrap();
    assert!(matches!(delivery.event, ServerEvent::VirtualSirenAlert(a) if a.eta_minutes.get() == 3));
}

#[tokio::test(start_paused = true)]
async fn test_shared_channel_and_room_lifetime() {
    let harness = RelayHarness::new();
    let peer = harness.peer("tablet");
    let other_consumer = peer.channel.clone();

    peer.channel.join("safe-ambulance-1").unwrap();
    other_consumer.join("safe-ambulance-1").unwrap();
    peer.channel.leave("safe-ambulance-1").unwrap();
    assert!(harness.hub.is_member("tablet", "safe-ambulance-1"), "still held by the other consumer");

    other_consumer.leave("safe-ambulance-1").unwrap();
    assert_eq!(harness.hub.room_count(), 0, "room disappears with its last member");

    other_consumer.join_zone("city-core").unwrap();
    let transport = peer.transport.clone();
    drop(other_consumer);
    assert!(!transport.is_closed());

    drop(peer);
    assert!(transport.is_closed());
    assert!(!harness.hub.is_attached("tablet"));
    assert_eq!(harness.hub.room_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_corridor_drill_sequence_reaches_zone() {
    let harness = RelayHarness::new();
    let viewer = harness.peer("viewer");
    let mut sirens = viewer.subscribe(EventName::VirtualSirenAlert);
    let mut corridor = viewer.subscribe(EventName::ActiveCorridorUpdate);
    viewer.channel.join_zone("city-core").unwrap();

    harness.drills.start_drill("city-core", eta(5));
    next_delivery(&mut sirens, WAIT).await.unwrap();

    let mut phases = Vec::new();
    for _ in 0..3 {
        match next_delivery(&mut corridor, Duration::from_secs(60)).await.unwrap().event {
            ServerEvent::ActiveCorridorUpdate(update) => phases.push((update.active, update.phase)),
            unexpected => panic!("unexpected {unexpected:?}"),
        }
    }
    assert_eq!(
        phases,
        vec![
            (true, CorridorPhase::PriorityActive),
            (true, CorridorPhase::Clearing),
            (false, CorridorPhase::NormalFlow),
        ]
    );
}

fn note() -> PreArrivalNote {
    PreArrivalNote {
        ambulance_id: "ambulance-1".into(),
        hospital_id: "hosp-7".into(),
        patient_name: "R. Rao".into(),
        blood_type: "O+".into(),
        allergies: "penicillin".into(),
        symptoms: "chest pain".into(),
        eta_minutes: 6,
    }
}

#[tokio::test]
async fn test_pre_arrival_note_persisted_then_mirrored() {
    let harness = RelayHarness::new();
    let app = corridor_kernel::http::build_router(harness.app_state(Some("secret")));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let hospital = harness.peer("hosp-7-display");
    let mut notes = hospital.subscribe(EventName::PreArrivalNoteEmit);
    hospital.channel.join_zone("city-core").unwrap();

    let ambulance = harness.peer("ambulance-1-device");
    let base = format!("http://{addr}");

    let rejected = PreArrivalSender::new(base.clone(), Some("wrong".into()), ambulance.channel.clone());
    match rejected.send("city-core", note()).await {
        Err(NoteError::Rejected { status, .. }) => assert_eq!(status, 401),
        other => panic!("expected 401, got {other:?}"),
    }
    assert!(harness.store.is_empty());
    assert_silent(&mut notes, Duration::from_millis(100)).await.unwrap();

    let sender = PreArrivalSender::new(base, Some("secret".into()), ambulance.channel.clone());
    let receipt = sender.send("city-core", note()).await.unwrap();
    assert!(receipt.mirrored);
    assert_eq!(receipt.zone_id, "city-core");
    assert_eq!(harness.store.len(), 1);

    let delivery = next_delivery(&mut notes, WAIT).await.unwrap();
    assert_eq!(delivery.room, "city-core");
    assert_eq!(delivery.event, ServerEvent::PreArrivalNoteEmit(note()));
}

#[tokio::test]
async fn test_pre_arrival_mirror_failure_is_reported_not_raised() {
    let harness = RelayHarness::new();
    let app = corridor_kernel::http::build_router(harness.app_state(Some("secret")));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let ambulance = harness.peer("ambulance-1-device");
    ambulance.transport.drop_connection();
    wait_until(WAIT, || !ambulance.channel.is_connected()).await.unwrap();

    let sender = PreArrivalSender::new(format!("http://{addr}"), Some("secret".into()), ambulance.channel.clone());
    let receipt = sender.send("city-core", note()).await.unwrap();
    assert!(!receipt.mirrored);
    assert_eq!(harness.store.len(), 1);
}
