//! Corridor Guardian - device agent for the corridor relay
//!
//! Modes:
//! - `corridor-guardian` / `track`: publish this vehicle's telemetry into `safe-<vehicleId>`
//! - `watch <room>`: follow a vehicle room (and the configured zone) from a viewer device
//! - `note <file.json> [zone]`: send a pre-arrival note, then mirror it onto the zone

use anyhow::{bail, Context, Result};
use corridor_contracts::geodesy::eta_minutes;
use corridor_contracts::{Battery, Delivery, EventName, PreArrivalNote, ServerEvent};
use corridor_guardian::channel::RelayChannel;
use corridor_guardian::config::GuardianConfig;
use corridor_guardian::mqtt::{connect_relay, MqttTuning};
use corridor_guardian::prearrival::PreArrivalSender;
use corridor_guardian::sampler::{BatterySource, GeoSampler};
use corridor_guardian::session::{SessionConfig, TelemetrySession};
use corridor_guardian::sources::{FixedBattery, SimulatedRoute, SysfsBattery};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

enum Mode {
    Track,
    Watch(String),
    Note { file: String, zone: Option<String> },
}

fn parse_mode(args: &[String]) -> Result<Mode> {
    match args.first().map(String::as_str) {
        None | Some("track") => Ok(Mode::Track),
        Some("watch") => {
            let room = args.get(1).context("usage: corridor-guardian watch <room>")?;
            Ok(Mode::Watch(room.clone()))
        }
        Some("note") => {
            let file = args.get(1).context("usage: corridor-guardian note <file.json> [zone]")?;
            Ok(Mode::Note { file: file.clone(), zone: args.get(2).cloned() })
        }
        Some(other) => bail!("unknown mode '{other}' (expected track, watch or note)"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("corridor_guardian=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = parse_mode(&args)?;
    let config = GuardianConfig::load().await.context("Failed to load guardian config")?;

    let tuning = MqttTuning {
        keep_alive: Duration::from_secs(config.relay.keep_alive_secs.max(5)),
        reconnect_backoff: Duration::from_secs(config.relay.reconnect_backoff_secs.max(1)),
    };
    let relay = connect_relay(&config.relay.endpoint, &config.peer_id(), tuning)
        .with_context(|| format!("Failed to open relay {}", config.relay.endpoint))?;
    info!(peer = %config.peer_id(), vehicle = %config.vehicle.vehicle_id, "guardian started");

    let outcome = match mode {
        Mode::Track => track(&config, relay.clone()).await,
        Mode::Watch(room) => watch(&config, &relay, &room).await,
        Mode::Note { file, zone } => note(&config, relay.clone(), &file, zone).await,
    };

    info!(rooms = ?relay.held_rooms(), "releasing relay channel");
    relay.disconnect();
    outcome
}

async fn track(config: &GuardianConfig, relay: RelayChannel) -> Result<()> {
    let battery: Arc<dyn BatterySource> = match (config.battery.fixed_percent, &config.battery.sysfs_path) {
        (Some(p), _) => Arc::new(FixedBattery(Battery::Percent(p.min(100)))),
        (None, Some(path)) => Arc::new(SysfsBattery::new(path.clone())),
        (None, None) => match SysfsBattery::discover() {
            Some(b) => Arc::new(b),
            None => Arc::new(FixedBattery(Battery::Unknown)),
        },
    };
    let route = Arc::new(SimulatedRoute::new(config.waypoints(), config.route.speed_mps));
    if let Some(eta) = eta_minutes(route.length_m(), config.route.speed_mps) {
        info!(route_m = route.length_m().round(), eta_minutes = eta, "simulated route loaded");
    }
    let sampler = GeoSampler::new(route, battery).with_freshness(config.freshness());

    if let Some(zone) = &config.zone {
        relay.join_zone(zone)?;
        print_zone_events(&relay);
    }

    let mut session = TelemetrySession::new(relay.clone(), sampler);
    session
        .start(SessionConfig::new(config.room_id(), config.status_label()).with_tick(config.tick()))
        .context("Failed to start telemetry session")?;

    tokio::signal::ctrl_c().await.context("Failed to wait for ctrl-c")?;
    let stats = session.stats();
    session.stop();
    info!(published = stats.published, dropped = stats.dropped, failed = stats.failed, "tracking stopped");
    Ok(())
}

async fn watch(config: &GuardianConfig, relay: &RelayChannel, room: &str) -> Result<()> {
    let mut updates = relay.subscribe(EventName::TelemetryUpdate);
    relay.join(room)?;
    if let Some(zone) = &config.zone {
        relay.join_zone(zone)?;
        print_zone_events(relay);
    }
    info!(%room, "watching");

    loop {
        tokio::select! {
            Some(delivery) = updates.recv() => print_delivery(&delivery),
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    relay.leave(room)?;
    Ok(())
}

async fn note(config: &GuardianConfig, relay: RelayChannel, file: &str, zone: Option<String>) -> Result<()> {
    let zone = zone.or_else(|| config.zone.clone()).context("no zone given and none configured")?;
    let raw = tokio::fs::read_to_string(file).await.with_context(|| format!("Failed to read {file}"))?;
    let note: PreArrivalNote = serde_json::from_str(&raw).context("Invalid pre-arrival note JSON")?;

    wait_connected(&relay, Duration::from_secs(5)).await;
    let sender = PreArrivalSender::new(config.api.base_url.clone(), config.api.api_key.clone(), relay);
    let receipt = sender.send(&zone, note).await?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

fn print_zone_events(relay: &RelayChannel) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
    for event in [EventName::VirtualSirenAlert, EventName::ActiveCorridorUpdate, EventName::PreArrivalNoteEmit] {
        let tx = tx.clone();
        relay.on(event, move |d| {
            let _ = tx.send(d.clone());
        });
    }
    tokio::spawn(async move {
        while let Some(delivery) = rx.recv().await {
            print_delivery(&delivery);
        }
    });
}

fn print_delivery(delivery: &Delivery) {
    match &delivery.event {
        ServerEvent::TelemetryUpdate(u) => {
            info!(room = %delivery.room, lat = u.lat, lng = u.lng, battery = %u.battery, status = %u.status, "telemetry")
        }
        ServerEvent::VirtualSirenAlert(a) => {
            warn!(zone = %delivery.room, eta_minutes = a.eta_minutes.get(), started_at = a.started_at, "virtual siren")
        }
        ServerEvent::ActiveCorridorUpdate(c) => {
            info!(zone = %delivery.room, active = c.active, phase = c.phase.as_str(), "corridor")
        }
        ServerEvent::PreArrivalNoteEmit(n) => {
            info!(zone = %delivery.room, ambulance = %n.ambulance_id, hospital = %n.hospital_id, eta = n.eta_minutes, "pre-arrival note")
        }
    }
}

async fn wait_connected(relay: &RelayChannel, limit: Duration) {
    let deadline = tokio::time::Instant::now() + limit;
    while !relay.is_connected() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    if !relay.is_connected() {
        warn!("relay not connected, the note will be persisted without mirror");
    }
}
