/**
 * CORRIDOR KERNEL - Point d'entrée du relay
 *
 * RÔLE : Orchestration de tous les modules : config, MQTT, hub/zones, HTTP, health.
 * Bootstrap du relay complet avec gestion d'erreurs et logging.
 *
 * ARCHITECTURE : uplinks MQTT par peer -> dispatch -> hub -> downlinks MQTT par peer,
 * plus API REST opérateur et collaborateur pré-arrivée.
 */

use anyhow::Context;
use corridor_kernel::config::load_config;
use corridor_kernel::contracts::ContractRegistry;
use corridor_kernel::drill::CorridorDrills;
use corridor_kernel::health::HealthTracker;
use corridor_kernel::http::{self, AppState};
use corridor_kernel::hub::RelayHub;
use corridor_kernel::mqtt;
use corridor_kernel::prearrival::PreArrivalStore;
use corridor_kernel::zones::ZoneBroadcastService;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("corridor_kernel=info")),
        )
        .init();

    let cfg = load_config().await;

    // hub + zones (rattrapage corridor selon la conf)
    let hub = RelayHub::new();
    let zones = if cfg.zones.replay_corridor_on_join {
        ZoneBroadcastService::with_corridor_replay(hub.clone())
    } else {
        ZoneBroadcastService::new(hub.clone())
    };
    let drills = CorridorDrills::new(zones.clone(), cfg.zones.drill);
    let store = PreArrivalStore::new();
    let contracts = ContractRegistry::builtin();
    let health = HealthTracker::new();
    info!(contracts = contracts.list_contracts().len(), replay = zones.replays_corridor(), "relay initialised");

    // Client MQTT partagé : uplinks, downlinks et health
    let (client, eventloop) = mqtt::create_mqtt_client(&cfg);
    mqtt::spawn_mqtt_listener(client.clone(), eventloop, zones.clone(), health.clone());
    health.spawn_health_publisher(
        client,
        hub,
        store.clone(),
        contracts.clone(),
        Duration::from_secs(cfg.health.publish_interval_secs.max(1)),
    );

    let app_state = AppState { zones, drills: drills.clone(), store, health, contracts, api_key: cfg.api_key.clone() };
    let app = http::build_router(app_state);

    let addr = format!("{}:{}", cfg.http.bind, cfg.http.port);
    let listener = TcpListener::bind(&addr).await.with_context(|| format!("bind {addr}"))?;
    info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("http server")?;

    info!(drills = drills.running_count(), "aborting running drills");
    drills.abort_all();
    info!("relay stopped");
    Ok(())
}
