/*!
Harness de test du relay

Monte un relay kernel complet en mémoire (hub + zones + drills + store) et y
branche des guardians via `LoopbackTransport` :
- création de peers (canal relay + transport pilotable)
- helpers d'attente sur les livraisons, avec timeout
- état HTTP prêt pour `corridor_kernel::http::build_router`
*/

use crate::relay_stub::LoopbackTransport;
use anyhow::{bail, Result};
use corridor_contracts::{Delivery, EventName};
use corridor_guardian::channel::RelayChannel;
use corridor_kernel::config::DrillConf;
use corridor_kernel::contracts::ContractRegistry;
use corridor_kernel::drill::CorridorDrills;
use corridor_kernel::health::HealthTracker;
use corridor_kernel::http::AppState;
use corridor_kernel::hub::RelayHub;
use corridor_kernel::prearrival::PreArrivalStore;
use corridor_kernel::zones::ZoneBroadcastService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

/// Logs de test (capturés par le test runner), une seule init par process
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .try_init();
}

/// Peer guardian branché sur le harness
pub struct TestPeer {
    pub channel: RelayChannel,
    pub transport: Arc<LoopbackTransport>,
}

/// Relay kernel en mémoire
pub struct RelayHarness {
    pub hub: RelayHub,
    pub zones: ZoneBroadcastService,
    pub drills: CorridorDrills,
    pub store: PreArrivalStore,
}

impl RelayHarness {
    /// Relay fire-and-forget (config par défaut)
    pub fn new() -> Self {
        init_tracing();
        let hub = RelayHub::new();
        Self::assemble(hub.clone(), ZoneBroadcastService::new(hub))
    }

    /// Relay avec rattrapage du dernier statut corridor
    pub fn with_corridor_replay() -> Self {
        init_tracing();
        let hub = RelayHub::new();
        Self::assemble(hub.clone(), ZoneBroadcastService::with_corridor_replay(hub))
    }

    fn assemble(hub: RelayHub, zones: ZoneBroadcastService) -> Self {
        let drills = CorridorDrills::new(zones.clone(), DrillConf::default());
        Self { hub, zones, drills, store: PreArrivalStore::new() }
    }

    /// Connecte un guardian ; doit être appelé dans un runtime tokio
    pub fn peer(&self, peer_id: &str) -> TestPeer {
        let (transport, signals) = LoopbackTransport::attach(&self.zones, peer_id);
        let channel = RelayChannel::connect(transport.clone(), signals);
        TestPeer { channel, transport }
    }

    /// État HTTP du kernel partageant ce relay
    pub fn app_state(&self, api_key: Option<&str>) -> AppState {
        AppState {
            zones: self.zones.clone(),
            drills: self.drills.clone(),
            store: self.store.clone(),
            health: HealthTracker::new(),
            contracts: ContractRegistry::builtin(),
            api_key: api_key.map(String::from),
        }
    }

    /// Attend que `peer` soit membre de `room` côté kernel
    pub async fn wait_member(&self, peer: &str, room: &str, limit: Duration) -> Result<()> {
        let hub = self.hub.clone();
        wait_until(limit, || hub.is_member(peer, room)).await
    }
}

impl Default for RelayHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestPeer {
    pub fn subscribe(&self, event: EventName) -> mpsc::UnboundedReceiver<Delivery> {
        self.channel.subscribe(event)
    }
}

/// Prochaine livraison, ou erreur après `limit`
pub async fn next_delivery(rx: &mut mpsc::UnboundedReceiver<Delivery>, limit: Duration) -> Result<Delivery> {
    match timeout(limit, rx.recv()).await {
        Ok(Some(delivery)) => Ok(delivery),
        Ok(None) => bail!("delivery stream closed"),
        Err(_) => bail!("no delivery within {limit:?}"),
    }
}

/// Vérifie qu'aucune livraison n'arrive pendant `window`
pub async fn assert_silent(rx: &mut mpsc::UnboundedReceiver<Delivery>, window: Duration) -> Result<()> {
    match timeout(window, rx.recv()).await {
        Ok(Some(delivery)) => bail!("unexpected {} in room {}", delivery.name(), delivery.room),
        Ok(None) | Err(_) => Ok(()),
    }
}

/// Interroge `cond` toutes les 5 ms jusqu'à `limit`
pub async fn wait_until<F: Fn() -> bool>(limit: Duration, cond: F) -> Result<()> {
    let poll = async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    timeout(limit, poll).await.map_err(|_| anyhow::anyhow!("condition not met within {limit:?}"))
}
