use crate::contracts::ContractRegistry;
use crate::hub::RelayHub;
use crate::prearrival::PreArrivalStore;
use corridor_contracts::topics::HEALTH_TOPIC;
use rumqttc::{AsyncClient, QoS};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{self, JoinHandle};
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
pub struct RelayHealth {
    pub uptime_seconds: u64,
    pub peers_connected: u32,
    pub rooms_active: u32,
    pub contracts_loaded: u32,
    pub prearrival_notes: u32,
    pub memory_usage_mb: f32,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<parking_lot::Mutex<String>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(parking_lot::Mutex::new("connecting".to_string())),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn mark_mqtt_disconnected(&self) {
        *self.mqtt_status.lock() = "disconnected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn get_health(&self, hub: &RelayHub, store: &PreArrivalStore, contracts: &ContractRegistry) -> RelayHealth {
        RelayHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            peers_connected: hub.peer_count() as u32,
            rooms_active: hub.room_count() as u32,
            contracts_loaded: contracts.list_contracts().len() as u32,
            prearrival_notes: store.len() as u32,
            memory_usage_mb: get_memory_usage_mb(),
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
        }
    }

    /// Démarre la publication auto du health relay, via le client MQTT partagé
    pub fn spawn_health_publisher(
        &self,
        client: AsyncClient,
        hub: RelayHub,
        store: PreArrivalStore,
        contracts: ContractRegistry,
        every: Duration,
    ) -> JoinHandle<()> {
        let tracker = self.clone();

        task::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let health = tracker.get_health(&hub, &store, &contracts);
                let payload = match serde_json::to_vec(&health) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "health encode failed");
                        continue;
                    }
                };
                match client.publish(HEALTH_TOPIC, QoS::AtLeastOnce, false, payload).await {
                    Ok(()) => debug!(
                        uptime = health.uptime_seconds,
                        peers = health.peers_connected,
                        rooms = health.rooms_active,
                        "published relay health"
                    ),
                    Err(e) => warn!(error = ?e, "failed to publish relay health"),
                }
            }
        })
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        let pid = std::process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        if let Ok(kb) = kb_str.parse::<u64>() {
                            return (kb as f32) / 1024.0; // KB -> MB
                        }
                    }
                }
            }
        }
    }

    0.0
}
