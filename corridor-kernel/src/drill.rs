//! Corridor drill: the simulated trigger behind the siren/corridor features.
//!
//! siren + `priority-active` → (priority_secs) → `clearing` → (clearing_secs) → `normal-flow`.
//! One drill per zone; starting a new one aborts the previous sequence.
//! A finished sequence removes its own entry, unless a newer drill replaced it.

use crate::config::DrillConf;
use crate::zones::{BroadcastReceipt, ZoneBroadcastService};
use corridor_contracts::CorridorPhase;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

struct RunningDrill {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Clone)]
pub struct CorridorDrills {
    zones: ZoneBroadcastService,
    timings: DrillConf,
    running: Arc<Mutex<HashMap<String, RunningDrill>>>,
    generations: Arc<AtomicU64>,
}

impl CorridorDrills {
    pub fn new(zones: ZoneBroadcastService, timings: DrillConf) -> Self {
        Self {
            zones,
            timings,
            running: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn start_drill(&self, zone_id: &str, eta_minutes: NonZeroU32) -> BroadcastReceipt {
        let siren = self.zones.raise_siren_alert(zone_id, eta_minutes);
        self.zones.set_corridor_status(zone_id, true, CorridorPhase::PriorityActive);

        let zones = self.zones.clone();
        let running = Arc::clone(&self.running);
        let zone = zone_id.to_string();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let DrillConf { priority_secs, clearing_secs } = self.timings;

        // verrou tenu jusqu'à l'insertion : la tâche ne peut pas se retirer avant d'être enregistrée
        let mut drills = self.running.lock();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(priority_secs)).await;
            zones.set_corridor_status(&zone, true, CorridorPhase::Clearing);
            tokio::time::sleep(Duration::from_secs(clearing_secs)).await;
            zones.set_corridor_status(&zone, false, CorridorPhase::NormalFlow);

            let mut drills = running.lock();
            if drills.get(&zone).is_some_and(|d| d.generation == generation) {
                drills.remove(&zone);
            }
            info!(%zone, "corridor drill finished");
        });
        if let Some(previous) = drills.insert(zone_id.to_string(), RunningDrill { generation, task }) {
            previous.task.abort();
        }
        drop(drills);
        info!(zone = zone_id, eta = eta_minutes.get(), "corridor drill started");
        siren
    }

    pub fn is_running(&self, zone_id: &str) -> bool {
        self.running.lock().contains_key(zone_id)
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    pub fn abort_all(&self) {
        for (_, drill) in self.running.lock().drain() {
            drill.task.abort();
        }
    }
}
