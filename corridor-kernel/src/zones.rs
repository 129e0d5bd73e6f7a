/**
 * ZONE BROADCAST - Autorité sirène virtuelle / corridor / notes pré-arrivée
 *
 * RÔLE :
 * Accepte les abonnements de zone et pousse dans une zone :
 * - alertes sirène (éphémères, jamais retenues)
 * - changements de statut corridor
 * - miroirs temps réel des notes pré-arrivée
 *
 * Les zones sont indépendantes ; un broadcast ne traverse jamais une frontière
 * de zone. Aucune validation au-delà de "zoneId est une clé de room".
 *
 * RATTRAPAGE :
 * Par défaut un peer qui rejoint après un broadcast ne reçoit rien. Avec
 * `replay_corridor_on_join`, le dernier statut corridor de la zone lui est livré.
 */

use crate::hub::RelayHub;
use corridor_contracts::{
    now_millis, ActiveCorridorUpdate, CorridorPhase, CorridorStatus, EventName, PreArrivalNote, ServerEvent,
    SirenAlert, VirtualSirenAlert,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::info;

/// Résultat d'un broadcast de zone
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastReceipt {
    pub zone_id: String,
    pub event: &'static str,
    pub delivered: usize,
}

#[derive(Clone)]
pub struct ZoneBroadcastService {
    hub: RelayHub,
    last_corridor: Option<Arc<Mutex<HashMap<String, CorridorStatus>>>>,
}

impl ZoneBroadcastService {
    /// Fire-and-forget : aucun état retenu
    pub fn new(hub: RelayHub) -> Self {
        Self { hub, last_corridor: None }
    }

    /// Variante qui rejoue le dernier statut corridor aux nouveaux membres
    pub fn with_corridor_replay(hub: RelayHub) -> Self {
        Self { hub, last_corridor: Some(Arc::new(Mutex::new(HashMap::new()))) }
    }

    pub fn hub(&self) -> &RelayHub {
        &self.hub
    }

    pub fn replays_corridor(&self) -> bool {
        self.last_corridor.is_some()
    }

    pub fn join(&self, peer_id: &str, zone_id: &str) {
        let newly = self.hub.join(peer_id, zone_id);
        if !newly {
            return;
        }
        let Some(cache) = &self.last_corridor else { return };
        let last = cache.lock().get(zone_id).cloned();
        if let Some(status) = last {
            self.hub.send_to(peer_id, zone_id, corridor_event(&status));
        }
    }

    pub fn leave(&self, peer_id: &str, zone_id: &str) {
        self.hub.leave(peer_id, zone_id);
    }

    pub fn raise_siren_alert(&self, zone_id: &str, eta_minutes: NonZeroU32) -> BroadcastReceipt {
        let alert = SirenAlert { zone_id: zone_id.to_string(), eta_minutes, started_at: now_millis() };
        let event = ServerEvent::VirtualSirenAlert(VirtualSirenAlert {
            eta_minutes: alert.eta_minutes,
            started_at: alert.started_at,
        });
        let delivered = self.hub.broadcast(zone_id, event, None);
        info!(zone = zone_id, eta = eta_minutes.get(), delivered, "siren alert raised");
        receipt(zone_id, EventName::VirtualSirenAlert, delivered)
    }

    pub fn set_corridor_status(&self, zone_id: &str, active: bool, phase: CorridorPhase) -> BroadcastReceipt {
        let status = CorridorStatus { zone_id: zone_id.to_string(), active, phase };
        let delivered = self.hub.broadcast(zone_id, corridor_event(&status), None);
        if let Some(cache) = &self.last_corridor {
            cache.lock().insert(zone_id.to_string(), status);
        }
        info!(zone = zone_id, active, phase = phase.as_str(), delivered, "corridor status changed");
        receipt(zone_id, EventName::ActiveCorridorUpdate, delivered)
    }

    pub fn relay_pre_arrival_note(&self, zone_id: &str, note: PreArrivalNote) -> BroadcastReceipt {
        let ambulance = note.ambulance_id.clone();
        let delivered = self.hub.broadcast(zone_id, ServerEvent::PreArrivalNoteEmit(note), None);
        info!(zone = zone_id, %ambulance, delivered, "pre-arrival note mirrored");
        receipt(zone_id, EventName::PreArrivalNoteEmit, delivered)
    }
}

fn corridor_event(status: &CorridorStatus) -> ServerEvent {
    ServerEvent::ActiveCorridorUpdate(ActiveCorridorUpdate { active: status.active, phase: status.phase })
}

fn receipt(zone_id: &str, event: EventName, delivered: usize) -> BroadcastReceipt {
    BroadcastReceipt { zone_id: zone_id.to_string(), event: event.as_str(), delivered }
}
