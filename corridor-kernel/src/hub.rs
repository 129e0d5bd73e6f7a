/**
 * RELAY HUB - Registre des rooms et des peers connectés
 *
 * RÔLE :
 * Autorité côté serveur sur l'appartenance peer ↔ room. Indépendant du
 * transport : chaque peer est représenté par un `PeerSink` (downlink MQTT,
 * canal in-process pour les tests...).
 *
 * FONCTIONNEMENT :
 * - rooms : room -> set de peers, mutées uniquement par join/leave/detach
 * - une room disparaît quand son dernier membre part
 * - broadcast : les sinks sont collectés sous le verrou puis appelés après
 *   sa libération ; un sink `Closed` est détaché
 * - sessions : nonce de la connexion transport courante de chaque peer, pour
 *   écarter les last-wills d'une connexion remplacée
 */

use corridor_contracts::{Delivery, ServerEvent};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub type PeerId = String;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("peer channel closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Point de livraison d'un peer
pub trait PeerSink: Send + Sync {
    fn deliver(&self, delivery: &Delivery) -> Result<(), DeliveryError>;
}

impl PeerSink for mpsc::UnboundedSender<Delivery> {
    fn deliver(&self, delivery: &Delivery) -> Result<(), DeliveryError> {
        self.send(delivery.clone()).map_err(|_| DeliveryError::Closed)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RoomSummary {
    pub room: String,
    pub members: usize,
}

#[derive(Default)]
struct HubState {
    sinks: HashMap<PeerId, Arc<dyn PeerSink>>,
    rooms: HashMap<String, HashSet<PeerId>>,
    memberships: HashMap<PeerId, HashSet<String>>,
    sessions: HashMap<PeerId, String>,
}

impl HubState {
    fn remove_member(&mut self, peer: &str, room: &str) -> bool {
        let Some(members) = self.rooms.get_mut(room) else { return false };
        let removed = members.remove(peer);
        if members.is_empty() {
            self.rooms.remove(room);
        }
        if let Some(joined) = self.memberships.get_mut(peer) {
            joined.remove(room);
            if joined.is_empty() {
                self.memberships.remove(peer);
            }
        }
        removed
    }
}

#[derive(Clone, Default)]
pub struct RelayHub {
    state: Arc<Mutex<HubState>>,
}

impl RelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enregistre (ou remplace après reconnexion) le sink d'un peer
    pub fn attach(&self, peer: &str, sink: Arc<dyn PeerSink>) {
        self.state.lock().sinks.insert(peer.to_string(), sink);
        debug!(peer, "peer attached");
    }

    /// Mémorise la connexion courante du peer (annoncée par `peer_connect`)
    pub fn set_session(&self, peer: &str, session: &str) {
        let previous = self.state.lock().sessions.insert(peer.to_string(), session.to_string());
        if previous.as_deref() != Some(session) {
            debug!(peer, session, "peer session opened");
        }
    }

    pub fn session(&self, peer: &str) -> Option<String> {
        self.state.lock().sessions.get(peer).cloned()
    }

    pub fn is_attached(&self, peer: &str) -> bool {
        self.state.lock().sinks.contains_key(peer)
    }

    /// Retourne true si le peer n'était pas déjà membre
    pub fn join(&self, peer: &str, room: &str) -> bool {
        let mut st = self.state.lock();
        let added = st.rooms.entry(room.to_string()).or_default().insert(peer.to_string());
        st.memberships.entry(peer.to_string()).or_default().insert(room.to_string());
        if added {
            debug!(peer, room, "joined room");
        }
        added
    }

    pub fn leave(&self, peer: &str, room: &str) -> bool {
        let removed = self.state.lock().remove_member(peer, room);
        if removed {
            debug!(peer, room, "left room");
        }
        removed
    }

    /// Retire le peer de toutes ses rooms et oublie son sink
    pub fn detach(&self, peer: &str) -> Vec<String> {
        let mut st = self.state.lock();
        st.sinks.remove(peer);
        st.sessions.remove(peer);
        let rooms: Vec<String> = st
            .memberships
            .get(peer)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default();
        for room in &rooms {
            st.remove_member(peer, room);
        }
        debug!(peer, rooms = rooms.len(), "peer detached");
        rooms
    }

    pub fn members(&self, room: &str) -> Vec<PeerId> {
        self.state
            .lock()
            .rooms
            .get(room)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, peer: &str, room: &str) -> bool {
        self.state.lock().rooms.get(room).is_some_and(|m| m.contains(peer))
    }

    /// Livre un événement à un seul peer, dans le contexte d'une room
    pub fn send_to(&self, peer: &str, room: &str, event: ServerEvent) -> bool {
        let sink = self.state.lock().sinks.get(peer).cloned();
        let Some(sink) = sink else { return false };
        let delivery = Delivery::new(room, event);
        self.deliver_all(vec![(peer.to_string(), sink)], &delivery) == 1
    }

    /// Fan-out vers les membres courants de la room ; retourne le nombre de livraisons
    pub fn broadcast(&self, room: &str, event: ServerEvent, except: Option<&str>) -> usize {
        let targets: Vec<(PeerId, Arc<dyn PeerSink>)> = {
            let st = self.state.lock();
            let Some(members) = st.rooms.get(room) else { return 0 };
            members
                .iter()
                .filter(|p| Some(p.as_str()) != except)
                .filter_map(|p| st.sinks.get(p).map(|s| (p.clone(), s.clone())))
                .collect()
        };
        if targets.is_empty() {
            return 0;
        }
        let delivery = Delivery::new(room, event);
        self.deliver_all(targets, &delivery)
    }

    fn deliver_all(&self, targets: Vec<(PeerId, Arc<dyn PeerSink>)>, delivery: &Delivery) -> usize {
        let mut delivered = 0;
        let mut gone = Vec::new();
        for (peer, sink) in targets {
            match sink.deliver(delivery) {
                Ok(()) => delivered += 1,
                Err(DeliveryError::Closed) => gone.push(peer),
                Err(e) => warn!(%peer, room = %delivery.room, event = %delivery.name(), error = %e, "delivery failed"),
            }
        }
        for peer in gone {
            warn!(%peer, "peer sink closed, detaching");
            self.detach(&peer);
        }
        delivered
    }

    pub fn peer_count(&self) -> usize {
        self.state.lock().sinks.len()
    }

    pub fn room_count(&self) -> usize {
        self.state.lock().rooms.len()
    }

    pub fn room_summaries(&self) -> Vec<RoomSummary> {
        let mut list: Vec<RoomSummary> = self
            .state
            .lock()
            .rooms
            .iter()
            .map(|(room, m)| RoomSummary { room: room.clone(), members: m.len() })
            .collect();
        list.sort_by(|a, b| a.room.cmp(&b.room));
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corridor_contracts::{ActiveCorridorUpdate, CorridorPhase};

    fn peer(hub: &RelayHub, id: &str) -> mpsc::UnboundedReceiver<Delivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        hub.attach(id, Arc::new(tx));
        rx
    }

    fn corridor() -> ServerEvent {
        ServerEvent::ActiveCorridorUpdate(ActiveCorridorUpdate { active: true, phase: CorridorPhase::PriorityActive })
    }

    #[test]
    fn test_room_lifetime_follows_members() {
        let hub = RelayHub::new();
        let _a = peer(&hub, "a");
        let _b = peer(&hub, "b");

        assert!(hub.join("a", "safe-1"));
        assert!(!hub.join("a", "safe-1"));
        assert!(hub.join("b", "safe-1"));
        assert_eq!(hub.room_summaries(), vec![RoomSummary { room: "safe-1".into(), members: 2 }]);

        assert!(hub.leave("a", "safe-1"));
        assert!(!hub.leave("a", "safe-1"));
        assert_eq!(hub.room_count(), 1);
        hub.leave("b", "safe-1");
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn test_broadcast_reaches_members_only() {
        let hub = RelayHub::new();
        let mut a = peer(&hub, "a");
        let mut b = peer(&hub, "b");
        let mut c = peer(&hub, "c");
        hub.join("a", "zone-1");
        hub.join("b", "zone-1");
        hub.join("c", "zone-2");

        assert_eq!(hub.broadcast("zone-1", corridor(), None), 2);
        assert_eq!(a.try_recv().unwrap().room, "zone-1");
        assert!(b.try_recv().is_ok());
        assert!(c.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_can_skip_sender() {
        let hub = RelayHub::new();
        let mut a = peer(&hub, "a");
        let mut b = peer(&hub, "b");
        hub.join("a", "safe-1");
        hub.join("b", "safe-1");

        assert_eq!(hub.broadcast("safe-1", corridor(), Some("a")), 1);
        assert!(a.try_recv().is_err());
        assert!(b.try_recv().is_ok());
    }

    #[test]
    fn test_detach_releases_all_rooms() {
        let hub = RelayHub::new();
        let _a = peer(&hub, "a");
        hub.join("a", "r1");
        hub.join("a", "r2");

        let mut left = hub.detach("a");
        left.sort();
        assert_eq!(left, vec!["r1".to_string(), "r2".to_string()]);
        assert_eq!(hub.room_count(), 0);
        assert_eq!(hub.peer_count(), 0);
    }

    #[test]
    fn test_closed_sink_is_detached() {
        let hub = RelayHub::new();
        let rx = peer(&hub, "a");
        hub.join("a", "r1");
        drop(rx);

        assert_eq!(hub.broadcast("r1", corridor(), None), 0);
        assert!(!hub.is_attached("a"));
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn test_detach_forgets_session() {
        let hub = RelayHub::new();
        let _a = peer(&hub, "a");
        hub.set_session("a", "s1");
        hub.set_session("a", "s2");
        assert_eq!(hub.session("a").as_deref(), Some("s2"));

        hub.detach("a");
        assert_eq!(hub.session("a"), None);
    }

    #[test]
    fn test_send_to_single_peer() {
        let hub = RelayHub::new();
        let mut a = peer(&hub, "a");
        assert!(hub.send_to("a", "zone-1", corridor()));
        assert!(!hub.send_to("ghost", "zone-1", corridor()));
        assert_eq!(a.try_recv().unwrap().name(), corridor_contracts::EventName::ActiveCorridorUpdate);
    }
}
