/**
 * DISPATCH - Routage des événements uplink vers le hub et les zones
 *
 * Chaque uplink décodé (donc déjà validé par les contrats) est appliqué ici,
 * indépendamment du transport qui l'a apporté (MQTT, loopback de test...).
 * Les identifiants vides sont ignorés avec un warning.
 *
 * Un `peer_disconnect` portant une session (last-will) n'est appliqué que si
 * elle correspond à la connexion courante du peer : le will d'une connexion
 * déjà remplacée ne doit pas effacer les rooms de la nouvelle.
 */

use crate::zones::ZoneBroadcastService;
use corridor_contracts::{ClientEvent, ServerEvent};
use tracing::{debug, warn};

pub fn dispatch(zones: &ZoneBroadcastService, peer_id: &str, event: ClientEvent) {
    if let Err(e) = event.validate() {
        warn!(peer = peer_id, event = %event.name(), error = %e, "dropping invalid uplink");
        return;
    }

    match event {
        ClientEvent::JoinRoom(room) => {
            zones.hub().join(peer_id, &room);
        }
        ClientEvent::LeaveRoom(room) => {
            zones.hub().leave(peer_id, &room);
        }
        ClientEvent::JoinSirenZone(zone) => zones.join(peer_id, &zone),
        ClientEvent::TelemetryUpdate(update) => {
            let room = update.room_id.clone();
            let delivered = zones.hub().broadcast(&room, ServerEvent::TelemetryUpdate(update), Some(peer_id));
            debug!(peer = peer_id, %room, delivered, "telemetry relayed");
        }
        ClientEvent::PreArrivalNoteEmit(mirror) => {
            zones.relay_pre_arrival_note(&mirror.zone_id, mirror.note);
        }
        ClientEvent::PeerConnect(hello) => zones.hub().set_session(peer_id, &hello.session),
        ClientEvent::PeerDisconnect(bye) => {
            if let (Some(stale), Some(current)) = (bye.session.as_deref(), zones.hub().session(peer_id)) {
                if stale != current {
                    debug!(peer = peer_id, stale, %current, "ignoring last will of a replaced connection");
                    return;
                }
            }
            let rooms = zones.hub().detach(peer_id);
            debug!(peer = peer_id, rooms = rooms.len(), "peer disconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::RelayHub;
    use corridor_contracts::{Battery, Delivery, PeerConnect, PeerDisconnect, TelemetryUpdate};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn attach(zones: &ZoneBroadcastService, id: &str) -> mpsc::UnboundedReceiver<Delivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        zones.hub().attach(id, Arc::new(tx));
        rx
    }

    fn update(room: &str, lat: f64) -> ClientEvent {
        ClientEvent::TelemetryUpdate(TelemetryUpdate {
            room_id: room.into(),
            lat,
            lng: 77.59,
            battery: Battery::Percent(82),
            status: "Vehicle ambulance-1".into(),
        })
    }

    #[test]
    fn test_telemetry_goes_to_other_members() {
        let zones = ZoneBroadcastService::new(RelayHub::new());
        let mut sender = attach(&zones, "a");
        let mut viewer = attach(&zones, "b");
        dispatch(&zones, "a", ClientEvent::JoinRoom("safe-ambulance-1".into()));
        dispatch(&zones, "b", ClientEvent::JoinRoom("safe-ambulance-1".into()));

        dispatch(&zones, "a", update("safe-ambulance-1", 12.97));

        let d = viewer.try_recv().unwrap();
        assert_eq!(d.room, "safe-ambulance-1");
        assert!(matches!(d.event, ServerEvent::TelemetryUpdate(ref u) if u.lat == 12.97));
        assert!(sender.try_recv().is_err());
    }

    #[test]
    fn test_invalid_telemetry_is_dropped() {
        let zones = ZoneBroadcastService::new(RelayHub::new());
        let mut viewer = attach(&zones, "b");
        dispatch(&zones, "b", ClientEvent::JoinRoom("safe-1".into()));

        dispatch(&zones, "a", update("safe-1", 95.0));
        assert!(viewer.try_recv().is_err());
    }

    #[test]
    fn test_leave_and_disconnect() {
        let zones = ZoneBroadcastService::new(RelayHub::new());
        let _a = attach(&zones, "a");
        dispatch(&zones, "a", ClientEvent::JoinRoom("safe-1".into()));
        dispatch(&zones, "a", ClientEvent::JoinSirenZone("city-core".into()));
        assert_eq!(zones.hub().room_count(), 2);

        dispatch(&zones, "a", ClientEvent::LeaveRoom("safe-1".into()));
        assert_eq!(zones.hub().room_count(), 1);

        dispatch(&zones, "a", ClientEvent::PeerDisconnect(PeerDisconnect::default()));
        assert_eq!(zones.hub().room_count(), 0);
        assert!(!zones.hub().is_attached("a"));
    }

    fn hello(session: &str) -> ClientEvent {
        ClientEvent::PeerConnect(PeerConnect { session: session.into() })
    }

    #[test]
    fn test_stale_last_will_keeps_new_connection_rooms() {
        let zones = ZoneBroadcastService::new(RelayHub::new());
        let _a = attach(&zones, "a");
        dispatch(&zones, "a", hello("s1"));
        dispatch(&zones, "a", ClientEvent::JoinSirenZone("city-core".into()));

        // nouvelle connexion du même peer, rejoin, puis will tardif de l'ancienne
        dispatch(&zones, "a", hello("s2"));
        dispatch(&zones, "a", ClientEvent::JoinSirenZone("city-core".into()));
        dispatch(&zones, "a", ClientEvent::PeerDisconnect(PeerDisconnect::will("s1")));
        assert!(zones.hub().is_member("a", "city-core"));
        assert!(zones.hub().is_attached("a"));

        dispatch(&zones, "a", ClientEvent::PeerDisconnect(PeerDisconnect::will("s2")));
        assert!(!zones.hub().is_attached("a"));
        assert_eq!(zones.hub().room_count(), 0);
    }

    #[test]
    fn test_last_will_without_known_session_detaches() {
        let zones = ZoneBroadcastService::new(RelayHub::new());
        let _a = attach(&zones, "a");
        dispatch(&zones, "a", ClientEvent::JoinRoom("safe-1".into()));

        dispatch(&zones, "a", ClientEvent::PeerDisconnect(PeerDisconnect::will("s9")));
        assert!(!zones.hub().is_attached("a"));
    }

    #[test]
    fn test_empty_room_join_is_ignored() {
        let zones = ZoneBroadcastService::new(RelayHub::new());
        dispatch(&zones, "a", ClientEvent::JoinRoom("".into()));
        assert_eq!(zones.hub().room_count(), 0);
    }
}
