/**
 * EVENTS - Enveloppes typées échangées sur le relay
 *
 * RÔLE :
 * Remplace les payloads non typés indexés par nom d'événement par des enums
 * taggés. Les noms d'événements sont conservés bit-exact pour l'interop.
 *
 * FORMAT :
 * - uplink  (peer → kernel) : {"event": "<name>", "data": <payload>}
 * - downlink (kernel → peer) : {"room": "<room>", "event": "<name>", "data": <payload>}
 *
 * Toute donnée reçue passe par `decode_client_event` / `decode_delivery`
 * avant d'atteindre la logique métier.
 */

use crate::geodesy::{GeoError, LatLng};
use crate::model::{validate_room_id, Battery, CorridorPhase, PreArrivalNote, TelemetrySnapshot};
use crate::ContractError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;

/// Noms d'événements au niveau du fil
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    JoinRoom,
    LeaveRoom,
    TelemetryUpdate,
    JoinSirenZone,
    VirtualSirenAlert,
    ActiveCorridorUpdate,
    PreArrivalNoteEmit,
    PeerConnect,
    PeerDisconnect,
}

impl EventName {
    pub const ALL: [EventName; 9] = [
        EventName::JoinRoom,
        EventName::LeaveRoom,
        EventName::TelemetryUpdate,
        EventName::JoinSirenZone,
        EventName::VirtualSirenAlert,
        EventName::ActiveCorridorUpdate,
        EventName::PreArrivalNoteEmit,
        EventName::PeerConnect,
        EventName::PeerDisconnect,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            EventName::JoinRoom => "join_room",
            EventName::LeaveRoom => "leave_room",
            EventName::TelemetryUpdate => "telemetry_update",
            EventName::JoinSirenZone => "join_siren_zone",
            EventName::VirtualSirenAlert => "virtual_siren_alert",
            EventName::ActiveCorridorUpdate => "active_corridor_update",
            EventName::PreArrivalNoteEmit => "pre_arrival_note_emit",
            EventName::PeerConnect => "peer_connect",
            EventName::PeerDisconnect => "peer_disconnect",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.as_str() == name)
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload `telemetry_update` : {roomId, lat, lng, battery, status}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryUpdate {
    pub room_id: String,
    pub lat: f64,
    pub lng: f64,
    pub battery: Battery,
    pub status: String,
}

impl TelemetryUpdate {
    pub fn position(&self) -> Result<LatLng, GeoError> {
        LatLng::new(self.lat, self.lng)
    }
}

impl From<&TelemetrySnapshot> for TelemetryUpdate {
    fn from(s: &TelemetrySnapshot) -> Self {
        Self {
            room_id: s.room_id.clone(),
            lat: s.position.lat,
            lng: s.position.lng,
            battery: s.battery,
            status: s.status_label.clone(),
        }
    }
}

/// Payload `virtual_siren_alert` : {etaMinutes, startedAt}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualSirenAlert {
    pub eta_minutes: NonZeroU32,
    pub started_at: i64,
}

/// Payload `active_corridor_update` : {active, phase}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveCorridorUpdate {
    pub active: bool,
    pub phase: CorridorPhase,
}

/// Miroir temps réel d'une note pré-arrivée vers une zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreArrivalMirror {
    pub zone_id: String,
    #[serde(flatten)]
    pub note: PreArrivalNote,
}

/// Payload `peer_connect` : nonce de la connexion transport courante du peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerConnect {
    pub session: String,
}

/// Payload `peer_disconnect` : `session` renseigné dans les last-wills, absent
/// pour une déconnexion volontaire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerDisconnect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl PeerDisconnect {
    pub fn will(session: impl Into<String>) -> Self {
        Self { session: Some(session.into()) }
    }
}

/// Événements émis par un peer vers le kernel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "join_room")]
    JoinRoom(String),
    #[serde(rename = "leave_room")]
    LeaveRoom(String),
    #[serde(rename = "telemetry_update")]
    TelemetryUpdate(TelemetryUpdate),
    #[serde(rename = "join_siren_zone")]
    JoinSirenZone(String),
    #[serde(rename = "pre_arrival_note_emit")]
    PreArrivalNoteEmit(PreArrivalMirror),
    #[serde(rename = "peer_connect")]
    PeerConnect(PeerConnect),
    #[serde(rename = "peer_disconnect")]
    PeerDisconnect(PeerDisconnect),
}

impl ClientEvent {
    pub fn name(&self) -> EventName {
        match self {
            ClientEvent::JoinRoom(_) => EventName::JoinRoom,
            ClientEvent::LeaveRoom(_) => EventName::LeaveRoom,
            ClientEvent::TelemetryUpdate(_) => EventName::TelemetryUpdate,
            ClientEvent::JoinSirenZone(_) => EventName::JoinSirenZone,
            ClientEvent::PreArrivalNoteEmit(_) => EventName::PreArrivalNoteEmit,
            ClientEvent::PeerConnect(_) => EventName::PeerConnect,
            ClientEvent::PeerDisconnect(_) => EventName::PeerDisconnect,
        }
    }

    /// Vérifie les invariants du payload (room non vide, coordonnées WGS84)
    pub fn validate(&self) -> Result<(), ContractError> {
        match self {
            ClientEvent::JoinRoom(room) | ClientEvent::LeaveRoom(room) | ClientEvent::JoinSirenZone(room) => {
                validate_room_id(room)
            }
            ClientEvent::TelemetryUpdate(update) => {
                validate_room_id(&update.room_id)?;
                update.position()?;
                Ok(())
            }
            ClientEvent::PreArrivalNoteEmit(mirror) => validate_room_id(&mirror.zone_id),
            ClientEvent::PeerConnect(hello) => validate_session(&hello.session),
            ClientEvent::PeerDisconnect(bye) => bye.session.as_deref().map_or(Ok(()), validate_session),
        }
    }
}

fn validate_session(session: &str) -> Result<(), ContractError> {
    if session.trim().is_empty() {
        Err(ContractError::EmptySession)
    } else {
        Ok(())
    }
}

/// Événements poussés par le kernel vers les membres d'une room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "telemetry_update")]
    TelemetryUpdate(TelemetryUpdate),
    #[serde(rename = "virtual_siren_alert")]
    VirtualSirenAlert(VirtualSirenAlert),
    #[serde(rename = "active_corridor_update")]
    ActiveCorridorUpdate(ActiveCorridorUpdate),
    #[serde(rename = "pre_arrival_note_emit")]
    PreArrivalNoteEmit(PreArrivalNote),
}

impl ServerEvent {
    pub fn name(&self) -> EventName {
        match self {
            ServerEvent::TelemetryUpdate(_) => EventName::TelemetryUpdate,
            ServerEvent::VirtualSirenAlert(_) => EventName::VirtualSirenAlert,
            ServerEvent::ActiveCorridorUpdate(_) => EventName::ActiveCorridorUpdate,
            ServerEvent::PreArrivalNoteEmit(_) => EventName::PreArrivalNoteEmit,
        }
    }
}

/// Livraison d'un événement dans le contexte de sa room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub room: String,
    #[serde(flatten)]
    pub event: ServerEvent,
}

impl Delivery {
    pub fn new(room: impl Into<String>, event: ServerEvent) -> Self {
        Self { room: room.into(), event }
    }

    pub fn name(&self) -> EventName {
        self.event.name()
    }
}

/// Décode et valide un uplink brut
pub fn decode_client_event(payload: &[u8]) -> Result<ClientEvent, ContractError> {
    let event: ClientEvent = serde_json::from_slice(payload)?;
    event.validate()?;
    Ok(event)
}

/// Décode et valide un downlink brut
pub fn decode_delivery(payload: &[u8]) -> Result<Delivery, ContractError> {
    let delivery: Delivery = serde_json::from_slice(payload)?;
    validate_room_id(&delivery.room)?;
    if let ServerEvent::TelemetryUpdate(update) = &delivery.event {
        update.position()?;
    }
    Ok(delivery)
}
