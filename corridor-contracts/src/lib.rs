/*!
# Corridor Contracts - Contrats partagés kernel ↔ guardians

Types échangés sur le bus relay :
- `events` : noms d'événements (bit-exact) et payloads typés, validés à la frontière
- `model` : batterie, snapshot télémétrie, alerte sirène, statut corridor, note pré-arrivée
- `topics` : disposition des topics MQTT (uplink/downlink par peer)
- `geodesy` : haversine, cap initial, point de destination, ETA
*/

pub mod events;
pub mod geodesy;
pub mod model;
pub mod topics;

pub use events::{
    decode_client_event, decode_delivery, ActiveCorridorUpdate, ClientEvent, Delivery, EventName,
    PeerConnect, PeerDisconnect, PreArrivalMirror, ServerEvent, TelemetryUpdate, VirtualSirenAlert,
};
pub use geodesy::{GeoError, LatLng};
pub use model::{
    now_millis, validate_room_id, Battery, CorridorPhase, CorridorStatus, PreArrivalNote,
    SirenAlert, TelemetrySnapshot,
};

/// Erreurs de contrat levées à la frontière transport
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("room identifier must not be empty")]
    EmptyRoom,
    #[error("session nonce must not be empty")]
    EmptySession,
    #[error("invalid peer identifier: {0:?}")]
    InvalidPeerId(String),
    #[error(transparent)]
    Geo(#[from] GeoError),
    #[error("payload decode error: {0}")]
    Decode(#[from] serde_json::Error),
}
