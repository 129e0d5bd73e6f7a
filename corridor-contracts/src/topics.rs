//! MQTT topic layout. Topics are per-peer pipes; rooms live in the kernel hub.

use crate::ContractError;

pub const UPLINK_FILTER: &str = "corridor/peers/+/up";
pub const HEALTH_TOPIC: &str = "corridor/relay/health@v1";

const PEERS_PREFIX: &str = "corridor/peers/";

pub fn uplink_topic(peer_id: &str) -> String {
    format!("{PEERS_PREFIX}{peer_id}/up")
}

pub fn downlink_topic(peer_id: &str) -> String {
    format!("{PEERS_PREFIX}{peer_id}/down")
}

/// Extrait le peer id d'un topic uplink
/// Ex: "corridor/peers/guardian-42/up" -> "guardian-42"
pub fn peer_from_uplink(topic: &str) -> Option<&str> {
    let peer = topic.strip_prefix(PEERS_PREFIX)?.strip_suffix("/up")?;
    (!peer.is_empty() && !peer.contains('/')).then_some(peer)
}

/// Un peer id finit dans un nom de topic : pas de séparateur ni de wildcard
pub fn validate_peer_id(peer_id: &str) -> Result<(), ContractError> {
    let ok = !peer_id.is_empty()
        && !peer_id.chars().any(|c| matches!(c, '/' | '+' | '#') || c.is_whitespace());
    if ok {
        Ok(())
    } else {
        Err(ContractError::InvalidPeerId(peer_id.to_string()))
    }
}
