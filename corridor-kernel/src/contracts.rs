use corridor_contracts::{decode_client_event, decode_delivery, EventName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Uplink,
    Downlink,
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub event: String,
    pub direction: Direction,
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ContractRegistry {
    contracts: BTreeMap<String, Contract>, // "telemetry_update" -> Contract
}

impl ContractRegistry {
    /// Catalogue de tous les événements du relay
    pub fn builtin() -> Self {
        let contracts = EventName::ALL
            .iter()
            .map(|name| {
                let (direction, schema) = describe(*name);
                let contract = Contract { event: name.as_str().to_string(), direction, schema };
                (contract.event.clone(), contract)
            })
            .collect();
        Self { contracts }
    }

    /// Valide qu'un payload respecte le contrat de l'événement
    pub fn validate_message(&self, event: &str, payload: &str) -> Result<(), String> {
        let contract = self
            .contracts
            .get(event)
            .ok_or_else(|| format!("Contract '{}' not found", event))?;

        let data: serde_json::Value =
            serde_json::from_str(payload).map_err(|e| format!("Invalid JSON: {}", e))?;

        let check_uplink = || {
            let envelope = serde_json::json!({ "event": event, "data": data });
            decode_client_event(envelope.to_string().as_bytes()).map(|_| ()).map_err(|e| e.to_string())
        };
        let check_downlink = || {
            let envelope = serde_json::json!({ "room": "contract-check", "event": event, "data": data });
            decode_delivery(envelope.to_string().as_bytes()).map(|_| ()).map_err(|e| e.to_string())
        };

        match contract.direction {
            Direction::Uplink => check_uplink(),
            Direction::Downlink => check_downlink(),
            Direction::Both => check_uplink().or_else(|_| check_downlink()),
        }
    }

    pub fn list_contracts(&self) -> Vec<String> {
        self.contracts.keys().cloned().collect()
    }

    pub fn get_contract(&self, event: &str) -> Option<&Contract> {
        self.contracts.get(event)
    }
}

fn describe(name: EventName) -> (Direction, serde_json::Value) {
    use serde_json::json;
    let room = json!({"type": "string", "minLength": 1});
    let note = json!({
        "ambulanceId": "string", "hospitalId": "string", "patientName": "string",
        "bloodType": "string", "allergies": "string", "symptoms": "string", "etaMinutes": "integer"
    });
    match name {
        EventName::JoinRoom | EventName::LeaveRoom | EventName::JoinSirenZone => (Direction::Uplink, room),
        EventName::PeerConnect => (Direction::Uplink, json!({"session": "string, non-empty"})),
        EventName::PeerDisconnect => (Direction::Uplink, json!({"session": "string, optional (last will)"})),
        EventName::TelemetryUpdate => (
            Direction::Both,
            json!({
                "roomId": "string", "lat": "number [-90, 90]", "lng": "number [-180, 180]",
                "battery": "\"<0-100>%\" | \"unknown\"", "status": "string"
            }),
        ),
        EventName::VirtualSirenAlert => (
            Direction::Downlink,
            json!({"etaMinutes": "integer > 0", "startedAt": "epoch millis"}),
        ),
        EventName::ActiveCorridorUpdate => (
            Direction::Downlink,
            json!({"active": "boolean", "phase": ["normal-flow", "priority-active", "clearing"]}),
        ),
        EventName::PreArrivalNoteEmit => (Direction::Both, note),
    }
}
