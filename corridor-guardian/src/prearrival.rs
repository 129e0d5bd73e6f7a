//! Pre-arrival notes: persisted through the REST collaborator first, then
//! mirrored onto the zone relay for the hospital display. A failed mirror is
//! reported in the receipt, the persisted write still stands.

use crate::channel::RelayChannel;
use corridor_contracts::{validate_room_id, ClientEvent, ContractError, PreArrivalMirror, PreArrivalNote};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum NoteError {
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("pre-arrival request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("pre-arrival rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredNote {
    id: String,
    received_at: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreArrivalReceipt {
    pub id: String,
    pub received_at: String,
    pub zone_id: String,
    pub mirrored: bool,
}

pub struct PreArrivalSender {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    channel: RelayChannel,
}

impl PreArrivalSender {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, channel: RelayChannel) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into(), api_key, channel }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/ambulances/pre-arrival", self.base_url.trim_end_matches('/'))
    }

    pub async fn send(&self, zone_id: &str, note: PreArrivalNote) -> Result<PreArrivalReceipt, NoteError> {
        validate_room_id(zone_id)?;

        let mut request = self.http.post(self.endpoint()).json(&note);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NoteError::Rejected { status: status.as_u16(), body });
        }
        let stored: StoredNote = response.json().await?;
        info!(id = %stored.id, hospital = %note.hospital_id, "pre-arrival note persisted");

        let mirror = ClientEvent::PreArrivalNoteEmit(PreArrivalMirror { zone_id: zone_id.to_string(), note });
        let mirrored = match self.channel.emit(mirror) {
            Ok(()) => true,
            Err(e) => {
                warn!(zone = zone_id, id = %stored.id, error = %e, "pre-arrival mirror not sent");
                false
            }
        };

        Ok(PreArrivalReceipt { id: stored.id, received_at: stored.received_at, zone_id: zone_id.to_string(), mirrored })
    }
}
