/**
 * PRE-ARRIVAL STORE - Collaborateur REST des notes pré-arrivée
 *
 * RÔLE :
 * Enregistre les notes patient envoyées par les ambulances avant leur arrivée
 * à l'hôpital. Écriture unique : pas de mise à jour ni de suppression.
 *
 * FONCTIONNEMENT :
 * - cache mémoire uniquement (pas de stockage persistant multi-utilisateur)
 * - chaque note reçoit un UUID + horodatage RFC3339
 * - lecture filtrable par hôpital / ambulance, plus récentes d'abord
 *
 * Le miroir temps réel vers la zone est fait par le guardian via le relay,
 * pas par ce store.
 */

use corridor_contracts::PreArrivalNote;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StoreError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("timestamp formatting failed")]
    Timestamp,
}

/// Note telle que conservée et restituée par l'API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreArrivalRecord {
    pub id: String,
    pub received_at: String,
    pub note: PreArrivalNote,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreArrivalQuery {
    pub hospital_id: Option<String>,
    pub ambulance_id: Option<String>,
    pub limit: Option<usize>,
}

impl Default for PreArrivalQuery {
    fn default() -> Self {
        Self { hospital_id: None, ambulance_id: None, limit: Some(100) }
    }
}

#[derive(Clone, Default)]
pub struct PreArrivalStore {
    records: Arc<Mutex<Vec<PreArrivalRecord>>>,
}

impl PreArrivalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, note: PreArrivalNote) -> Result<PreArrivalRecord, StoreError> {
        validate_note(&note)?;
        let received_at = OffsetDateTime::now_utc().format(&Rfc3339).map_err(|_| StoreError::Timestamp)?;
        let record = PreArrivalRecord { id: Uuid::new_v4().to_string(), received_at, note };
        self.records.lock().push(record.clone());
        tracing::info!(id = %record.id, hospital = %record.note.hospital_id, "pre-arrival note stored");
        Ok(record)
    }

    pub fn list(&self, query: &PreArrivalQuery) -> Vec<PreArrivalRecord> {
        let records = self.records.lock();
        // insertion = ordre chronologique, on parcourt à l'envers
        records
            .iter()
            .rev()
            .filter(|r| query.hospital_id.as_deref().map_or(true, |h| r.note.hospital_id == h))
            .filter(|r| query.ambulance_id.as_deref().map_or(true, |a| r.note.ambulance_id == a))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn validate_note(note: &PreArrivalNote) -> Result<(), StoreError> {
    if note.ambulance_id.trim().is_empty() {
        return Err(StoreError::MissingField("ambulanceId"));
    }
    if note.hospital_id.trim().is_empty() {
        return Err(StoreError::MissingField("hospitalId"));
    }
    if note.patient_name.trim().is_empty() {
        return Err(StoreError::MissingField("patientName"));
    }
    Ok(())
}
