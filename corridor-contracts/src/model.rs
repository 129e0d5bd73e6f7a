use crate::geodesy::LatLng;
use crate::ContractError;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::num::NonZeroU32;
use time::OffsetDateTime;

/// Horodatage epoch en millisecondes (format `startedAt` / `sampledAt`)
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Rejette un identifiant de room/zone vide (seule validation côté appelant)
pub fn validate_room_id(room: &str) -> Result<(), ContractError> {
    if room.trim().is_empty() {
        Err(ContractError::EmptyRoom)
    } else {
        Ok(())
    }
}

/// Niveau batterie : `"82%"` ou `"unknown"` sur le fil
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Battery {
    Percent(u8),
    Unknown,
}

impl Battery {
    /// Arrondit et borne à 0..=100 ; NaN → Unknown
    pub fn from_level(percent: f64) -> Self {
        if percent.is_finite() {
            Battery::Percent(percent.round().clamp(0.0, 100.0) as u8)
        } else {
            Battery::Unknown
        }
    }
}

impl fmt::Display for Battery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Battery::Percent(p) => write!(f, "{p}%"),
            Battery::Unknown => f.write_str("unknown"),
        }
    }
}

impl Serialize for Battery {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Battery {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BatteryVisitor;

        impl<'de> Visitor<'de> for BatteryVisitor {
            type Value = Battery;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a battery level like \"82%\", \"unknown\" or a number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Battery, E> {
                let v = v.trim();
                if v.eq_ignore_ascii_case("unknown") {
                    return Ok(Battery::Unknown);
                }
                let digits = v.strip_suffix('%').unwrap_or(v).trim();
                digits
                    .parse::<f64>()
                    .ok()
                    .filter(|p| (0.0..=100.0).contains(p))
                    .map(Battery::from_level)
                    .ok_or_else(|| E::invalid_value(de::Unexpected::Str(v), &self))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Battery, E> {
                if v <= 100 {
                    Ok(Battery::Percent(v as u8))
                } else {
                    Err(E::invalid_value(de::Unexpected::Unsigned(v), &self))
                }
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Battery, E> {
                if (0..=100).contains(&v) {
                    Ok(Battery::Percent(v as u8))
                } else {
                    Err(E::invalid_value(de::Unexpected::Signed(v), &self))
                }
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Battery, E> {
                if (0.0..=100.0).contains(&v) {
                    Ok(Battery::from_level(v))
                } else {
                    Err(E::invalid_value(de::Unexpected::Float(v), &self))
                }
            }
        }

        deserializer.deserialize_any(BatteryVisitor)
    }
}

/// Relevé ponctuel position + batterie + statut d'un véhicule
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    pub room_id: String,
    pub position: LatLng,
    pub battery: Battery,
    pub status_label: String,
    pub sampled_at: i64,
}

impl TelemetrySnapshot {
    /// `None` si la paire lat/lng n'est pas WGS84 : le snapshot n'est jamais publié avec des sentinelles
    pub fn new(
        room_id: impl Into<String>,
        position: LatLng,
        battery: Battery,
        status_label: impl Into<String>,
        sampled_at: i64,
    ) -> Option<Self> {
        if !position.is_valid() {
            return None;
        }
        Some(Self {
            room_id: room_id.into(),
            position,
            battery,
            status_label: status_label.into(),
            sampled_at,
        })
    }
}

/// Alerte sirène virtuelle (éphémère, jamais stockée par le relay)
#[derive(Debug, Clone, PartialEq)]
pub struct SirenAlert {
    pub zone_id: String,
    pub eta_minutes: NonZeroU32,
    pub started_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CorridorPhase {
    NormalFlow,
    PriorityActive,
    Clearing,
}

impl CorridorPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorridorPhase::NormalFlow => "normal-flow",
            CorridorPhase::PriorityActive => "priority-active",
            CorridorPhase::Clearing => "clearing",
        }
    }
}

/// État du corridor prioritaire d'une zone
#[derive(Debug, Clone, PartialEq)]
pub struct CorridorStatus {
    pub zone_id: String,
    pub active: bool,
    pub phase: CorridorPhase,
}

/// Note patient envoyée à l'hôpital avant l'arrivée de l'ambulance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreArrivalNote {
    pub ambulance_id: String,
    pub hospital_id: String,
    pub patient_name: String,
    #[serde(default)]
    pub blood_type: String,
    #[serde(default)]
    pub allergies: String,
    #[serde(default)]
    pub symptoms: String,
    pub eta_minutes: u32,
}
