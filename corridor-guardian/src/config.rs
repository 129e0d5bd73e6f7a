//! Guardian configuration
//!
//! Handles:
//! - Relay endpoint and reconnection tuning
//! - REST collaborator URL and API key
//! - Vehicle identity (room `safe-<vehicleId>`, status label, peer id)
//! - Sampling cadence, simulated route and battery source
//!
//! Stored as TOML in the OS config directory; `API_URL` and `CORRIDOR_API_KEY`
//! override the file.

use corridor_contracts::LatLng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not find config directory")]
    NoConfigDir,
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid guardian config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianConfig {
    pub relay: RelayConf,
    pub api: ApiConf,
    pub vehicle: VehicleConf,
    pub sampling: SamplingConf,
    pub route: RouteConf,
    pub battery: BatteryConf,
    /// Zone joined by `watch` and targeted by `note` when none is given
    pub zone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConf {
    pub endpoint: String,
    pub keep_alive_secs: u64,
    pub reconnect_backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConf {
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConf {
    pub vehicle_id: String,
    pub status_label: Option<String>,
    pub peer_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConf {
    pub tick_ms: u64,
    pub freshness_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConf {
    /// `[lat, lng]` pairs
    pub waypoints: Vec<[f64; 2]>,
    pub speed_mps: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConf {
    pub sysfs_path: Option<PathBuf>,
    pub fixed_percent: Option<u8>,
}

impl Default for RelayConf {
    fn default() -> Self {
        Self { endpoint: "mqtt://localhost:1883".to_string(), keep_alive_secs: 30, reconnect_backoff_secs: 5 }
    }
}

impl Default for ApiConf {
    fn default() -> Self {
        Self { base_url: "http://localhost:4000".to_string(), api_key: None }
    }
}

impl Default for VehicleConf {
    fn default() -> Self {
        Self { vehicle_id: "ambulance-1".to_string(), status_label: None, peer_id: None }
    }
}

impl Default for SamplingConf {
    fn default() -> Self {
        Self { tick_ms: 5000, freshness_ms: 5000 }
    }
}

impl Default for RouteConf {
    fn default() -> Self {
        Self {
            waypoints: vec![[12.9716, 77.5946], [12.9763, 77.6033], [12.9698, 77.6119]],
            speed_mps: 11.0,
        }
    }
}

impl GuardianConfig {
    /// Load config from `CORRIDOR_GUARDIAN_CONFIG` or the OS-specific location
    pub async fn load() -> Result<Self, ConfigError> {
        let config_path = match std::env::var("CORRIDOR_GUARDIAN_CONFIG") {
            Ok(path) => PathBuf::from(path),
            Err(_) => Self::config_file_path()?,
        };

        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .map_err(|source| ConfigError::Read { path: config_path.clone(), source })?;
            Self::parse(&content)?
        } else {
            // First run - defaults
            Self::default()
        };

        config.apply_env_overrides(std::env::var("API_URL").ok(), std::env::var("CORRIDOR_API_KEY").ok());
        config.ensure_peer_id();
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Get OS-specific config file path
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push("corridor-guardian");
        path.push("config.toml");
        Ok(path)
    }

    pub fn apply_env_overrides(&mut self, api_url: Option<String>, api_key: Option<String>) {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            self.api.base_url = url;
        }
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            self.api.api_key = Some(key);
        }
    }

    /// Assigns a random peer id when none is configured
    pub fn ensure_peer_id(&mut self) {
        if self.vehicle.peer_id.as_deref().map_or(true, |p| p.trim().is_empty()) {
            self.vehicle.peer_id = Some(format!("guardian-{}", uuid::Uuid::new_v4().simple()));
        }
    }

    pub fn peer_id(&self) -> String {
        self.vehicle
            .peer_id
            .clone()
            .unwrap_or_else(|| format!("guardian-{}", self.vehicle.vehicle_id))
    }

    pub fn room_id(&self) -> String {
        format!("safe-{}", self.vehicle.vehicle_id)
    }

    pub fn status_label(&self) -> String {
        self.vehicle
            .status_label
            .clone()
            .unwrap_or_else(|| format!("Vehicle {}", self.vehicle.vehicle_id))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.sampling.tick_ms.max(1))
    }

    pub fn freshness(&self) -> Duration {
        Duration::from_millis(self.sampling.freshness_ms)
    }

    /// Configured waypoints, invalid pairs skipped
    pub fn waypoints(&self) -> Vec<LatLng> {
        self.route
            .waypoints
            .iter()
            .filter_map(|[lat, lng]| match LatLng::new(*lat, *lng) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(error = %e, "skipping route waypoint");
                    None
                }
            })
            .collect()
    }
}
