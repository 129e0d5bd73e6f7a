use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RelayConfig {
    pub http: HttpConf,
    pub mqtt: MqttConf,
    pub zones: ZonesConf,
    pub health: HealthConf,
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ZonesConf {
    /// Rejoue le dernier statut corridor d'une zone aux nouveaux membres (off = fire-and-forget)
    pub replay_corridor_on_join: bool,
    pub drill: DrillConf,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct DrillConf {
    pub priority_secs: u64,
    pub clearing_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HealthConf {
    pub publish_interval_secs: u64,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0".into(), port: 4000 }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "corridor-kernel".into(),
            keep_alive_secs: 15,
        }
    }
}

impl Default for DrillConf {
    fn default() -> Self {
        Self { priority_secs: 30, clearing_secs: 15 }
    }
}

impl Default for HealthConf {
    fn default() -> Self {
        Self { publish_interval_secs: 30 }
    }
}

pub fn parse_config(txt: &str) -> Result<RelayConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(RelayConfig::default());
    }
    serde_yaml::from_str(txt)
}

pub async fn load_config() -> RelayConfig {
    let path = std::env::var("CORRIDOR_KERNEL_CONFIG").unwrap_or_else(|_| "relay.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt).unwrap_or_else(|e| {
            warn!(%path, error = %e, "invalid kernel config, using defaults");
            RelayConfig::default()
        })
    } else {
        warn!(%path, "no kernel config file, using defaults");
        RelayConfig::default()
    };

    if let Ok(key) = std::env::var("CORRIDOR_API_KEY") {
        if !key.is_empty() {
            cfg.api_key = Some(key);
        }
    }
    cfg
}
