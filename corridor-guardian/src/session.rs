//! Per-trip telemetry session.
//!
//! Binds one [`GeoSampler`] to one relay room and publishes a
//! `telemetry_update` per valid sample until stopped. `Idle → Active → Stopped`;
//! `Stopped` is terminal.

use crate::channel::{RelayChannel, RelayError};
use crate::sampler::{GeoSample, GeoSampler, SamplerCancel, SensorError};
use corridor_contracts::{validate_room_id, ClientEvent, LatLng, TelemetrySnapshot, TelemetryUpdate};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_TICK: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub room_id: String,
    pub status_label: String,
    pub tick: Duration,
}

impl SessionConfig {
    pub fn new(room_id: impl Into<String>, status_label: impl Into<String>) -> Self {
        Self { room_id: room_id.into(), status_label: status_label.into(), tick: DEFAULT_TICK }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("room identifier must not be empty")]
    EmptyRoom,
    #[error("cannot start a session in state {0:?}")]
    InvalidTransition(SessionState),
    #[error(transparent)]
    Relay(#[from] RelayError),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    pub published: u64,
    /// samples with an invalid WGS84 pair
    pub dropped: u64,
    /// publish attempts the relay refused (offline...)
    pub failed: u64,
    pub last_sensor_error: Option<SensorError>,
}

pub struct TelemetrySession {
    channel: RelayChannel,
    sampler: GeoSampler,
    state: SessionState,
    room_id: Option<String>,
    cancel: Option<SamplerCancel>,
    active: Arc<AtomicBool>,
    stats: Arc<Mutex<SessionStats>>,
}

impl TelemetrySession {
    pub fn new(channel: RelayChannel, sampler: GeoSampler) -> Self {
        Self {
            channel,
            sampler,
            state: SessionState::Idle,
            room_id: None,
            cancel: None,
            active: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(Mutex::new(SessionStats::default())),
        }
    }

    pub fn start(&mut self, config: SessionConfig) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::InvalidTransition(self.state));
        }
        validate_room_id(&config.room_id).map_err(|_| SessionError::EmptyRoom)?;

        self.channel.join(&config.room_id)?;
        self.active.store(true, Ordering::Release);

        let SessionConfig { room_id, status_label, tick } = config;
        let on_sample = {
            let channel = self.channel.clone();
            let active = self.active.clone();
            let stats = self.stats.clone();
            let room = room_id.clone();
            move |sample: GeoSample| publish_sample(&channel, &active, &stats, &room, &status_label, sample)
        };
        let on_error = {
            let stats = self.stats.clone();
            let room = room_id.clone();
            move |err: SensorError| {
                let mut stats = stats.lock();
                // warn once per distinct error
                if stats.last_sensor_error.as_ref() != Some(&err) {
                    warn!(%room, error = %err, "location unavailable");
                } else {
                    debug!(%room, error = %err, "location still unavailable");
                }
                stats.last_sensor_error = Some(err);
            }
        };

        self.cancel = Some(self.sampler.start(tick, on_sample, on_error));
        info!(room = %room_id, tick_ms = tick.as_millis() as u64, "telemetry session started");
        self.room_id = Some(room_id);
        self.state = SessionState::Active;
        Ok(())
    }

    /// Idempotent; keeps the shared relay connection open
    pub fn stop(&mut self) {
        if self.state != SessionState::Active {
            return;
        }
        self.active.store(false, Ordering::Release);
        if let Some(mut cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(room) = &self.room_id {
            if let Err(e) = self.channel.leave(room) {
                warn!(%room, error = %e, "leave failed");
            }
            info!(%room, "telemetry session stopped");
        }
        self.state = SessionState::Stopped;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.lock().clone()
    }
}

impl Drop for TelemetrySession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn publish_sample(
    channel: &RelayChannel,
    active: &AtomicBool,
    stats: &Mutex<SessionStats>,
    room: &str,
    status_label: &str,
    sample: GeoSample,
) {
    // a tick may already be queued when stop() runs
    if !active.load(Ordering::Acquire) {
        return;
    }
    let position = LatLng { lat: sample.lat, lng: sample.lng };
    let Some(snapshot) = TelemetrySnapshot::new(room, position, sample.battery, status_label, sample.sampled_at)
    else {
        warn!(%room, lat = sample.lat, lng = sample.lng, "dropping sample with invalid coordinates");
        stats.lock().dropped += 1;
        return;
    };

    match channel.emit(ClientEvent::TelemetryUpdate(TelemetryUpdate::from(&snapshot))) {
        Ok(()) => {
            let mut stats = stats.lock();
            stats.published += 1;
            stats.last_sensor_error = None;
        }
        Err(e) => {
            debug!(%room, error = %e, "telemetry publish skipped");
            stats.lock().failed += 1;
        }
    }
}
