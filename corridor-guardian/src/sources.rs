//! Shipped sensor sources: a simulated route for location, sysfs or fixed battery.

use crate::sampler::{BatterySource, Fix, LocationSource, SensorError, WatchId};
use corridor_contracts::geodesy::{destination, haversine_m, initial_bearing_deg};
use corridor_contracts::{Battery, LatLng};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Vehicle moving along waypoints at constant speed, stopping at the last one.
/// Heading is the bearing of the current leg.
pub struct SimulatedRoute {
    waypoints: Vec<LatLng>,
    speed_mps: f64,
    started: Mutex<Option<Instant>>,
    next_watch: AtomicU64,
}

impl SimulatedRoute {
    pub fn new(waypoints: Vec<LatLng>, speed_mps: f64) -> Self {
        Self { waypoints, speed_mps: speed_mps.max(0.0), started: Mutex::new(None), next_watch: AtomicU64::new(1) }
    }

    /// Total route length in metres
    pub fn length_m(&self) -> f64 {
        self.waypoints.windows(2).map(|leg| haversine_m(leg[0], leg[1])).sum()
    }

    /// Position after travelling `travelled_m` metres from the first waypoint
    pub fn position_at(&self, travelled_m: f64) -> Option<Fix> {
        let first = *self.waypoints.first()?;
        let mut remaining = travelled_m.max(0.0);
        let mut heading = None;

        for leg in self.waypoints.windows(2) {
            let (from, to) = (leg[0], leg[1]);
            let len = haversine_m(from, to);
            let bearing = initial_bearing_deg(from, to);
            heading = Some(bearing);
            if remaining <= len {
                let p = destination(from, bearing, remaining);
                return Some(Fix { lat: p.lat, lng: p.lng, heading_deg: heading });
            }
            remaining -= len;
        }

        let last = self.waypoints.last().copied().unwrap_or(first);
        Some(Fix { lat: last.lat, lng: last.lng, heading_deg: heading })
    }
}

impl LocationSource for SimulatedRoute {
    fn watch(&self) -> Result<WatchId, SensorError> {
        self.started.lock().get_or_insert_with(Instant::now);
        Ok(WatchId(self.next_watch.fetch_add(1, Ordering::Relaxed)))
    }

    fn latest(&self, max_age: Duration) -> Result<Fix, SensorError> {
        let Some(started) = *self.started.lock() else {
            return Err(SensorError::Unavailable { max_age });
        };
        let travelled = started.elapsed().as_secs_f64() * self.speed_mps;
        self.position_at(travelled).ok_or(SensorError::Unavailable { max_age })
    }

    fn clear_watch(&self, id: WatchId) {
        debug!(watch = id.0, "simulated route watch cleared");
    }
}

/// Linux power-supply capacity file (`/sys/class/power_supply/<BAT>/capacity`)
pub struct SysfsBattery {
    path: PathBuf,
}

impl SysfsBattery {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// First battery exposing a `capacity` file, if any
    pub fn discover() -> Option<Self> {
        Self::discover_in(Path::new("/sys/class/power_supply"))
    }

    pub fn discover_in(root: &Path) -> Option<Self> {
        let mut candidates: Vec<PathBuf> = std::fs::read_dir(root)
            .ok()?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path().join("capacity"))
            .filter(|p| p.is_file())
            .collect();
        candidates.sort();
        candidates.into_iter().next().map(Self::new)
    }
}

impl BatterySource for SysfsBattery {
    fn level(&self) -> Battery {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|txt| txt.trim().parse::<f64>().ok())
            .map(Battery::from_level)
            .unwrap_or(Battery::Unknown)
    }
}

pub struct FixedBattery(pub Battery);

impl BatterySource for FixedBattery {
    fn level(&self) -> Battery {
        self.0
    }
}
