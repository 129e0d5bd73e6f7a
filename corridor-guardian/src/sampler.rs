//! Periodic, cancellable position + battery sampling.
//!
//! A [`GeoSampler`] reads the latest device fix (no older than the freshness
//! bound) and the current battery level on every tick. Sensor failures go to
//! the error callback and the stream keeps ticking. The [`SamplerCancel`]
//! token stops the ticks and releases the location watch exactly once.

use corridor_contracts::{now_millis, Battery};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

pub const DEFAULT_FRESHNESS: Duration = Duration::from_millis(5000);

/// Raw device fix; coordinates are not validated here
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub lat: f64,
    pub lng: f64,
    pub heading_deg: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoSample {
    pub lat: f64,
    pub lng: f64,
    pub heading_deg: Option<f64>,
    pub battery: Battery,
    pub sampled_at: i64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SensorError {
    #[error("no position fix newer than {max_age:?}")]
    Unavailable { max_age: Duration },
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location source error: {0}")]
    Source(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

pub trait LocationSource: Send + Sync {
    /// Starts device tracking; denial is reported later through the ticks
    fn watch(&self) -> Result<WatchId, SensorError>;
    fn latest(&self, max_age: Duration) -> Result<Fix, SensorError>;
    fn clear_watch(&self, id: WatchId);
}

pub trait BatterySource: Send + Sync {
    /// Best-effort, `Battery::Unknown` when the platform has no reading
    fn level(&self) -> Battery;
}

#[derive(Clone)]
pub struct GeoSampler {
    location: Arc<dyn LocationSource>,
    battery: Arc<dyn BatterySource>,
    freshness: Duration,
}

impl GeoSampler {
    pub fn new(location: Arc<dyn LocationSource>, battery: Arc<dyn BatterySource>) -> Self {
        Self { location, battery, freshness: DEFAULT_FRESHNESS }
    }

    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    /// Samples immediately, then every `interval`. Must be called inside a tokio runtime.
    pub fn start<S, E>(&self, interval: Duration, mut on_sample: S, mut on_error: E) -> SamplerCancel
    where
        S: FnMut(GeoSample) + Send + 'static,
        E: FnMut(SensorError) + Send + 'static,
    {
        let watch = self.location.watch();
        let active = Arc::new(AtomicBool::new(true));

        let location = self.location.clone();
        let battery = self.battery.clone();
        let freshness = self.freshness;
        let ticking = active.clone();
        let watch_state = watch.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !ticking.load(Ordering::Acquire) {
                    break;
                }
                if let Err(e) = &watch_state {
                    on_error(e.clone());
                    continue;
                }
                match location.latest(freshness) {
                    Ok(fix) => on_sample(GeoSample {
                        lat: fix.lat,
                        lng: fix.lng,
                        heading_deg: fix.heading_deg,
                        battery: battery.level(),
                        sampled_at: now_millis(),
                    }),
                    Err(e) => on_error(e),
                }
            }
        });

        let cleanup: Option<Box<dyn FnOnce() + Send>> = match watch {
            Ok(id) => {
                let location = self.location.clone();
                Some(Box::new(move || location.clear_watch(id)))
            }
            Err(_) => None,
        };

        SamplerCancel { active, task: Some(task), cleanup }
    }
}

/// Cancel token returned by [`GeoSampler::start`]; dropping it cancels.
pub struct SamplerCancel {
    active: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl SamplerCancel {
    pub fn cancel(&mut self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
        debug!("sampler cancelled");
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for SamplerCancel {
    fn drop(&mut self) {
        self.cancel();
    }
}
