/*!
Capteurs scriptés pour les tests de sampler / session
*/

use corridor_contracts::Battery;
use corridor_guardian::sampler::{BatterySource, Fix, LocationSource, SensorError, WatchId};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Rejoue une liste de fixes / erreurs, puis répète le dernier fix (ou `Unavailable`)
pub struct ScriptedLocation {
    script: Mutex<VecDeque<Result<Fix, SensorError>>>,
    last_fix: Mutex<Option<Fix>>,
    deny_watch: bool,
    next_watch: AtomicU64,
    watches: AtomicUsize,
    cleared: AtomicUsize,
}

impl ScriptedLocation {
    pub fn new(script: impl IntoIterator<Item = Result<Fix, SensorError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            last_fix: Mutex::new(None),
            deny_watch: false,
            next_watch: AtomicU64::new(1),
            watches: AtomicUsize::new(0),
            cleared: AtomicUsize::new(0),
        }
    }

    /// Position fixe à chaque tick
    pub fn at(lat: f64, lng: f64) -> Self {
        Self::new([Ok(Fix { lat, lng, heading_deg: None })])
    }

    /// Permission refusée dès le `watch`
    pub fn denied() -> Self {
        Self { deny_watch: true, ..Self::new([]) }
    }

    pub fn push(&self, item: Result<Fix, SensorError>) {
        self.script.lock().push_back(item);
    }

    pub fn watches(&self) -> usize {
        self.watches.load(Ordering::SeqCst)
    }

    pub fn cleared(&self) -> usize {
        self.cleared.load(Ordering::SeqCst)
    }
}

impl LocationSource for ScriptedLocation {
    fn watch(&self) -> Result<WatchId, SensorError> {
        if self.deny_watch {
            return Err(SensorError::PermissionDenied);
        }
        self.watches.fetch_add(1, Ordering::SeqCst);
        Ok(WatchId(self.next_watch.fetch_add(1, Ordering::SeqCst)))
    }

    fn latest(&self, max_age: Duration) -> Result<Fix, SensorError> {
        match self.script.lock().pop_front() {
            Some(Ok(fix)) => {
                *self.last_fix.lock() = Some(fix);
                Ok(fix)
            }
            Some(Err(e)) => Err(e),
            None => (*self.last_fix.lock()).ok_or(SensorError::Unavailable { max_age }),
        }
    }

    fn clear_watch(&self, _id: WatchId) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }
}

/// Niveaux batterie successifs, le dernier est conservé
pub struct ScriptedBattery {
    levels: Mutex<VecDeque<Battery>>,
    last: Mutex<Battery>,
}

impl ScriptedBattery {
    pub fn new(levels: impl IntoIterator<Item = Battery>) -> Self {
        Self { levels: Mutex::new(levels.into_iter().collect()), last: Mutex::new(Battery::Unknown) }
    }

    pub fn fixed(level: Battery) -> Self {
        Self::new([level])
    }
}

impl BatterySource for ScriptedBattery {
    fn level(&self) -> Battery {
        let mut last = self.last.lock();
        if let Some(next) = self.levels.lock().pop_front() {
            *last = next;
        }
        *last
    }
}
