//! Registry of known streaming peripherals and the last-used pointer.

use crate::sensor::Sensor;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Remembers which device was used last, so it can be reconnected without
/// asking. Durable storage lives outside this crate.
pub trait PreferenceStore: Send + Sync {
    fn last_known_source_name(&self) -> Option<String>;
    fn set_last_known_source_name(&self, name: &str);
}

/// Process-local preference store for tests and the command line.
#[derive(Default)]
pub struct MemoryPreferences {
    name: Mutex<Option<String>>,
}

impl PreferenceStore for MemoryPreferences {
    fn last_known_source_name(&self) -> Option<String> {
        self.name.lock().clone()
    }

    fn set_last_known_source_name(&self, name: &str) {
        *self.name.lock() = Some(name.to_string());
    }
}

pub type SensorId = u64;

/// Insertion-ordered snapshot of the registered sensors. Ids are assigned
/// monotonically, so iteration order equals insertion order.
pub type SensorSet = BTreeMap<SensorId, Arc<dyn Sensor>>;

struct Inner {
    next_id: SensorId,
    sensors: SensorSet,
    last_selected: Option<SensorId>,
}

/// Owns the sensor map and republishes a full snapshot on every change.
/// Callers never get a handle to the internal map, only clones of it.
pub struct SensorRegistry {
    inner: Mutex<Inner>,
    snapshot: watch::Sender<SensorSet>,
    prefs: Arc<dyn PreferenceStore>,
}

impl SensorRegistry {
    pub fn new(prefs: Arc<dyn PreferenceStore>) -> Self {
        let (snapshot, _) = watch::channel(SensorSet::new());
        Self {
            inner: Mutex::new(Inner {
                next_id: 0,
                sensors: SensorSet::new(),
                last_selected: None,
            }),
            snapshot,
            prefs,
        }
    }

    /// Store a sensor under a fresh id and republish. A sensor whose name
    /// matches the last-known device is connected right away.
    pub fn add(&self, sensor: Arc<dyn Sensor>) -> SensorId {
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.sensors.insert(id, sensor.clone());
            self.republish(&inner);
            id
        };
        if self.prefs.last_known_source_name().as_deref() == Some(sensor.name()) {
            sensor.connect();
        }
        id
    }

    pub fn remove(&self, id: SensorId) {
        let mut inner = self.inner.lock();
        if inner.sensors.remove(&id).is_some() {
            self.republish(&inner);
        }
    }

    /// Drop every sensor the predicate selects, then republish once.
    pub fn remove_if(&self, predicate: impl Fn(&dyn Sensor) -> bool) {
        let mut inner = self.inner.lock();
        let before = inner.sensors.len();
        inner.sensors.retain(|_, sensor| !predicate(sensor.as_ref()));
        if inner.sensors.len() != before {
            self.republish(&inner);
        }
    }

    pub fn has_sensors(&self) -> bool {
        !self.inner.lock().sensors.is_empty()
    }

    pub fn sensors(&self) -> Vec<Arc<dyn Sensor>> {
        self.inner.lock().sensors.values().cloned().collect()
    }

    /// First sensor by insertion order, regardless of connection state.
    /// Callers wanting the device actually in use must also check state.
    pub fn active_sensor(&self) -> Option<Arc<dyn Sensor>> {
        self.inner.lock().sensors.values().next().cloned()
    }

    pub fn set_last_selected(&self, id: Option<SensorId>) {
        self.inner.lock().last_selected = id;
    }

    /// The last explicitly selected sensor, falling back to the first entry
    /// when the pointer is unset or no longer resolves.
    pub fn last_selected(&self) -> Option<Arc<dyn Sensor>> {
        let inner = self.inner.lock();
        inner
            .last_selected
            .and_then(|id| inner.sensors.get(&id).cloned())
            .or_else(|| inner.sensors.values().next().cloned())
    }

    /// Snapshot-on-change stream of the sensor set.
    pub fn watch(&self) -> watch::Receiver<SensorSet> {
        self.snapshot.subscribe()
    }

    fn republish(&self, inner: &Inner) {
        self.snapshot.send_replace(inner.sensors.clone());
    }
}
