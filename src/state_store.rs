//! Latest reading per sensor, shared between the sensor workers and the
//! control loop.
//!
//! ```text
//!   sensor-a worker ──update──▶ ┌──────────────┐
//!   sensor-b worker ──update──▶ │  StateStore  │ ──snapshot──▶ ControlLoop / GUI
//!   scheduler ───mark_stale───▶ └──────────────┘
//! ```
//!
//! The key set is fixed at construction.  Each entry sits behind its own
//! mutex, so a writer only ever holds one short lock and a snapshot is
//! consistent per key.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::error;

use crate::measurement::{Measurement, Quality, SensorId, Timestamp};

/// Sensor id → latest measurement.
pub type EnvironmentSnapshot = BTreeMap<SensorId, Measurement>;

#[derive(Debug, Default)]
struct Entry {
    latest: Option<Measurement>,
    /// Timestamp of the last `Ok` reading.
    last_good_at: Option<Timestamp>,
}

/// Per-sensor latest-value store.
#[derive(Debug)]
pub struct StateStore {
    entries: HashMap<SensorId, Mutex<Entry>>,
}

impl StateStore {
    pub fn new<'a>(ids: impl IntoIterator<Item = &'a SensorId>) -> Self {
        Self {
            entries: ids
                .into_iter()
                .map(|id| (id.clone(), Mutex::new(Entry::default())))
                .collect(),
        }
    }

    /// Replace the entry for `m.sensor_id`.
    pub fn update(&self, m: Measurement) {
        let Some(slot) = self.entries.get(&m.sensor_id) else {
            error!("StateStore: update for unconfigured sensor '{}'", m.sensor_id);
            debug_assert!(false, "update for unconfigured sensor {}", m.sensor_id);
            return;
        };
        let mut entry = lock(slot);
        if m.quality == Quality::Ok {
            entry.last_good_at = Some(m.timestamp);
        }
        entry.latest = Some(m);
    }

    /// Independent copy of every entry written so far.
    pub fn snapshot(&self) -> EnvironmentSnapshot {
        self.entries
            .iter()
            .filter_map(|(id, slot)| lock(slot).latest.clone().map(|m| (id.clone(), m)))
            .collect()
    }

    pub fn get(&self, id: &SensorId) -> Option<Measurement> {
        self.entries.get(id).and_then(|slot| lock(slot).latest.clone())
    }

    /// Downgrade an `Ok` entry to `Stale` when its last good reading is older
    /// than `max_age` ms.  Returns `true` if the entry changed.
    pub fn mark_stale(&self, id: &SensorId, now: Timestamp, max_age: u64) -> bool {
        let Some(slot) = self.entries.get(id) else {
            return false;
        };
        let mut entry = lock(slot);
        let Some(good_at) = entry.last_good_at else {
            return false;
        };
        let stale = match &entry.latest {
            Some(m) if m.quality == Quality::Ok && now.saturating_sub(good_at) > max_age => {
                m.to_stale()
            }
            _ => return false,
        };
        entry.latest = Some(stale);
        true
    }

    /// Configured sensors that have never been written.
    pub fn missing(&self) -> Vec<SensorId> {
        let mut ids: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, slot)| lock(slot).latest.is_none())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A worker that panicked mid-update cannot leave a torn `Entry` (the
/// fields are replaced whole), so the poisoned guard is safe to reuse.
fn lock(slot: &Mutex<Entry>) -> MutexGuard<'_, Entry> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
