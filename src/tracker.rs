use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::messages::{ButtonId, ButtonState};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackedButton {
    pub id: ButtonId,
    pub last_seen: Instant,
    pub state: ButtonState,
    pub rssi: i16,
    /// When `rssi` was last recorded, which lags `last_seen` while readings
    /// stay inside the debounce thresholds.
    pub rssi_time: Instant,
}

impl TrackedButton {
    fn new(id: ButtonId, rssi: i16, now: Instant) -> Self {
        TrackedButton {
            id,
            last_seen: now,
            state: ButtonState::Unknown,
            rssi,
            rssi_time: now,
        }
    }

    pub fn record_rssi(&mut self, rssi: i16, now: Instant) {
        self.rssi = rssi;
        self.rssi_time = now;
    }

    pub fn is_expired(&self, now: Instant, watchdog: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > watchdog
    }
}

/// Buttons currently considered connected, keyed by id.
#[derive(Debug, Default)]
pub struct TrackerTable {
    buttons: HashMap<ButtonId, TrackedButton>,
}

impl TrackerTable {
    pub fn new() -> Self {
        TrackerTable::default()
    }

    pub fn get(&self, id: ButtonId) -> Option<&TrackedButton> {
        self.buttons.get(&id)
    }

    /// Returns the entry for `id`, creating a fresh one in the `Unknown` state
    /// if the button isn't tracked yet.
    pub fn upsert(&mut self, id: ButtonId, rssi: i16, now: Instant) -> &mut TrackedButton {
        self.buttons
            .entry(id)
            .or_insert_with(|| TrackedButton::new(id, rssi, now))
    }

    pub fn remove(&mut self, id: ButtonId) -> Option<TrackedButton> {
        self.buttons.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedButton> {
        self.buttons.values()
    }

    /// Removes every entry not seen within `watchdog`. Ids are collected before
    /// anything is deleted.
    pub fn remove_expired(&mut self, now: Instant, watchdog: Duration) -> Vec<TrackedButton> {
        let expired: Vec<ButtonId> = self
            .iter()
            .filter(|b| b.is_expired(now, watchdog))
            .map(|b| b.id)
            .collect();

        expired.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.buttons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buttons.is_empty()
    }
}
