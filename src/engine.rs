use std::collections::HashSet;
use std::time::Instant;

use log::{debug, info, trace};
use uuid::Uuid;

use crate::config::{EngineConfig, EngineSettings};
use crate::messages::{ButtonState, Notification, Sighting};
use crate::tracker::TrackerTable;

/// What happened to a sighting handed to [`DebounceEngine::on_sighting`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Notified(Notification),
    /// Tracked state was updated but nothing is worth reporting.
    Recorded,
    /// The beacon kind isn't in the accepted set.
    Ignored,
}

pub struct DebounceEngine {
    table: TrackerTable,
    accepted_ids: HashSet<Uuid>,
    settings: EngineSettings,
    last_notification: Instant,
}

impl DebounceEngine {
    pub fn new(config: EngineConfig, now: Instant) -> Self {
        DebounceEngine {
            table: TrackerTable::new(),
            accepted_ids: config.accepted_ids,
            settings: config.settings,
            last_notification: now,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn table(&self) -> &TrackerTable {
        &self.table
    }

    pub fn accepts(&self, kind: &Uuid) -> bool {
        self.accepted_ids.contains(kind)
    }

    /// Swap in new accepted ids and tunables. Tracked buttons are kept; ones
    /// whose kind is no longer accepted stop receiving sightings and age out
    /// through the watchdog.
    pub fn reconfigure(&mut self, config: EngineConfig) {
        info!(
            "Reconfiguring engine: {} accepted beacon ids, {:?}",
            config.accepted_ids.len(),
            config.settings
        );
        self.accepted_ids = config.accepted_ids;
        self.settings = config.settings;
    }

    pub fn on_sighting(&mut self, sighting: &Sighting, now: Instant) -> Outcome {
        if !self.accepts(&sighting.id.kind) {
            trace!("Ignoring sighting of unaccepted beacon {}", sighting.id.kind);
            return Outcome::Ignored;
        }

        let settings = &self.settings;
        let entry = self.table.upsert(sighting.id, sighting.rssi, now);
        // Sightings are stamped on receipt and may be dequeued after a tick
        // with a later time, so timestamps never move backwards.
        entry.last_seen = entry.last_seen.max(now);

        let state = ButtonState::from(sighting.pressed);
        let delta = (i32::from(sighting.rssi) - i32::from(entry.rssi)).unsigned_abs();

        let significant = if state != entry.state {
            entry.state = state;
            true
        } else if delta > u32::from(settings.large_rssi_delta) {
            true
        } else {
            delta > u32::from(settings.small_rssi_delta)
                && now.saturating_duration_since(entry.rssi_time) > settings.drift_report_interval
        };

        if !significant {
            debug!(
                "Button {} unchanged (rssi {} vs recorded {})",
                sighting.id, sighting.rssi, entry.rssi
            );
            return Outcome::Recorded;
        }

        entry.record_rssi(sighting.rssi, now);
        let notification = Notification::StateChange {
            id: entry.id,
            pressed: sighting.pressed,
            rssi: entry.rssi,
        };
        self.mark_sent(now);
        Outcome::Notified(notification)
    }

    pub fn on_tick(&mut self, now: Instant) -> Vec<Notification> {
        let mut notifications: Vec<Notification> = self
            .table
            .remove_expired(now, self.settings.watchdog_interval)
            .into_iter()
            .map(|button| {
                info!("Button {} timed out", button.id);
                Notification::Disconnected {
                    id: button.id,
                    last_rssi: button.rssi,
                }
            })
            .collect();

        if !notifications.is_empty() {
            self.mark_sent(now);
        }

        if now.saturating_duration_since(self.last_notification) > self.settings.max_silent_interval
        {
            debug!("Nothing sent for {:?}, sending heartbeat", self.settings.max_silent_interval);
            notifications.push(Notification::Heartbeat);
            self.mark_sent(now);
        }

        notifications
    }

    fn mark_sent(&mut self, now: Instant) {
        self.last_notification = self.last_notification.max(now);
    }
}
