use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::config::AppConfig;
use crate::engine::{DebounceEngine, Outcome};
use crate::messages::{ControlAnnouncement, Notification, Sighting};

/// Owns the debounce engine. Sightings, ticks and control messages are all
/// handled on this one task, so the tracker table is never shared.
pub struct Manager {
    engine: DebounceEngine,
    config_path: PathBuf,
    sightings: mpsc::Receiver<Sighting>,
    control: mpsc::Receiver<ControlAnnouncement>,
    notifications: mpsc::Sender<Notification>,
}

fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    // A stalled loop doesn't get a burst of catch-up sweeps.
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

impl Manager {
    pub fn new(
        engine: DebounceEngine,
        config_path: PathBuf,
        sightings: mpsc::Receiver<Sighting>,
        control: mpsc::Receiver<ControlAnnouncement>,
        notifications: mpsc::Sender<Notification>,
    ) -> Self {
        Manager {
            engine,
            config_path,
            sightings,
            control,
            notifications,
        }
    }

    /// Runs until a shutdown is requested or every control sender is gone.
    /// The tracker table is dropped on return.
    pub async fn run_loop(mut self) {
        let mut tick_period = self.engine.settings().tick_interval;
        let mut ticks = ticker(tick_period);

        loop {
            // Control messages are handled ahead of queued sightings so a
            // reload applies to everything received after it.
            tokio::select! {
                biased;

                msg = self.control.recv() => match msg {
                    Some(ControlAnnouncement::ReloadConfig) => {
                        self.reload();
                        let period = self.engine.settings().tick_interval;
                        if period != tick_period {
                            debug!("Tick interval changed to {:?}", period);
                            tick_period = period;
                            ticks = ticker(period);
                        }
                    }
                    Some(ControlAnnouncement::Shutdown) | None => {
                        info!("Stopping with {} buttons tracked", self.engine.table().len());
                        break;
                    }
                },
                _ = ticks.tick() => {
                    let now = Instant::now().into_std();
                    for notification in self.engine.on_tick(now) {
                        self.dispatch(notification);
                    }
                }
                Some(sighting) = self.sightings.recv() => {
                    let seen_at = sighting.seen_at;
                    if let Outcome::Notified(notification) = self.engine.on_sighting(&sighting, seen_at) {
                        self.dispatch(notification);
                    }
                }
            }
        }
    }

    fn reload(&mut self) {
        match AppConfig::load(&self.config_path).and_then(|config| config.engine_config()) {
            Ok(config) => {
                if config.accepted_ids.is_empty() {
                    warn!("Reloaded configuration accepts no beacon ids");
                }
                self.engine.reconfigure(config);
            }
            Err(err) => {
                warn!(
                    "Keeping previous configuration, reload of {} failed: {}",
                    self.config_path.display(),
                    err
                );
            }
        }
    }

    fn dispatch(&self, notification: Notification) {
        match self.notifications.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(notification)) => {
                warn!("Notification queue full, dropping {:?}", notification);
            }
            Err(TrySendError::Closed(notification)) => {
                warn!("Notification queue closed, dropping {:?}", notification);
            }
        }
    }
}
