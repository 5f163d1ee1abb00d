use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use btleplug::api::Manager as _;
use clap::Parser;
use log::{error, info, warn};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::engine::DebounceEngine;
use crate::messages::{ControlAnnouncement, ServiceState};

mod config;
mod engine;
mod manager;
mod messages;
mod mqtt;
mod scanner;
mod tracker;

const SIGHTING_QUEUE: usize = 256;
const NOTIFICATION_QUEUE: usize = 64;

/// Turn beacon button sightings into debounced MQTT notifications.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Only take sightings from MQTT, don't scan for beacons locally
    #[arg(long)]
    no_scan: bool,
}

/// SIGHUP reloads the config file, ctrl-c shuts down.
async fn forward_signals(control: mpsc::Sender<ControlAnnouncement>) -> anyhow::Result<()> {
    let mut hangup = signal(SignalKind::hangup())?;

    loop {
        let message = tokio::select! {
            _ = hangup.recv() => ControlAnnouncement::ReloadConfig,
            result = tokio::signal::ctrl_c() => {
                result?;
                ControlAnnouncement::Shutdown
            }
        };
        let shutdown = matches!(message, ControlAnnouncement::Shutdown);
        if control.send(message).await.is_err() || shutdown {
            return Ok(());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let engine_config = config.engine_config()?;

    if engine_config.accepted_ids.is_empty() {
        warn!("No beacon uuids configured, nothing will be tracked");
    }
    info!("Accepted beacon uuids: {:?}", engine_config.accepted_ids);

    let (mqtt_client, mut eventloop) = mqtt::MqttClient::new(&config.mqtt);
    mqtt_client.subscribe().await?;
    mqtt_client.announce_state(ServiceState::Starting).await?;

    let (sightings_tx, sightings_rx) = mpsc::channel(SIGHTING_QUEUE);
    let (control_tx, control_rx) = mpsc::channel(4);
    let (notifications_tx, notifications_rx) = mpsc::channel(NOTIFICATION_QUEUE);

    let listener = {
        let client = mqtt_client.clone();
        let sightings = sightings_tx.clone();
        let control = control_tx.clone();
        tokio::task::spawn(async move {
            client.event_loop(&mut eventloop, sightings, control).await;
        })
    };

    let publisher = {
        let client = mqtt_client.clone();
        tokio::task::spawn(async move { client.publish_notifications(notifications_rx).await })
    };

    if config.scan_enabled() && !args.no_scan {
        let bt_manager = btleplug::platform::Manager::new().await?;
        let adapter = bt_manager
            .adapters()
            .await?
            .into_iter()
            .nth(config.adapter_index())
            .with_context(|| format!("no bluetooth adapter at index {}", config.adapter_index()))?;

        let scanner = scanner::Scanner::new(adapter);
        let sightings = sightings_tx.clone();
        tokio::task::spawn(async move {
            if let Err(err) = scanner.run(sightings).await {
                error!("Error scanning for beacons: {:?}", err);
            }
        });
    } else {
        info!("Local BLE scanning disabled");
    }
    drop(sightings_tx);

    tokio::task::spawn(async move {
        if let Err(err) = forward_signals(control_tx).await {
            error!("Error listening for signals: {:?}", err);
        }
    });

    let engine = DebounceEngine::new(engine_config, Instant::now());
    let core = manager::Manager::new(engine, args.config, sightings_rx, control_rx, notifications_tx);

    mqtt_client.announce_state(ServiceState::Running).await?;
    core.run_loop().await;
    info!("Exiting manager event loop");

    // The manager held the only notification sender, so this drains the queue.
    if let Err(err) = publisher.await {
        error!("Error publishing notifications: {:?}", err);
    }

    mqtt_client.announce_state(ServiceState::Stopped).await?;
    mqtt_client.disconnect().await?;
    if tokio::time::timeout(Duration::from_secs(5), listener).await.is_err() {
        warn!("Timed out flushing MQTT connection");
    }

    Ok(())
}
