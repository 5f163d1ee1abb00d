use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use rumqttc::{MqttOptions, QoS, SubscribeFilter};
use serde_derive::Serialize;
use tokio::sync::mpsc;

use crate::config;
use crate::messages::{ButtonId, ControlAnnouncement, Notification, ServiceState, Sighting};

#[derive(Debug, Clone)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    publisher_id: String,
    topic_path: String,
}

#[derive(Debug, Serialize)]
struct ButtonMqttMessage {
    uuid: String,
    id: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<u8>,
    rssi: i16,
    connected: bool,
}

#[derive(Debug, Serialize)]
struct HeartbeatMqttMessage {
    heartbeat: bool,
}

#[derive(Debug, Serialize)]
struct StatusMqttMessage {
    state: &'static str,
}

impl MqttClient {
    pub fn new(config: &config::MqttConfig) -> (Self, rumqttc::EventLoop) {
        let publisher_id = config
            .publisher_id
            .clone()
            .unwrap_or_else(|| "magic-button".to_string());

        let mut mqttoptions = MqttOptions::new(
            publisher_id.clone(),
            config.host.clone(),
            config.port.unwrap_or(1883),
        );

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, 10);

        (
            MqttClient {
                client,
                publisher_id,
                topic_path: config
                    .topic_path
                    .clone()
                    .unwrap_or_else(|| "magic_button".to_string()),
            },
            eventloop,
        )
    }

    fn sightings_topic(&self) -> String {
        format!("{}/sightings", self.topic_path)
    }

    fn reload_topic(&self) -> String {
        format!("{}/reload", self.topic_path)
    }

    fn status_topic(&self) -> String {
        format!("{}/{}/status", self.topic_path, self.publisher_id)
    }

    pub async fn subscribe(&self) -> Result<(), rumqttc::ClientError> {
        self.client
            .subscribe_many(vec![
                SubscribeFilter::new(self.sightings_topic(), QoS::AtMostOnce),
                SubscribeFilter::new(self.reload_topic(), QoS::AtLeastOnce),
            ])
            .await?;

        Ok(())
    }

    /// Drive the MQTT connection, forwarding sightings and reload requests
    /// published by other processes.
    pub async fn event_loop(
        &self,
        eventloop: &mut rumqttc::EventLoop,
        sightings: mpsc::Sender<Sighting>,
        control: mpsc::Sender<ControlAnnouncement>,
    ) {
        let sightings_topic = self.sightings_topic();
        let reload_topic = self.reload_topic();

        loop {
            match eventloop.poll().await {
                Ok(notification) => match notification {
                    rumqttc::Event::Incoming(rumqttc::Packet::Publish(p)) => {
                        debug!("Received MQTT message on topic {}: {:?}", p.topic, p.payload);

                        if p.topic == sightings_topic {
                            match Sighting::from_json(&p.payload, Instant::now()) {
                                Ok(sighting) => {
                                    if sightings.send(sighting).await.is_err() {
                                        debug!("Sighting receiver closed");
                                        return;
                                    }
                                }
                                Err(err) => warn!("Rejected sighting: {}", err),
                            }
                        } else if p.topic == reload_topic {
                            info!("Received config reload request");
                            if control.send(ControlAnnouncement::ReloadConfig).await.is_err() {
                                debug!("Control receiver closed");
                                return;
                            }
                        }
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::SubAck(_)) => {
                        debug!("Subscription acknowledged");
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_)) => {
                        debug!("Connection acknowledged");
                        if let Err(err) = self.subscribe().await {
                            error!("Error subscribing to MQTT topics: {:?}", err);
                        }
                    }
                    rumqttc::Event::Outgoing(rumqttc::Outgoing::Disconnect) => {
                        debug!("MQTT disconnect sent");
                        return;
                    }
                    _ => {}
                },
                Err(e) => {
                    error!("Error polling MQTT event loop: {:?}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Publish notifications in the order they were queued, until the queue
    /// closes.
    pub async fn publish_notifications(&self, mut rx: mpsc::Receiver<Notification>) {
        while let Some(notification) = rx.recv().await {
            if let Err(err) = self.announce(&notification).await {
                error!("Error publishing {:?}: {:?}", notification, err);
            }
        }
        debug!("Notification queue closed");
    }

    pub async fn announce(&self, notification: &Notification) -> anyhow::Result<()> {
        let (topic, payload) =
            notification_message(&self.topic_path, &self.publisher_id, notification)?;
        info!("Announcing {:?} on {}", notification, topic);
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }

    pub async fn announce_state(&self, state: ServiceState) -> anyhow::Result<()> {
        info!("Service state: {}", state.as_str());
        let payload = serde_json::to_string(&StatusMqttMessage {
            state: state.as_str(),
        })?;
        self.client
            .publish(self.status_topic(), QoS::AtLeastOnce, true, payload)
            .await?;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), rumqttc::ClientError> {
        debug!("Disconnecting MQTT client");
        self.client.disconnect().await
    }
}

/// Topic and JSON payload for a notification.
fn notification_message(
    topic_path: &str,
    publisher_id: &str,
    notification: &Notification,
) -> Result<(String, String), serde_json::Error> {
    let button_topic =
        |id: &ButtonId| format!("{topic_path}/{publisher_id}/button/{}/{}", id.kind, id.major);

    let message = match notification {
        Notification::StateChange { id, pressed, rssi } => (
            button_topic(id),
            serde_json::to_string(&ButtonMqttMessage {
                uuid: id.kind.to_string(),
                id: id.major,
                state: Some(u8::from(*pressed)),
                rssi: *rssi,
                connected: true,
            })?,
        ),
        Notification::Disconnected { id, last_rssi } => (
            button_topic(id),
            serde_json::to_string(&ButtonMqttMessage {
                uuid: id.kind.to_string(),
                id: id.major,
                state: None,
                rssi: *last_rssi,
                connected: false,
            })?,
        ),
        Notification::Heartbeat => (
            format!("{topic_path}/{publisher_id}/heartbeat"),
            serde_json::to_string(&HeartbeatMqttMessage { heartbeat: true })?,
        ),
    };
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const KIND: &str = "e2c56db5-dffb-48d2-b060-d0f5a71096e0";

    fn button(major: u16) -> ButtonId {
        ButtonId::new(Uuid::parse_str(KIND).unwrap(), major)
    }

    #[test]
    fn test_state_change_message() {
        let (topic, payload) = notification_message(
            "magic_button",
            "hall",
            &Notification::StateChange {
                id: button(12),
                pressed: true,
                rssi: -60,
            },
        )
        .unwrap();
        assert_eq!(topic, format!("magic_button/hall/button/{KIND}/12"));
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"uuid": KIND, "id": 12, "state": 1, "rssi": -60, "connected": true})
        );
    }

    #[test]
    fn test_disconnected_message_has_no_state() {
        let (topic, payload) = notification_message(
            "magic_button",
            "hall",
            &Notification::Disconnected {
                id: button(12),
                last_rssi: -71,
            },
        )
        .unwrap();
        assert_eq!(topic, format!("magic_button/hall/button/{KIND}/12"));
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"uuid": KIND, "id": 12, "rssi": -71, "connected": false})
        );
    }

    #[test]
    fn test_kinds_sharing_a_major_get_separate_topics() {
        let other = ButtonId::new(Uuid::nil(), 12);
        let message = |id| {
            notification_message(
                "mb",
                "hall",
                &Notification::Disconnected { id, last_rssi: -60 },
            )
            .unwrap()
        };
        assert_ne!(message(button(12)).0, message(other).0);
    }

    #[test]
    fn test_heartbeat_message() {
        let (topic, payload) = notification_message("mb", "hall", &Notification::Heartbeat).unwrap();
        assert_eq!(topic, "mb/hall/heartbeat");
        assert_eq!(payload, r#"{"heartbeat":true}"#);
    }
}
