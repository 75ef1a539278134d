use std::collections::HashSet;
use std::sync::Arc;

use rumqttc::{AsyncClient, ClientError, Event, LastWill, MqttOptions, Outgoing, Packet, QoS};
use serde_json::{Value, json};
use tokio::sync::{Mutex, Notify};
use tokio::task;
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};

use crate::config::MqttSettings;
use crate::error::Result;
use crate::property::Snapshot;
use crate::sensor::Sensor;

pub const ONLINE: &str = "online";
pub const OFFLINE: &str = "offline";

/// Republishes sensor readings to an MQTT broker.
///
/// Per sensor, a retained `config` message describes the reading and a
/// retained `state` message carries its current value. `{prefix}/status`
/// tracks availability and is set to `offline` by the broker if we vanish.
///
/// Publishing never waits on the broker. While it is unreachable the
/// request queue fills up and further messages are dropped until the next
/// update.
pub struct MqttPublisher {
    client: AsyncClient,
    topic_prefix: String,
    announced: Mutex<HashSet<String>>,
    shutdown: Arc<Notify>,
    eventloop_handle: task::JoinHandle<()>,
}

impl MqttPublisher {
    pub fn new(settings: &MqttSettings) -> Self {
        let topic_prefix = settings.topic_prefix.trim_matches('/').to_string();

        let mut mqttoptions = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        mqttoptions.set_keep_alive(Duration::from_secs(settings.keep_alive_secs));
        mqttoptions.set_last_will(LastWill::new(
            availability_topic(&topic_prefix),
            OFFLINE,
            QoS::AtLeastOnce,
            true,
        ));
        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 64);
        let shutdown = Arc::new(Notify::new());

        let shutdown_clone = shutdown.clone();
        let host = settings.host.clone();
        let eventloop_handle = task::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_clone.notified() => {
                        info!("Shutting down MQTT event loop");
                        break;
                    }
                    event = eventloop.poll() => match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!(broker = %host, "connected to MQTT broker");
                        }
                        Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                            info!("disconnected from MQTT broker");
                            break;
                        }
                        Ok(event) => debug!(?event, "MQTT event"),
                        Err(e) => {
                            error!("MQTT event loop error: {:?}", e);
                            time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        });

        Self {
            client,
            topic_prefix,
            announced: Mutex::new(HashSet::new()),
            shutdown,
            eventloop_handle,
        }
    }

    pub async fn publish_availability(&self, online: bool) -> Result<()> {
        let payload = if online { ONLINE } else { OFFLINE };
        self.send(availability_topic(&self.topic_prefix), payload)?;
        Ok(())
    }

    /// Publishes the state of every sensor present in `snapshot`, announcing
    /// sensors seen for the first time. Returns the number of states queued.
    pub async fn publish_sensors(&self, sensors: &[Sensor], snapshot: &Snapshot) -> Result<usize> {
        let mut published = 0;
        let mut dropped = 0;
        for sensor in sensors {
            if !self.announce(sensor).await? {
                dropped += 1;
                continue;
            }

            let Some(payload) = state_payload(sensor, snapshot) else {
                continue;
            };
            if self.send(sensor_topic(&self.topic_prefix, sensor, "state"), payload.to_string())? {
                published += 1;
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            warn!(published, dropped, "MQTT queue full, broker unreachable?");
        } else {
            debug!(published, "published HydroLink sensor states");
        }
        Ok(published)
    }

    /// Returns false if the config message could not be queued.
    async fn announce(&self, sensor: &Sensor) -> Result<bool> {
        let mut announced = self.announced.lock().await;
        if announced.contains(&sensor.unique_id) {
            return Ok(true);
        }
        let queued = self.send(
            sensor_topic(&self.topic_prefix, sensor, "config"),
            config_payload(&self.topic_prefix, sensor).to_string(),
        )?;
        if queued {
            announced.insert(sensor.unique_id.clone());
        }
        Ok(queued)
    }

    /// Queues a retained message. `Ok(false)` means the queue was full.
    fn send(&self, topic: String, payload: impl Into<Vec<u8>>) -> Result<bool> {
        match self.client.try_publish(topic, QoS::AtLeastOnce, true, payload) {
            Ok(()) => Ok(true),
            Err(ClientError::TryRequest(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Marks us offline, disconnects and waits for the event loop to
    /// flush.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.publish_availability(false).await {
            error!("failed to publish offline status: {:?}", e);
        }
        if let Err(e) = self.client.try_disconnect() {
            error!("MQTT disconnect failed: {:?}", e);
        }
        if time::timeout(Duration::from_secs(5), &mut self.eventloop_handle)
            .await
            .is_err()
        {
            self.shutdown.notify_one();
        }
    }
}

pub fn availability_topic(prefix: &str) -> String {
    format!("{prefix}/status")
}

pub fn sensor_topic(prefix: &str, sensor: &Sensor, leaf: &str) -> String {
    format!(
        "{prefix}/{}/{}/{leaf}",
        topic_segment(&sensor.device_id),
        topic_segment(&sensor.key)
    )
}

// Wildcards and separators are not allowed inside a topic level.
fn topic_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '/' | '+' | '#' => '_',
            c => c,
        })
        .collect()
}

pub fn state_payload(sensor: &Sensor, snapshot: &Snapshot) -> Option<Value> {
    let value = sensor.value_in(snapshot)?;
    Some(json!({
        "value": value,
        "unit": sensor.unit(),
        "updated_at": sensor.updated_at_in(snapshot),
    }))
}

pub fn config_payload(prefix: &str, sensor: &Sensor) -> Value {
    json!({
        "name": sensor.name,
        "unique_id": sensor.unique_id,
        "state_topic": sensor_topic(prefix, sensor, "state"),
        "availability_topic": availability_topic(prefix),
        "unit_of_measurement": sensor.unit(),
        "device_class": sensor.device_class(),
        "state_class": sensor.state_class(),
        "icon": sensor.icon(),
        "entity_category": sensor.entity_category(),
        "enabled_by_default": sensor.enabled_by_default,
        "device": sensor.device_info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::build_sensors;

    fn snapshot() -> Snapshot {
        Snapshot::new(
            serde_json::from_value(json!([{
                "id": "dev/1",
                "system_type": "demand_softener",
                "nickname": "Garage",
                "properties": {
                    "salt_level_tenths": {"value": 455, "updated_at": "2025-10-01T12:00:00Z"},
                    "error_code": {"value": null}
                }
            }]))
            .unwrap(),
        )
    }

    fn sensor(snapshot: &Snapshot, key: &str) -> Sensor {
        build_sensors(snapshot)
            .into_iter()
            .find(|s| s.key == key)
            .unwrap()
    }

    #[test]
    fn topics_escape_reserved_characters() {
        let snap = snapshot();
        let salt = sensor(&snap, "salt_level_tenths");
        assert_eq!(
            sensor_topic("hydrolink", &salt, "state"),
            "hydrolink/dev_1/salt_level_tenths/state"
        );
        assert_eq!(availability_topic("hydrolink"), "hydrolink/status");
    }

    #[test]
    fn state_payload_carries_scaled_value_and_unit() {
        let snap = snapshot();
        let payload = state_payload(&sensor(&snap, "salt_level_tenths"), &snap).unwrap();
        assert_eq!(payload["value"], 45.5);
        assert_eq!(payload["unit"], "%");
        assert_eq!(payload["updated_at"], "2025-10-01T12:00:00Z");

        let payload = state_payload(&sensor(&snap, "error_code"), &snap).unwrap();
        assert!(payload["value"].is_null());
    }

    #[test]
    fn state_payload_is_skipped_for_vanished_devices() {
        let snap = snapshot();
        let salt = sensor(&snap, "salt_level_tenths");
        assert!(state_payload(&salt, &Snapshot::new(Vec::new())).is_none());
    }

    #[tokio::test]
    async fn publishing_does_not_wait_for_an_unreachable_broker() {
        let properties: serde_json::Map<String, Value> = (0..40)
            .map(|i| (format!("reading_{i}"), json!({"value": i})))
            .collect();
        let snap = Snapshot::new(
            serde_json::from_value(json!([{
                "id": "soft-1",
                "system_type": "demand_softener",
                "properties": properties
            }]))
            .unwrap(),
        );
        let sensors = build_sensors(&snap);
        assert_eq!(sensors.len(), 40);

        // nothing listens on port 1
        let publisher = MqttPublisher::new(&MqttSettings {
            host: "127.0.0.1".into(),
            port: 1,
            client_id: "hydrolink-test".into(),
            topic_prefix: "hydrolink".into(),
            username: None,
            password: None,
            keep_alive_secs: 30,
        });

        for _ in 0..3 {
            let published = time::timeout(
                Duration::from_secs(5),
                publisher.publish_sensors(&sensors, &snap),
            )
            .await
            .expect("publish blocked on a dead broker")
            .unwrap();
            assert!(published <= sensors.len());
        }
        time::timeout(Duration::from_secs(5), publisher.publish_availability(true))
            .await
            .expect("availability blocked on a dead broker")
            .unwrap();
    }

    #[test]
    fn config_payload_describes_sensor() {
        let snap = snapshot();
        let payload = config_payload("hydrolink", &sensor(&snap, "salt_level_tenths"));
        assert_eq!(payload["name"], "Garage Salt Level");
        assert_eq!(payload["unique_id"], "hydrolink_dev/1_salt_level_tenths");
        assert_eq!(payload["state_class"], "measurement");
        assert_eq!(payload["device"]["manufacturer"], "EcoWater");
        assert_eq!(payload["enabled_by_default"], true);
    }
}
