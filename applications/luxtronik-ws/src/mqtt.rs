//! Home Assistant MQTT discovery as the entity host.

use crate::bridge::EntityHost;
use crate::config::MqttConfig;
use crate::entity::{DeviceInfo, EntityDescriptor};
use crate::error::{AppError, Result};
use crate::value::Reading;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use rumqttc::v5 as mqtt5;
use rumqttc::Transport;

pub type MqttOptions = mqtt5::MqttOptions;
pub type AsyncClient = mqtt5::AsyncClient;
pub type EventLoop = mqtt5::EventLoop;
pub type QoS = mqtt5::mqttbytes::QoS;

const TLS_PORT: u16 = 8883;

pub fn build_options(cfg: &MqttConfig) -> MqttOptions {
    let client_id = format!("luxtronik-ws-{}", Uuid::new_v4());
    let mut opts = MqttOptions::new(client_id, &cfg.host, cfg.port);
    opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs.unwrap_or(30)));
    if let (Some(u), Some(p)) = (&cfg.username, &cfg.password) {
        opts.set_credentials(u.clone(), p.clone());
    }
    if cfg.port == TLS_PORT {
        opts.set_transport(Transport::tls_with_default_config());
    }
    opts
}

pub fn new(options: MqttOptions) -> (AsyncClient, EventLoop) {
    mqtt5::AsyncClient::new(options, 50)
}

pub fn qos(v: u8) -> QoS {
    match v {
        2 => QoS::ExactlyOnce,
        0 => QoS::AtMostOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Keep the connection alive; rumqttc reconnects on the next poll.
pub fn spawn_event_loop(mut eventloop: EventLoop) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(event) => debug!(?event, "mqtt event"),
                Err(e) => {
                    warn!("mqtt error: {e}; reconnecting after short delay");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    })
}

/// Topic-safe form of a unique id.
pub fn object_id(unique_id: &str) -> String {
    unique_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

pub fn config_topic(discovery_prefix: &str, node_id: &str, object_id: &str) -> String {
    format!("{discovery_prefix}/sensor/{node_id}/{object_id}/config")
}

pub fn state_topic(node_id: &str, object_id: &str) -> String {
    format!("{node_id}/{object_id}/state")
}

pub fn discovery_payload(node_id: &str, device: &DeviceInfo, entity: &EntityDescriptor) -> Value {
    let unique_id = entity.unique_id();
    let object_id = object_id(&unique_id);
    let mut obj = Map::new();
    obj.insert("name".into(), Value::String(entity.name.clone()));
    obj.insert("unique_id".into(), Value::String(unique_id));
    obj.insert(
        "state_topic".into(),
        Value::String(state_topic(node_id, &object_id)),
    );

    let kind = entity.kind;
    let optional = [
        ("unit_of_measurement", kind.unit()),
        ("device_class", kind.device_class()),
        ("state_class", kind.state_class()),
        ("icon", kind.icon()),
    ];
    for (key, value) in optional {
        if let Some(v) = value {
            obj.insert(key.into(), Value::String(v.into()));
        }
    }
    if let Some(precision) = kind.suggested_display_precision() {
        obj.insert("suggested_display_precision".into(), json!(precision));
    }

    obj.insert(
        "device".into(),
        json!({
            "identifiers": [device.identifier],
            "name": device.name,
            "model": device.model,
            "manufacturer": device.manufacturer,
            "sw_version": device.sw_version,
        }),
    );
    Value::Object(obj)
}

pub struct MqttHost {
    client: AsyncClient,
    qos: QoS,
    discovery_prefix: String,
    node_id: String,
}

impl MqttHost {
    pub fn new(client: AsyncClient, cfg: &MqttConfig) -> Self {
        Self {
            client,
            qos: qos(cfg.qos),
            discovery_prefix: cfg.discovery_prefix.clone(),
            node_id: cfg.node_id.clone(),
        }
    }

    async fn publish(&self, topic: String, retain: bool, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic.clone(), self.qos, retain, payload)
            .await
            .map_err(|e| AppError::Mqtt(format!("publish to {topic}: {e}")))
    }
}

#[async_trait]
impl EntityHost for MqttHost {
    async fn register_device(&self, device: &DeviceInfo) -> Result<()> {
        // Discovery carries the device inside every sensor config
        debug!(model = %device.model, sw_version = %device.sw_version, "device registered");
        Ok(())
    }

    async fn register_entities(
        &self,
        device: &DeviceInfo,
        entities: &[EntityDescriptor],
    ) -> Result<()> {
        for entity in entities {
            let object_id = object_id(&entity.unique_id());
            let payload = discovery_payload(&self.node_id, device, entity);
            self.publish(
                config_topic(&self.discovery_prefix, &self.node_id, &object_id),
                true,
                serde_json::to_vec(&payload)?,
            )
            .await?;
        }
        Ok(())
    }

    async fn publish_readings(&self, readings: &[Reading]) -> Result<()> {
        for reading in readings {
            let Some(value) = &reading.value else {
                continue;
            };
            let object_id = object_id(&reading.unique_id);
            self.publish(
                state_topic(&self.node_id, &object_id),
                false,
                value.to_string().into_bytes(),
            )
            .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::SensorKind;
    use pretty_assertions::assert_eq;

    fn entity(kind: SensorKind) -> EntityDescriptor {
        EntityDescriptor {
            device_type: "MSW 2-6S".into(),
            firmware_version: "V3.89.0".into(),
            name: "Heizung (output)".into(),
            item_name: "Heizung".into(),
            index: 1,
            category: "energy_outputs".into(),
            kind,
        }
    }

    #[test]
    fn test_object_id_is_topic_safe() {
        assert_eq!(object_id("Heizung (output)1"), "heizung__output_1");
        assert_eq!(object_id("Außentemperatur3"), "au_entemperatur3");
    }

    #[test]
    fn test_topics() {
        assert_eq!(
            config_topic("homeassistant", "luxtronik", "vorlauf1"),
            "homeassistant/sensor/luxtronik/vorlauf1/config"
        );
        assert_eq!(state_topic("luxtronik", "vorlauf1"), "luxtronik/vorlauf1/state");
    }

    #[test]
    fn test_discovery_payload() {
        let device = DeviceInfo::new("MSW 2-6S", "V3.89.0");
        let payload = discovery_payload("luxtronik", &device, &entity(SensorKind::Energy));

        assert_eq!(payload["name"], "Heizung (output)");
        assert_eq!(payload["unique_id"], "Heizung (output)1");
        assert_eq!(payload["state_topic"], "luxtronik/heizung__output_1/state");
        assert_eq!(payload["unit_of_measurement"], "kWh");
        assert_eq!(payload["device_class"], "energy");
        assert_eq!(payload["state_class"], "total_increasing");
        assert!(payload.get("icon").is_none());
        assert_eq!(payload["device"]["manufacturer"], "Alpha Innotec");
        assert_eq!(payload["device"]["identifiers"][0], "MSW 2-6S");
    }

    #[test]
    fn test_text_payload_has_no_unit() {
        let device = DeviceInfo::new("MSW 2-6S", "V3.89.0");
        let payload = discovery_payload("luxtronik", &device, &entity(SensorKind::Text));
        assert!(payload.get("unit_of_measurement").is_none());
        assert!(payload.get("state_class").is_none());
    }

    #[test]
    fn test_hours_payload_has_display_precision() {
        let device = DeviceInfo::new("MSW 2-6S", "V3.89.0");
        let payload = discovery_payload("luxtronik", &device, &entity(SensorKind::Hours));
        assert_eq!(payload["suggested_display_precision"], 0);
        assert_eq!(payload["unit_of_measurement"], "h");

        let energy = discovery_payload("luxtronik", &device, &entity(SensorKind::Energy));
        assert!(energy.get("suggested_display_precision").is_none());
    }

    fn mqtt_config(port: u16) -> MqttConfig {
        MqttConfig {
            host: "localhost".into(),
            port,
            username: Some("ha".into()),
            password: Some("secret".into()),
            keep_alive_secs: None,
            qos: 1,
            discovery_prefix: "homeassistant".into(),
            node_id: "luxtronik".into(),
        }
    }

    #[test]
    fn test_tls_transport_on_secure_port() {
        let plain = build_options(&mqtt_config(1883));
        assert!(matches!(plain.transport(), Transport::Tcp));

        let secure = build_options(&mqtt_config(8883));
        assert!(matches!(secure.transport(), Transport::Tls(_)));
        assert_eq!(secure.keep_alive(), Duration::from_secs(30));
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos(0), QoS::AtMostOnce);
        assert_eq!(qos(1), QoS::AtLeastOnce);
        assert_eq!(qos(2), QoS::ExactlyOnce);
    }
}
