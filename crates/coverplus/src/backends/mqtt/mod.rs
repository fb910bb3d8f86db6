mod client;
mod sink;

use std::error::Error;

use async_trait::async_trait;
use linkme::distributed_slice;
use rumqttc::AsyncClient;

use crate::config::CoverConfig;
use crate::config::MqttBackendConfig;
use crate::cover::MotorCommandSink;
use crate::engine;
use crate::engine::Backend;
pub use client::MqttConnection;
pub use sink::MqttSink;

#[distributed_slice(engine::BACKEND_REGISTRY)]
fn init_mqtt(ctx: &engine::BackendContext) -> engine::BackendFactoryResult {
    let mqtt_config = if let Some(c) = &ctx.config.backends.mqtt {
        c
    } else {
        return Ok(None);
    };

    Ok(Some(Box::new(MqttBackend::new(mqtt_config))))
}

/// Drives real covers through an MQTT bridge
///
/// Each real cover gets `{"state": "OPEN" | "CLOSE" | "STOP"}` published to
/// `<base_topic>/<object_id>/set`, the Zigbee2MQTT cover convention.
pub struct MqttBackend {
    connection: MqttConnection,
    base_topic: String,
}

impl MqttBackend {
    pub fn new(config: &MqttBackendConfig) -> Self {
        Self {
            connection: MqttConnection::new(config),
            base_topic: config.base_topic.clone(),
        }
    }
}

#[async_trait]
impl Backend for MqttBackend {
    fn name(&self) -> &str {
        "mqtt"
    }

    async fn start(&mut self) -> Result<(), Box<dyn Error + Send>> {
        self.connection.connect();
        Ok(())
    }

    fn sink(&self, cover: &CoverConfig) -> Box<dyn MotorCommandSink> {
        let topic = sink::command_topic(&self.base_topic, cover.real_object_id());
        Box::new(MqttSink::<Option<AsyncClient>>::new(
            cover.real_entity_id.clone(),
            topic,
            self.connection.client(),
        ))
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        self.connection
            .disconnect()
            .await
            .map_err(|e| Box::new(e) as Box<dyn Error + Send>)
    }
}
