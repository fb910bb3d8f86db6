use serde::Serialize;
use tracing::debug;

use super::client::CommandPublisher;
use super::client::PublishError;
use crate::cover::DispatchError;
use crate::cover::MotorCommand;
use crate::cover::MotorCommandSink;

/// Topic a bridge listens on for commands to `object_id`
pub fn command_topic(base_topic: &str, object_id: &str) -> String {
    format!("{}/{}/set", base_topic, object_id)
}

#[derive(Serialize)]
struct SetPayload {
    state: MotorCommand,
}

/// Motor sink publishing to one real cover's command topic
pub struct MqttSink<P> {
    entity_id: String,
    topic: String,
    publisher: P,
}

impl<P: CommandPublisher> MqttSink<P> {
    pub fn new(entity_id: String, topic: String, publisher: P) -> Self {
        Self {
            entity_id,
            topic,
            publisher,
        }
    }
}

impl<P: CommandPublisher> MotorCommandSink for MqttSink<P> {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn send(&mut self, command: MotorCommand) -> Result<(), DispatchError> {
        let payload = serde_json::to_vec(&SetPayload { state: command }).map_err(|e| {
            DispatchError::Other {
                entity_id: self.entity_id.clone(),
                command,
                message: e.to_string(),
            }
        })?;

        debug!("[{}] publishing {} to {}", self.entity_id, command, self.topic);
        self.publisher
            .try_publish(&self.topic, payload)
            .map_err(|e| match e {
                PublishError::Full => DispatchError::Busy {
                    entity_id: self.entity_id.clone(),
                    command,
                },
                PublishError::Failed(message) => DispatchError::Other {
                    entity_id: self.entity_id.clone(),
                    command,
                    message,
                },
            })
    }
}
