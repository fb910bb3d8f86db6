use std::time::Duration;

use rumqttc::AsyncClient;
use rumqttc::ClientError;
use rumqttc::Event;
use rumqttc::MqttOptions;
use rumqttc::Packet;
use rumqttc::QoS;
use tokio::task::JoinHandle;

use crate::config::MqttBackendConfig;

/// Capacity of the request queue between the client and its event loop
const REQUEST_QUEUE_SIZE: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("request queue is full")]
    Full,

    #[error("{0}")]
    Failed(String),
}

/// Non-blocking publish used by motor sinks
///
/// This trait allows for mocking the MQTT client for testing purposes
pub trait CommandPublisher: Send + Sync + 'static {
    /// Queue a message without waiting
    fn try_publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

impl CommandPublisher for AsyncClient {
    fn try_publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        AsyncClient::try_publish(self, topic, QoS::AtLeastOnce, false, payload).map_err(
            |e| match e {
                ClientError::TryRequest(_) => PublishError::Full,
                e => PublishError::Failed(e.to_string()),
            },
        )
    }
}

/// A publisher that may not exist yet, before the backend has connected
impl<P: CommandPublisher> CommandPublisher for Option<P> {
    fn try_publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        match self {
            Some(publisher) => publisher.try_publish(topic, payload),
            None => Err(PublishError::Failed(
                "MQTT client not connected. Call connect() first.".to_string(),
            )),
        }
    }
}

/// Mock publisher for testing
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MockPublisher {
    pub published: std::sync::Arc<std::sync::Mutex<Vec<(String, Vec<u8>)>>>,
    pub full: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

#[cfg(test)]
impl CommandPublisher for MockPublisher {
    fn try_publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        if self.full.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(PublishError::Full);
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }
}

/// MQTT connection using rumqttc
///
/// The client and its event loop only exist once [`connect`] has run.
///
/// [`connect`]: MqttConnection::connect
pub struct MqttConnection {
    /// MQTT connection options (stored for lazy initialization)
    mqtt_options: MqttOptions,

    /// AsyncClient (created in connect())
    client: Option<AsyncClient>,

    /// Background event loop task handle
    event_loop_task: Option<JoinHandle<()>>,
}

impl MqttConnection {
    /// Create a new connection from configuration
    pub fn new(config: &MqttBackendConfig) -> Self {
        let mut mqtt_options =
            MqttOptions::new(config.client_id.clone(), config.broker.clone(), config.port);

        // Set keep-alive interval
        mqtt_options.set_keep_alive(Duration::from_secs(30));

        // Set credentials if provided
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            mqtt_options.set_credentials(username, password);
        }

        Self {
            mqtt_options,
            client: None,
            event_loop_task: None,
        }
    }

    /// Client handle, `None` until connected
    pub fn client(&self) -> Option<AsyncClient> {
        self.client.clone()
    }

    /// Create the client and spawn the background task that drives it
    pub fn connect(&mut self) {
        if self.client.is_some() {
            return;
        }

        let (client, mut event_loop) =
            AsyncClient::new(self.mqtt_options.clone(), REQUEST_QUEUE_SIZE);

        let task = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!("Connected to MQTT broker");
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        tracing::warn!("MQTT broker closed the connection");
                    }
                    Ok(_) => {
                        // Ignore other events (puback, pingresp, etc.)
                    }
                    Err(rumqttc::ConnectionError::RequestsDone) => break,
                    Err(e) => {
                        tracing::warn!("MQTT event loop error: {}", e);
                        // Sleep briefly before retrying
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            tracing::info!("MQTT event loop task exiting");
        });

        self.client = Some(client);
        self.event_loop_task = Some(task);
    }

    /// Send DISCONNECT and wait for the event loop to drain
    pub async fn disconnect(&mut self) -> Result<(), ClientError> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };
        client.disconnect().await?;
        if let Some(mut task) = self.event_loop_task.take() {
            if tokio::time::timeout(Duration::from_secs(2), &mut task)
                .await
                .is_err()
            {
                tracing::warn!("MQTT event loop did not stop in time");
                task.abort();
            }
        }
        Ok(())
    }
}

impl Drop for MqttConnection {
    fn drop(&mut self) {
        if let Some(task) = self.event_loop_task.take() {
            task.abort();
        }
    }
}
