//! MQTT transport
//!
//! Speaks MQTT 5 (via `rumqttc::v5`) to a broker whose MQTT adapter publishes
//! into and consumes from the `amq.topic` exchange. The adapter translates
//! topic separators, so the routing key `bot.device_42.logs` is the MQTT topic
//! `bot/device_42/logs`, and a binding pattern `bot.*.logs` becomes the
//! subscription filter `bot/+/logs`.
//!
//! Mapping of the transport operations:
//! - `connect` opens one MQTT session and waits (bounded by the read timeout)
//!   for CONNACK; the heartbeat becomes the keep-alive interval. A background
//!   task then drives the event loop and stops on the first connection error,
//!   after which publishes fail. There is no reconnect loop here.
//! - channels are logical and share the session.
//! - `declare_queue` creates a local buffer for the queue; `bind_queue`
//!   subscribes with the shared subscription `$share/<queue>/<filter>`, so
//!   every process binding the same queue joins one group and the broker
//!   splits matching messages between them.
//! - messages arriving before `consume` wait in the queue's buffer.
//! - the correlation id travels as the MQTT 5 correlation data property.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::mqttbytes::v5::{Packet, PublishProperties};
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{Channel, Connection, ConnectionOptions, Delivery, DeliveryStream, Envelope, Transport};
use crate::config::Endpoint;
use crate::router::topic::{TOPIC_EXCHANGE, TopicPattern};
use crate::utils::RouterError;

const REQUEST_CAPACITY: usize = 64;

/// Converts a routing key into the MQTT topic the broker adapter expects.
pub fn routing_key_to_topic(routing_key: &str) -> String {
    routing_key.replace('.', "/")
}

/// Inverse of `routing_key_to_topic`.
pub fn topic_to_routing_key(topic: &str) -> String {
    topic.replace('/', ".")
}

/// Converts a topic-exchange binding pattern into an MQTT subscription
/// filter. MQTT only allows the multi-level wildcard in last position.
pub fn pattern_to_filter(pattern: &str) -> Result<String, RouterError> {
    let segments: Vec<&str> = pattern.split('.').collect();
    let last = segments.len() - 1;
    let mut filter = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        match *segment {
            "*" => filter.push("+"),
            "#" if i == last => filter.push("#"),
            "#" => {
                return Err(RouterError::Transport(format!(
                    "pattern '{pattern}' has no MQTT equivalent"
                )));
            }
            other => filter.push(other),
        }
    }
    Ok(filter.join("/"))
}

/// Subscription filter that makes `queue` a consumer group for `pattern`.
pub fn shared_subscription(queue: &str, pattern: &str) -> Result<String, RouterError> {
    if queue.is_empty() || queue.contains(['/', '+', '#']) {
        return Err(RouterError::Transport(format!(
            "'{queue}' cannot name a shared subscription"
        )));
    }
    Ok(format!("$share/{queue}/{}", pattern_to_filter(pattern)?))
}

/// Publish properties carrying `correlation_id`.
pub fn correlation_properties(correlation_id: &str) -> PublishProperties {
    PublishProperties {
        correlation_data: Some(correlation_id.as_bytes().to_vec().into()),
        ..PublishProperties::default()
    }
}

/// Correlation id of an incoming publish, if the sender set one.
pub fn correlation_id_of(properties: Option<&PublishProperties>) -> Option<String> {
    properties
        .and_then(|p| p.correlation_data.as_ref())
        .map(|data| String::from_utf8_lossy(data).into_owned())
}

#[derive(Debug, Clone)]
pub struct MqttTransport {
    default_port: u16,
    client_id_prefix: String,
}

impl MqttTransport {
    /// `default_port` is used when the endpoint URL is not an `mqtt(s)://`
    /// URL with an explicit port, e.g. for an `amqp://` URL on 5672.
    pub fn new(default_port: u16) -> Self {
        Self {
            default_port,
            client_id_prefix: "botroute".to_string(),
        }
    }

    pub fn with_client_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.client_id_prefix = prefix.into();
        self
    }

    fn mqtt_options(&self, endpoint: &Endpoint, options: &ConnectionOptions) -> MqttOptions {
        let port = match endpoint.scheme() {
            "mqtt" | "mqtts" => endpoint.port().unwrap_or(self.default_port),
            _ => self.default_port,
        };
        let client_id = format!("{}-{}", self.client_id_prefix, Uuid::new_v4());

        let mut mqtt_options = MqttOptions::new(client_id, endpoint.host(), port);
        mqtt_options
            .set_keep_alive(options.heartbeat)
            .set_clean_start(true);
        if let Some(password) = endpoint.password() {
            mqtt_options.set_credentials(endpoint.username(), password);
        }
        if matches!(endpoint.scheme(), "mqtts" | "amqps") {
            mqtt_options.set_transport(rumqttc::Transport::tls_with_default_config());
        }
        mqtt_options
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(
        &self,
        url: &str,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn Connection>, RouterError> {
        let endpoint = Endpoint::parse(url)?;
        let (client, mut eventloop) =
            AsyncClient::new(self.mqtt_options(&endpoint, options), REQUEST_CAPACITY);

        info!(
            endpoint = %endpoint.redacted(),
            log_level = %options.log_level,
            "connecting to broker"
        );
        tokio::time::timeout(options.read_timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| {
                RouterError::Transport(format!(
                    "no CONNACK from {} within {:?}",
                    endpoint.host(),
                    options.read_timeout
                ))
            })??;
        info!(host = endpoint.host(), "broker connection established");

        let queues = Arc::new(Mutex::new(QueueTable::default()));
        tokio::spawn(drive(eventloop, queues.clone()));

        Ok(Arc::new(MqttConnection { client, queues }))
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), RouterError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => continue,
            Err(e) => return Err(RouterError::transport(e)),
        }
    }
}

async fn drive(mut eventloop: EventLoop, queues: Arc<Mutex<QueueTable>>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let routing_key = topic_to_routing_key(&String::from_utf8_lossy(&publish.topic));
                let correlation_id = correlation_id_of(publish.properties.as_ref());
                match queues.lock() {
                    Ok(table) => {
                        table.dispatch(&routing_key, publish.payload.to_vec(), correlation_id);
                    }
                    Err(_) => warn!(routing_key = %routing_key, "queue table poisoned"),
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "broker connection lost");
                break;
            }
        }
    }
}

#[derive(Debug)]
struct MqttQueue {
    patterns: Vec<TopicPattern>,
    sender: UnboundedSender<Delivery>,
    receiver: Option<UnboundedReceiver<Delivery>>,
}

impl MqttQueue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            patterns: Vec::new(),
            sender,
            receiver: Some(receiver),
        }
    }
}

/// Local side of the queues bound over one MQTT session.
///
/// Each queue owns a buffer from the moment it is declared; `consume` hands
/// out its receiving end once.
#[derive(Debug, Default)]
pub(crate) struct QueueTable {
    queues: HashMap<String, MqttQueue>,
}

impl QueueTable {
    pub(crate) fn declare(&mut self, queue: &str) {
        self.queues
            .entry(queue.to_string())
            .or_insert_with(MqttQueue::new);
    }

    /// Records `pattern` for `queue`. Returns false when it was already bound.
    pub(crate) fn bind(&mut self, queue: &str, pattern: &str) -> Result<bool, RouterError> {
        let entry = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| RouterError::Transport(format!("no queue '{queue}'")))?;
        let pattern = TopicPattern::new(pattern);
        if entry.patterns.contains(&pattern) {
            return Ok(false);
        }
        entry.patterns.push(pattern);
        Ok(true)
    }

    pub(crate) fn consume(&mut self, queue: &str) -> Result<DeliveryStream, RouterError> {
        self.queues
            .get_mut(queue)
            .ok_or_else(|| RouterError::Transport(format!("no queue '{queue}'")))?
            .receiver
            .take()
            .ok_or_else(|| {
                RouterError::Transport(format!("queue '{queue}' already has a consumer"))
            })
    }

    /// Buffers the message on every queue bound to a matching pattern and
    /// returns how many queues took it.
    pub(crate) fn dispatch(
        &self,
        routing_key: &str,
        payload: Vec<u8>,
        correlation_id: Option<String>,
    ) -> usize {
        let mut delivered = 0;
        for (name, queue) in &self.queues {
            if !queue.patterns.iter().any(|p| p.matches(routing_key)) {
                continue;
            }
            let delivery = Delivery::new(routing_key, payload.clone(), correlation_id.clone());
            if queue.sender.send(delivery).is_ok() {
                delivered += 1;
            } else {
                debug!(queue = %name, "consumer gone, dropping delivery");
            }
        }
        delivered
    }
}

struct MqttConnection {
    client: AsyncClient,
    queues: Arc<Mutex<QueueTable>>,
}

#[async_trait]
impl Connection for MqttConnection {
    async fn create_channel(&self) -> Result<Arc<dyn Channel>, RouterError> {
        Ok(Arc::new(MqttChannel {
            client: self.client.clone(),
            queues: self.queues.clone(),
        }))
    }
}

struct MqttChannel {
    client: AsyncClient,
    queues: Arc<Mutex<QueueTable>>,
}

impl MqttChannel {
    fn table(&self) -> Result<MutexGuard<'_, QueueTable>, RouterError> {
        self.queues
            .lock()
            .map_err(|_| RouterError::Transport("queue table poisoned".to_string()))
    }
}

fn require_topic_exchange(exchange: &str) -> Result<(), RouterError> {
    if exchange == TOPIC_EXCHANGE {
        Ok(())
    } else {
        Err(RouterError::Transport(format!(
            "the MQTT transport only reaches '{TOPIC_EXCHANGE}', not '{exchange}'"
        )))
    }
}

#[async_trait]
impl Channel for MqttChannel {
    async fn declare_topic_exchange(
        &self,
        name: &str,
        _auto_delete: bool,
    ) -> Result<(), RouterError> {
        require_topic_exchange(name)
    }

    async fn declare_queue(&self, queue: &str) -> Result<(), RouterError> {
        self.table()?.declare(queue);
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        pattern: &str,
    ) -> Result<(), RouterError> {
        require_topic_exchange(exchange)?;
        let filter = shared_subscription(queue, pattern)?;
        let newly_bound = self.table()?.bind(queue, pattern)?;
        if !newly_bound {
            return Ok(());
        }

        self.client
            .subscribe(filter.as_str(), QoS::AtLeastOnce)
            .await
            .map_err(RouterError::transport)?;
        debug!(queue, filter = %filter, "queue bound");
        Ok(())
    }

    async fn publish(&self, envelope: Envelope) -> Result<(), RouterError> {
        require_topic_exchange(&envelope.exchange)?;
        self.client
            .publish_with_properties(
                routing_key_to_topic(&envelope.routing_key),
                QoS::AtLeastOnce,
                false,
                envelope.payload,
                correlation_properties(&envelope.correlation_id),
            )
            .await
            .map_err(RouterError::transport)
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, RouterError> {
        self.table()?.consume(queue)
    }
}
