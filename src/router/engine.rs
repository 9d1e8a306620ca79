//! Topic router
//!
//! `TopicRouter` is the publish and bind side of the message layer:
//! - `publish` validates the device id, derives the routing key, stamps the
//!   current request id and sends the payload to `amq.topic`;
//! - `publish_cascade` does the same for messages derived from an earlier
//!   reply, stamping the cascade id instead;
//! - `log_queue_binding` and `resource_queue_binding` bind the two worker
//!   queues for inbound traffic.
//!
//! The exchange channel and both bindings are created on first use and then
//! reused. Each gets its own channel; a binding's channel is never used for
//! publishing. Concurrent first callers share a single initialization.
//!
//! Publishing is fire-and-forget. Sequential publishes from one caller travel
//! over the one exchange channel in order; nothing is promised across
//! concurrent callers. Failures are returned as is, never retried here.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::connection::ConnectionManager;
use crate::correlation;
use crate::router::message::OutboundMessage;
use crate::router::topic::{Binding, IntoDeviceId, LOG_BINDING, RESOURCE_BINDING, TOPIC_EXCHANGE};
use crate::transport::{Channel, DeliveryStream};
use crate::utils::RouterError;

/// A worker queue bound to the topic exchange.
#[derive(Clone)]
pub struct QueueBinding {
    binding: Binding,
    channel: Arc<dyn Channel>,
}

impl QueueBinding {
    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    pub fn queue(&self) -> &str {
        self.binding.queue
    }

    /// Starts consuming the bound queue.
    pub async fn consume(&self) -> Result<DeliveryStream, RouterError> {
        self.channel.consume(self.binding.queue).await
    }
}

impl std::fmt::Debug for QueueBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueBinding")
            .field("binding", &self.binding)
            .finish()
    }
}

pub struct TopicRouter {
    connections: Arc<ConnectionManager>,
    log_payloads: bool,
    exchange: OnceCell<Arc<dyn Channel>>,
    log_binding: OnceCell<QueueBinding>,
    resource_binding: OnceCell<QueueBinding>,
}

impl TopicRouter {
    /// Payloads are logged at `info` when the settings name a production
    /// environment, at `debug` otherwise.
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        let log_payloads = connections.settings().is_production();
        Self {
            connections,
            log_payloads,
            exchange: OnceCell::new(),
            log_binding: OnceCell::new(),
            resource_binding: OnceCell::new(),
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Channel with the auto-deleting `amq.topic` exchange declared on it.
    pub async fn topic_exchange(&self) -> Result<Arc<dyn Channel>, RouterError> {
        let channel = self
            .exchange
            .get_or_try_init(|| async {
                let channel = self.connections.create_channel().await?;
                channel.declare_topic_exchange(TOPIC_EXCHANGE, true).await?;
                debug!(exchange = TOPIC_EXCHANGE, "topic exchange declared");
                Ok::<_, RouterError>(channel)
            })
            .await?;
        Ok(channel.clone())
    }

    /// `api_log_workers` bound to `bot.*.logs`.
    pub async fn log_queue_binding(&self) -> Result<QueueBinding, RouterError> {
        self.binding(&self.log_binding, LOG_BINDING).await
    }

    /// `resource_workers` bound to `bot.*.resources_v0.#`.
    pub async fn resource_queue_binding(&self) -> Result<QueueBinding, RouterError> {
        self.binding(&self.resource_binding, RESOURCE_BINDING).await
    }

    async fn binding(
        &self,
        cell: &OnceCell<QueueBinding>,
        binding: Binding,
    ) -> Result<QueueBinding, RouterError> {
        let bound = cell
            .get_or_try_init(|| async {
                let channel = self.connections.create_channel().await?;
                channel.declare_queue(binding.queue).await?;
                channel
                    .bind_queue(binding.queue, binding.exchange, binding.pattern)
                    .await?;
                info!(
                    queue = binding.queue,
                    exchange = binding.exchange,
                    pattern = binding.pattern,
                    "queue bound"
                );
                Ok::<_, RouterError>(QueueBinding {
                    binding: binding.clone(),
                    channel,
                })
            })
            .await?;
        Ok(bound.clone())
    }

    /// Publishes `payload` to `bot.device_<device_id>.<channel>`, stamped with
    /// the current request id.
    ///
    /// An unusable `device_id` fails with `RouterError::InvalidArgument`
    /// before anything touches the network.
    pub async fn publish<I: IntoDeviceId>(
        &self,
        payload: impl Into<Vec<u8>>,
        device_id: I,
        channel: &str,
    ) -> Result<(), RouterError> {
        let message = OutboundMessage::new(payload, device_id.into_device_id()?, channel);
        self.send(message, correlation::current_request_id()).await
    }

    /// Like `publish`, but stamped with the cascade id: the message is a
    /// side effect of a request that already got its primary reply.
    pub async fn publish_cascade<I: IntoDeviceId>(
        &self,
        payload: impl Into<Vec<u8>>,
        device_id: I,
        channel: &str,
    ) -> Result<(), RouterError> {
        let message = OutboundMessage::new(payload, device_id.into_device_id()?, channel);
        self.send(message, correlation::cascade_id()).await
    }

    async fn send(
        &self,
        message: OutboundMessage,
        correlation_id: String,
    ) -> Result<(), RouterError> {
        let routing_key = message.routing_key();
        if self.log_payloads {
            info!(
                routing_key = %routing_key,
                correlation_id = %correlation_id,
                payload = %String::from_utf8_lossy(&message.payload),
                "publishing"
            );
        } else {
            debug!(routing_key = %routing_key, correlation_id = %correlation_id, "publishing");
        }

        let exchange = self.topic_exchange().await?;
        exchange.publish(message.into_envelope(correlation_id)).await
    }
}
