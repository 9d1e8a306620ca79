//! The `transport` module is the seam between the router and the broker wire
//! protocol.
//!
//! A `Transport` opens a `Connection`; a connection hands out `Channel`s; a
//! channel declares exchanges and queues, binds queues to wildcard patterns,
//! publishes envelopes and starts consumers. Two implementations exist:
//!
//! - `mqtt::MqttTransport` talks to a broker whose MQTT adapter feeds the
//!   `amq.topic` exchange (production).
//! - `memory::InMemoryTransport` keeps a topic exchange in process, counts
//!   every call and can inject failures (tests and local runs).

pub mod memory;
pub mod message;
pub mod mqtt;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::Level;

use crate::utils::RouterError;

pub use memory::{InMemoryTransport, TransportStats};
pub use message::{Delivery, Envelope};
pub use mqtt::MqttTransport;

/// Stream of messages from one bound queue.
pub type DeliveryStream = UnboundedReceiver<Delivery>;

/// Fixed protocol options applied when the shared connection is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub read_timeout: Duration,
    pub heartbeat: Duration,
    pub log_level: Level,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(10),
            heartbeat: Duration::from_secs(10),
            log_level: Level::INFO,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a physical connection to the broker at `url`.
    async fn connect(
        &self,
        url: &str,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn Connection>, RouterError>;
}

#[async_trait]
pub trait Connection: Send + Sync {
    async fn create_channel(&self) -> Result<Arc<dyn Channel>, RouterError>;
}

#[async_trait]
pub trait Channel: Send + Sync {
    async fn declare_topic_exchange(&self, name: &str, auto_delete: bool)
    -> Result<(), RouterError>;

    async fn declare_queue(&self, queue: &str) -> Result<(), RouterError>;

    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str)
    -> Result<(), RouterError>;

    /// Fire-and-forget publish; no broker acknowledgement is awaited.
    async fn publish(&self, envelope: Envelope) -> Result<(), RouterError>;

    /// Starts consuming `queue`. Each queue has at most one consumer.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream, RouterError>;
}

#[cfg(test)]
mod tests;
