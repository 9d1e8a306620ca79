//! The `router` module addresses messages to devices and binds the inbound
//! worker queues.
//!
//! - `topic`: device ids, routing keys, wildcard patterns and the well-known
//!   bindings.
//! - `message`: the outbound message type.
//! - `engine`: `TopicRouter`, which publishes to the topic exchange and hands
//!   out the memoized queue bindings.

pub mod engine;
pub mod message;
pub mod topic;

pub use engine::{QueueBinding, TopicRouter};
pub use message::OutboundMessage;
pub use topic::{
    Binding, DeviceId, IntoDeviceId, LOG_BINDING, RESOURCE_BINDING, TOPIC_EXCHANGE, TopicPattern,
    device_routing_key,
};

#[cfg(test)]
mod tests;
