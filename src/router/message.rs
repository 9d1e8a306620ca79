//! Outbound device messages
//!
//! An `OutboundMessage` is a payload addressed to one logical channel of one
//! device. Its routing key is derived, never stored, so it always follows
//! the `bot.device_<id>.<channel>` format.

use crate::router::topic::{DeviceId, TOPIC_EXCHANGE, device_routing_key};
use crate::transport::Envelope;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub payload: Vec<u8>,
    pub device_id: DeviceId,
    pub channel: String,
}

impl OutboundMessage {
    pub fn new(
        payload: impl Into<Vec<u8>>,
        device_id: DeviceId,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            payload: payload.into(),
            device_id,
            channel: channel.into(),
        }
    }

    pub fn routing_key(&self) -> String {
        device_routing_key(&self.device_id, &self.channel)
    }

    /// Addresses the message to the topic exchange, stamped with
    /// `correlation_id`.
    pub fn into_envelope(self, correlation_id: String) -> Envelope {
        Envelope {
            exchange: TOPIC_EXCHANGE.to_string(),
            routing_key: self.routing_key(),
            payload: self.payload,
            correlation_id,
        }
    }
}
