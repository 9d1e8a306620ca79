//! Message shapes exchanged with a transport.
//!
//! `Envelope` is what the router hands to a channel when publishing;
//! `Delivery` is what a consumer of a bound queue receives.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    /// Current request id, or its cascade id for derived messages.
    pub correlation_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub routing_key: String,
    pub payload: Vec<u8>,
    /// Only transports that carry message metadata fill this in.
    pub correlation_id: Option<String>,
    /// Milliseconds since the UNIX epoch, set on receipt.
    pub received_at: i64,
}

impl Delivery {
    pub fn new(
        routing_key: impl Into<String>,
        payload: Vec<u8>,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload,
            correlation_id,
            received_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}
