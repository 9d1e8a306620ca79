//! Routing keys, device identifiers and wildcard bindings
//!
//! Routing keys are dot-separated segments. Outbound device traffic always
//! uses `bot.device_<id>.<channel>`, which is the format device firmware
//! subscribes to, so it must not change.
//!
//! Binding patterns follow topic-exchange rules: `*` matches exactly one
//! segment and `#` matches zero or more segments.

use std::fmt;

use serde_json::Value;

use crate::utils::RouterError;

/// Exchange every device message goes through.
pub const TOPIC_EXCHANGE: &str = "amq.topic";

/// Identifier of a remote device, rendered as-is inside routing keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceId {
    Name(String),
    Number(i128),
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Number(number) => write!(f, "{number}"),
        }
    }
}

/// Conversion into a `DeviceId`.
///
/// Strings and integers always convert. Dynamic values (`serde_json::Value`)
/// convert only when they hold a string or an integer; anything else is
/// rejected with `RouterError::InvalidArgument` instead of being coerced.
pub trait IntoDeviceId {
    fn into_device_id(self) -> Result<DeviceId, RouterError>;
}

impl IntoDeviceId for DeviceId {
    fn into_device_id(self) -> Result<DeviceId, RouterError> {
        Ok(self)
    }
}

impl IntoDeviceId for String {
    fn into_device_id(self) -> Result<DeviceId, RouterError> {
        Ok(DeviceId::Name(self))
    }
}

impl IntoDeviceId for &str {
    fn into_device_id(self) -> Result<DeviceId, RouterError> {
        Ok(DeviceId::Name(self.to_string()))
    }
}

impl IntoDeviceId for &String {
    fn into_device_id(self) -> Result<DeviceId, RouterError> {
        Ok(DeviceId::Name(self.clone()))
    }
}

macro_rules! integer_device_id {
    ($($ty:ty),*) => {
        $(
            impl IntoDeviceId for $ty {
                fn into_device_id(self) -> Result<DeviceId, RouterError> {
                    Ok(DeviceId::Number(i128::from(self)))
                }
            }
        )*
    };
}

integer_device_id!(i8, i16, i32, i64, u8, u16, u32, u64);

impl IntoDeviceId for usize {
    fn into_device_id(self) -> Result<DeviceId, RouterError> {
        // usize is at most 64 bits on every supported target.
        Ok(DeviceId::Number(self as i128))
    }
}

impl IntoDeviceId for &Value {
    fn into_device_id(self) -> Result<DeviceId, RouterError> {
        match self {
            Value::String(name) => Ok(DeviceId::Name(name.clone())),
            Value::Number(number) => number
                .as_i64()
                .map(i128::from)
                .or_else(|| number.as_u64().map(i128::from))
                .map(DeviceId::Number)
                .ok_or_else(|| bad_device_id(self)),
            other => Err(bad_device_id(other)),
        }
    }
}

impl IntoDeviceId for Value {
    fn into_device_id(self) -> Result<DeviceId, RouterError> {
        (&self).into_device_id()
    }
}

fn bad_device_id(value: &Value) -> RouterError {
    RouterError::InvalidArgument(format!(
        "device id must be a string or an integer, got `{value}`"
    ))
}

/// Builds `bot.device_<id>.<channel>`.
pub fn device_routing_key(device_id: &DeviceId, channel: &str) -> String {
    format!("bot.device_{device_id}.{channel}")
}

/// A topic-exchange binding pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    pattern: String,
}

impl TopicPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Whether `routing_key` would be delivered to a queue bound with this
    /// pattern.
    pub fn matches(&self, routing_key: &str) -> bool {
        let pattern: Vec<&str> = self.pattern.split('.').collect();
        let key: Vec<&str> = routing_key.split('.').collect();
        matches_segments(&pattern, &key)
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

fn matches_segments(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.split_first(), key.split_first()) {
        (None, None) => true,
        (Some((&"#", rest)), _) => {
            matches_segments(rest, key) || (!key.is_empty() && matches_segments(pattern, &key[1..]))
        }
        (Some((&"*", rest)), Some((_, key_rest))) => matches_segments(rest, key_rest),
        (Some((segment, rest)), Some((key_segment, key_rest))) if segment == key_segment => {
            matches_segments(rest, key_rest)
        }
        _ => false,
    }
}

/// A `(queue, exchange, pattern)` binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub queue: &'static str,
    pub exchange: &'static str,
    pub pattern: &'static str,
}

impl Binding {
    pub fn topic_pattern(&self) -> TopicPattern {
        TopicPattern::new(self.pattern)
    }
}

/// Device log lines from every bot.
pub const LOG_BINDING: Binding = Binding {
    queue: "api_log_workers",
    exchange: TOPIC_EXCHANGE,
    pattern: "bot.*.logs",
};

/// Resource-sync events (`resources_v0` and anything below it) from every bot.
pub const RESOURCE_BINDING: Binding = Binding {
    queue: "resource_workers",
    exchange: TOPIC_EXCHANGE,
    pattern: "bot.*.resources_v0.#",
};
