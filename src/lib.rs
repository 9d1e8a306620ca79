//! # botroute
//!
//! `botroute` is the message layer between an API server and a fleet of
//! remote devices. Outbound messages are published to a topic exchange under
//! `bot.device_<id>.<channel>` routing keys; inbound device logs and resource
//! updates are collected through two wildcard-bound worker queues. Every
//! message carries the id of the request that produced it.
//!
//! ## Core Modules
//!
//! - `config`: Loads broker and application settings from `config/default.toml`
//!   and the environment, and resolves the broker endpoint URL.
//! - `connection`: The single, lazily opened broker connection.
//! - `router`: Routing keys, publishing and the worker queue bindings.
//! - `correlation`: Task-scoped request ids and cascade ids.
//! - `client`: The broker management API client (list and close connections).
//! - `transport`: The broker protocol seam, with MQTT and in-memory backends.
//! - `utils`: Shared error type and logging setup.

pub mod client;
pub mod config;
pub mod connection;
pub mod correlation;
pub mod router;
pub mod transport;
pub mod utils;

pub use client::ManagementClient;
pub use connection::ConnectionManager;
pub use router::TopicRouter;
pub use utils::RouterError;
