//! The `connection` module owns the single broker connection of a process.
//!
//! `ConnectionManager` is built once with a transport and the loaded
//! settings and then shared (`Arc`) by everything that publishes or consumes.
//! The endpoint URL is resolved once; the connection is opened on first use
//! and reused afterwards. Concurrent first callers wait on the same connect
//! attempt instead of racing to open their own. A failed attempt leaves
//! nothing cached and is returned to the caller as is.

use std::sync::Arc;

use once_cell::sync::OnceCell as SyncOnceCell;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::{Endpoint, Settings};
use crate::transport::{Channel, Connection, ConnectionOptions, Transport};
use crate::utils::RouterError;

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    settings: Settings,
    options: ConnectionOptions,
    endpoint_url: SyncOnceCell<String>,
    connection: OnceCell<Arc<dyn Connection>>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, settings: Settings) -> Self {
        Self {
            transport,
            settings,
            options: ConnectionOptions::default(),
            endpoint_url: SyncOnceCell::new(),
            connection: OnceCell::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// The broker URL, resolved from the settings on first call.
    pub fn endpoint_url(&self) -> Result<&str, RouterError> {
        self.endpoint_url
            .get_or_try_init(|| self.settings.broker_url())
            .map(String::as_str)
    }

    /// The shared connection, opened on first call.
    pub async fn connection(&self) -> Result<Arc<dyn Connection>, RouterError> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                let url = self.endpoint_url()?;
                let redacted = Endpoint::parse(url)
                    .map(|e| e.redacted())
                    .unwrap_or_else(|_| "<unparsable>".to_string());
                info!(endpoint = %redacted, "opening broker connection");
                self.transport.connect(url, &self.options).await
            })
            .await?;
        Ok(connection.clone())
    }

    /// Opens a new channel on the shared connection.
    pub async fn create_channel(&self) -> Result<Arc<dyn Channel>, RouterError> {
        let channel = self.connection().await?.create_channel().await?;
        debug!("channel opened");
        Ok(channel)
    }
}
