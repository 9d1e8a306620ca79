//! In-process topic exchange
//!
//! `InMemoryTransport` implements the same interface as the network
//! transport, routing published envelopes to bound queues with the usual
//! `*`/`#` rules. It also records every call so tests can assert on how often
//! the router connected, opened channels or published, and it can be told to
//! fail connects or publishes.
//!
//! Clones share the same broker state.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use super::{Channel, Connection, ConnectionOptions, Delivery, DeliveryStream, Envelope, Transport};
use crate::router::topic::TopicPattern;
use crate::utils::RouterError;

/// Call counters, one per transport operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransportStats {
    pub connects: usize,
    pub channels: usize,
    pub exchange_declarations: usize,
    pub queue_declarations: usize,
    pub bindings: usize,
    pub publishes: usize,
    pub consumers: usize,
}

#[derive(Debug)]
struct QueueState {
    bindings: Vec<(String, TopicPattern)>,
    sender: UnboundedSender<Delivery>,
    receiver: Option<UnboundedReceiver<Delivery>>,
}

impl QueueState {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            bindings: Vec::new(),
            sender,
            receiver: Some(receiver),
        }
    }

    fn accepts(&self, exchange: &str, routing_key: &str) -> bool {
        self.bindings
            .iter()
            .any(|(bound, pattern)| bound == exchange && pattern.matches(routing_key))
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashSet<String>,
    queues: HashMap<String, QueueState>,
    published: Vec<Envelope>,
    stats: TransportStats,
    connect_failure: Option<String>,
    publish_failure: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    state: Arc<Mutex<BrokerState>>,
    connect_delay: Option<Duration>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every connect wait before completing, which widens the window in
    /// which concurrent first callers overlap.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn stats(&self) -> TransportStats {
        self.state.lock().map(|s| s.stats).unwrap_or_default()
    }

    /// Every envelope accepted so far, in publish order.
    pub fn published(&self) -> Vec<Envelope> {
        self.state
            .lock()
            .map(|s| s.published.clone())
            .unwrap_or_default()
    }

    pub fn fail_connects(&self, reason: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.connect_failure = Some(reason.into());
        }
    }

    pub fn fail_publishes(&self, reason: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.publish_failure = Some(reason.into());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.connect_failure = None;
            state.publish_failure = None;
        }
    }
}

fn lock(state: &Mutex<BrokerState>) -> Result<MutexGuard<'_, BrokerState>, RouterError> {
    state
        .lock()
        .map_err(|_| RouterError::Transport("in-memory broker state poisoned".to_string()))
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(
        &self,
        url: &str,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn Connection>, RouterError> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state)?;
        state.stats.connects += 1;
        if let Some(reason) = &state.connect_failure {
            return Err(RouterError::Transport(format!("connect refused: {reason}")));
        }
        debug!(url, heartbeat = ?options.heartbeat, "in-memory connection opened");

        Ok(Arc::new(MemoryConnection {
            state: self.state.clone(),
        }))
    }
}

struct MemoryConnection {
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn create_channel(&self) -> Result<Arc<dyn Channel>, RouterError> {
        lock(&self.state)?.stats.channels += 1;
        Ok(Arc::new(MemoryChannel {
            state: self.state.clone(),
        }))
    }
}

struct MemoryChannel {
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_topic_exchange(
        &self,
        name: &str,
        _auto_delete: bool,
    ) -> Result<(), RouterError> {
        let mut state = lock(&self.state)?;
        state.stats.exchange_declarations += 1;
        state.exchanges.insert(name.to_string());
        Ok(())
    }

    async fn declare_queue(&self, queue: &str) -> Result<(), RouterError> {
        let mut state = lock(&self.state)?;
        state.stats.queue_declarations += 1;
        state
            .queues
            .entry(queue.to_string())
            .or_insert_with(QueueState::new);
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        pattern: &str,
    ) -> Result<(), RouterError> {
        let mut state = lock(&self.state)?;
        state.stats.bindings += 1;
        // The broker creates amq.* exchanges itself.
        if exchange.starts_with("amq.") {
            state.exchanges.insert(exchange.to_string());
        }
        if !state.exchanges.contains(exchange) {
            return Err(RouterError::Transport(format!(
                "no exchange '{exchange}' to bind queue '{queue}' to"
            )));
        }
        let queue_state = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| RouterError::Transport(format!("no queue '{queue}'")))?;
        let binding = (exchange.to_string(), TopicPattern::new(pattern));
        if !queue_state.bindings.contains(&binding) {
            queue_state.bindings.push(binding);
        }
        Ok(())
    }

    async fn publish(&self, envelope: Envelope) -> Result<(), RouterError> {
        let mut state = lock(&self.state)?;
        state.stats.publishes += 1;
        if let Some(reason) = &state.publish_failure {
            return Err(RouterError::Transport(format!("publish failed: {reason}")));
        }
        if !state.exchanges.contains(&envelope.exchange) {
            return Err(RouterError::Transport(format!(
                "no exchange '{}'",
                envelope.exchange
            )));
        }

        for (name, queue) in &state.queues {
            if queue.accepts(&envelope.exchange, &envelope.routing_key) {
                let delivery = Delivery::new(
                    envelope.routing_key.clone(),
                    envelope.payload.clone(),
                    Some(envelope.correlation_id.clone()),
                );
                if queue.sender.send(delivery).is_err() {
                    debug!(queue = %name, "consumer gone, dropping delivery");
                }
            }
        }
        state.published.push(envelope);
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, RouterError> {
        let mut state = lock(&self.state)?;
        let receiver = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| RouterError::Transport(format!("no queue '{queue}'")))?
            .receiver
            .take()
            .ok_or_else(|| {
                RouterError::Transport(format!("queue '{queue}' already has a consumer"))
            })?;
        state.stats.consumers += 1;
        Ok(receiver)
    }
}
