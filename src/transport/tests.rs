use super::mqtt::{
    QueueTable, correlation_id_of, correlation_properties, pattern_to_filter, routing_key_to_topic,
    shared_subscription, topic_to_routing_key,
};
use super::{ConnectionOptions, Envelope, InMemoryTransport, Transport};
use crate::utils::RouterError;
use std::time::Duration;

fn envelope(routing_key: &str, payload: &str) -> Envelope {
    Envelope {
        exchange: "amq.topic".to_string(),
        routing_key: routing_key.to_string(),
        payload: payload.as_bytes().to_vec(),
        correlation_id: "NONE".to_string(),
    }
}

#[test]
fn test_default_connection_options() {
    let options = ConnectionOptions::default();
    assert_eq!(options.read_timeout, Duration::from_secs(10));
    assert_eq!(options.heartbeat, Duration::from_secs(10));
    assert_eq!(options.log_level, tracing::Level::INFO);
}

#[test]
fn test_routing_key_topic_translation() {
    assert_eq!(routing_key_to_topic("bot.device_42.logs"), "bot/device_42/logs");
    assert_eq!(topic_to_routing_key("bot/device_42/logs"), "bot.device_42.logs");
}

#[test]
fn test_pattern_to_filter() {
    assert_eq!(pattern_to_filter("bot.*.logs").unwrap(), "bot/+/logs");
    assert_eq!(
        pattern_to_filter("bot.*.resources_v0.#").unwrap(),
        "bot/+/resources_v0/#"
    );
    assert!(matches!(
        pattern_to_filter("bot.#.logs"),
        Err(RouterError::Transport(_))
    ));
}

#[test]
fn test_shared_subscription_names_the_queue_group() {
    assert_eq!(
        shared_subscription("api_log_workers", "bot.*.logs").unwrap(),
        "$share/api_log_workers/bot/+/logs"
    );
    assert_eq!(
        shared_subscription("resource_workers", "bot.*.resources_v0.#").unwrap(),
        "$share/resource_workers/bot/+/resources_v0/#"
    );
    assert!(shared_subscription("a/b", "bot.*.logs").is_err());
    assert!(shared_subscription("", "bot.*.logs").is_err());
    assert!(shared_subscription("q", "bot.#.logs").is_err());
}

#[test]
fn test_correlation_id_travels_in_publish_properties() {
    let properties = correlation_properties("cascade-req-7");
    assert_eq!(correlation_id_of(Some(&properties)).as_deref(), Some("cascade-req-7"));
    assert_eq!(correlation_id_of(None), None);
    assert_eq!(correlation_id_of(Some(&Default::default())), None);
}

#[test]
fn test_mqtt_queue_buffers_until_consumed() {
    let mut table = QueueTable::default();
    table.declare("api_log_workers");
    assert!(table.bind("api_log_workers", "bot.*.logs").unwrap());

    let taken = table.dispatch("bot.device_3.logs", b"early".to_vec(), Some("req-1".into()));
    assert_eq!(taken, 1);

    let mut rx = table.consume("api_log_workers").unwrap();
    table.dispatch("bot.device_3.logs", b"late".to_vec(), None);

    let early = rx.try_recv().unwrap();
    assert_eq!(early.routing_key, "bot.device_3.logs");
    assert_eq!(early.payload_str(), "early");
    assert_eq!(early.correlation_id.as_deref(), Some("req-1"));

    let late = rx.try_recv().unwrap();
    assert_eq!(late.payload_str(), "late");
    assert_eq!(late.correlation_id, None);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_mqtt_queue_dispatch_follows_bindings() {
    let mut table = QueueTable::default();
    table.declare("api_log_workers");
    table.declare("resource_workers");
    table.declare("unbound");
    table.bind("api_log_workers", "bot.*.logs").unwrap();
    table.bind("resource_workers", "bot.*.resources_v0.#").unwrap();

    assert_eq!(table.dispatch("bot.device_1.logs", Vec::new(), None), 1);
    assert_eq!(table.dispatch("bot.device_1.resources_v0.Sequence.4", Vec::new(), None), 1);
    assert_eq!(table.dispatch("bot.device_1.from_api", Vec::new(), None), 0);

    let mut logs = table.consume("api_log_workers").unwrap();
    let mut resources = table.consume("resource_workers").unwrap();
    let mut unbound = table.consume("unbound").unwrap();
    assert_eq!(logs.try_recv().unwrap().routing_key, "bot.device_1.logs");
    assert!(logs.try_recv().is_err());
    assert_eq!(
        resources.try_recv().unwrap().routing_key,
        "bot.device_1.resources_v0.Sequence.4"
    );
    assert!(unbound.try_recv().is_err());
}

#[test]
fn test_mqtt_queue_rejects_unknown_queues_and_second_consumer() {
    let mut table = QueueTable::default();
    assert!(matches!(table.bind("missing", "bot.*.logs"), Err(RouterError::Transport(_))));

    table.declare("q");
    assert!(table.bind("q", "a.*").unwrap());
    assert!(!table.bind("q", "a.*").unwrap());

    let _rx = table.consume("q").unwrap();
    assert!(matches!(table.consume("q"), Err(RouterError::Transport(_))));
    assert!(matches!(table.consume("missing"), Err(RouterError::Transport(_))));
}

#[tokio::test]
async fn test_memory_routes_only_matching_keys() {
    let transport = InMemoryTransport::new();
    let connection = transport
        .connect("amqp://admin:pw@localhost:5672", &ConnectionOptions::default())
        .await
        .unwrap();
    let channel = connection.create_channel().await.unwrap();

    channel.declare_queue("logs").await.unwrap();
    channel
        .bind_queue("logs", "amq.topic", "bot.*.logs")
        .await
        .unwrap();
    let mut rx = channel.consume("logs").await.unwrap();

    channel
        .declare_topic_exchange("amq.topic", true)
        .await
        .unwrap();
    channel
        .publish(envelope("bot.device_1.from_api", "ignored"))
        .await
        .unwrap();
    channel
        .publish(envelope("bot.device_1.logs", "hello"))
        .await
        .unwrap();

    let delivery = rx.try_recv().unwrap();
    assert_eq!(delivery.routing_key, "bot.device_1.logs");
    assert_eq!(delivery.payload_str(), "hello");
    assert_eq!(delivery.correlation_id.as_deref(), Some("NONE"));
    assert!(rx.try_recv().is_err());

    let stats = transport.stats();
    assert_eq!(stats.connects, 1);
    assert_eq!(stats.channels, 1);
    assert_eq!(stats.publishes, 2);
    assert_eq!(transport.published().len(), 2);
}

#[tokio::test]
async fn test_memory_queue_buffers_until_consumed() {
    let transport = InMemoryTransport::new();
    let connection = transport
        .connect("amqp://localhost", &ConnectionOptions::default())
        .await
        .unwrap();
    let channel = connection.create_channel().await.unwrap();
    channel.declare_queue("q").await.unwrap();
    channel.bind_queue("q", "amq.topic", "#").await.unwrap();
    channel.publish(envelope("a.b", "early")).await.unwrap();

    let mut rx = channel.consume("q").await.unwrap();
    assert_eq!(rx.try_recv().unwrap().payload_str(), "early");
}

#[tokio::test]
async fn test_memory_single_consumer_per_queue() {
    let transport = InMemoryTransport::new();
    let connection = transport
        .connect("amqp://localhost", &ConnectionOptions::default())
        .await
        .unwrap();
    let channel = connection.create_channel().await.unwrap();
    channel.declare_queue("q").await.unwrap();

    let _rx = channel.consume("q").await.unwrap();
    assert!(matches!(
        channel.consume("q").await,
        Err(RouterError::Transport(_))
    ));
    assert!(matches!(
        channel.consume("unknown").await,
        Err(RouterError::Transport(_))
    ));
}

#[tokio::test]
async fn test_memory_publish_to_undeclared_exchange_fails() {
    let transport = InMemoryTransport::new();
    let connection = transport
        .connect("amqp://localhost", &ConnectionOptions::default())
        .await
        .unwrap();
    let channel = connection.create_channel().await.unwrap();
    let mut env = envelope("bot.device_1.logs", "x");
    env.exchange = "custom".to_string();

    assert!(matches!(
        channel.publish(env).await,
        Err(RouterError::Transport(_))
    ));
    assert!(transport.published().is_empty());
}

#[tokio::test]
async fn test_memory_fault_injection() {
    let transport = InMemoryTransport::new();
    transport.fail_connects("broker down");
    let result = transport
        .connect("amqp://localhost", &ConnectionOptions::default())
        .await;
    assert!(matches!(result, Err(RouterError::Transport(ref msg)) if msg.contains("broker down")));

    transport.clear_failures();
    let connection = transport
        .connect("amqp://localhost", &ConnectionOptions::default())
        .await
        .unwrap();
    let channel = connection.create_channel().await.unwrap();
    channel
        .declare_topic_exchange("amq.topic", true)
        .await
        .unwrap();

    transport.fail_publishes("channel closed");
    assert!(channel.publish(envelope("a", "b")).await.is_err());
    assert_eq!(transport.stats().connects, 2);
}
