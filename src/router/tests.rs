use super::topic::{LOG_BINDING, RESOURCE_BINDING, TopicPattern};
use super::{DeviceId, IntoDeviceId, OutboundMessage, TopicRouter, device_routing_key};
use crate::config::{BrokerSettings, Settings};
use crate::connection::ConnectionManager;
use crate::correlation;
use crate::transport::InMemoryTransport;
use crate::utils::RouterError;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn settings() -> Settings {
    Settings {
        broker: BrokerSettings {
            rabbitmq_url: Some("amqp://admin:pw@localhost:5672".to_string()),
            ..BrokerSettings::default()
        },
        ..Settings::default()
    }
}

fn router_with(transport: &InMemoryTransport) -> TopicRouter {
    TopicRouter::new(Arc::new(ConnectionManager::new(
        Arc::new(transport.clone()),
        settings(),
    )))
}

#[test]
fn test_device_routing_key_format() {
    assert_eq!(
        device_routing_key(&DeviceId::Number(42), "from_api"),
        "bot.device_42.from_api"
    );
    assert_eq!(
        device_routing_key(&DeviceId::Name("abc".to_string()), "sync"),
        "bot.device_abc.sync"
    );
    let message = OutboundMessage::new("{}", 7u32.into_device_id().unwrap(), "logs");
    assert_eq!(message.routing_key(), "bot.device_7.logs");
}

#[test]
fn test_device_id_conversions() {
    assert_eq!("x".into_device_id().unwrap(), DeviceId::Name("x".to_string()));
    assert_eq!((-3i64).into_device_id().unwrap(), DeviceId::Number(-3));
    assert_eq!(u64::MAX.into_device_id().unwrap(), DeviceId::Number(u64::MAX as i128));
    assert_eq!(json!(12).into_device_id().unwrap(), DeviceId::Number(12));
    assert_eq!(
        json!("device").into_device_id().unwrap(),
        DeviceId::Name("device".to_string())
    );

    for bad in [json!(null), json!(true), json!(1.5), json!([1]), json!({"id": 1})] {
        assert!(
            matches!(bad.into_device_id(), Err(RouterError::InvalidArgument(_))),
            "should reject non string/integer ids"
        );
    }
}

#[test]
fn test_wildcard_patterns() {
    let logs = LOG_BINDING.topic_pattern();
    assert!(logs.matches("bot.device_1.logs"));
    assert!(logs.matches("bot.device_abc.logs"));
    assert!(!logs.matches("bot.logs"));
    assert!(!logs.matches("bot.device_1.extra.logs"));
    assert!(!logs.matches("bot.device_1.from_api"));

    let resources = RESOURCE_BINDING.topic_pattern();
    assert!(resources.matches("bot.device_1.resources_v0"));
    assert!(resources.matches("bot.device_1.resources_v0.Sequence"));
    assert!(resources.matches("bot.device_1.resources_v0.Sequence.12.uuid"));
    assert!(!resources.matches("bot.device_1.resources_v1.Sequence"));
    assert!(!resources.matches("bot.resources_v0.Sequence"));

    assert!(TopicPattern::new("#").matches("anything.at.all"));
    assert!(TopicPattern::new("a.#.z").matches("a.z"));
    assert!(TopicPattern::new("a.#.z").matches("a.b.c.z"));
    assert!(!TopicPattern::new("a.#.z").matches("a.b.c"));
}

#[tokio::test]
async fn test_publish_stamps_routing_key_and_request_id() {
    let transport = InMemoryTransport::new();
    let router = router_with(&transport);

    correlation::with_request_id("req-1", async {
        router.publish("{\"kind\":\"rpc_ok\"}", 42, "from_api").await.unwrap();
        router.publish("{}", "abc", "sync").await.unwrap();
    })
    .await;

    let published = transport.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].exchange, "amq.topic");
    assert_eq!(published[0].routing_key, "bot.device_42.from_api");
    assert_eq!(published[0].payload, b"{\"kind\":\"rpc_ok\"}".to_vec());
    assert_eq!(published[0].correlation_id, "req-1");
    assert_eq!(published[1].routing_key, "bot.device_abc.sync");
}

#[tokio::test]
async fn test_cascade_publish_is_marked() {
    let transport = InMemoryTransport::new();
    let router = router_with(&transport);

    correlation::with_request_id("req-2", async {
        router.publish("primary", 1, "from_api").await.unwrap();
        router.publish_cascade("derived", 1, "from_api").await.unwrap();
    })
    .await;
    router.publish("unscoped", 1, "from_api").await.unwrap();

    let ids: Vec<String> = transport
        .published()
        .into_iter()
        .map(|e| e.correlation_id)
        .collect();
    assert_eq!(ids, vec!["req-2", "cascade-req-2", "NONE"]);
}

#[tokio::test]
async fn test_invalid_device_id_touches_nothing() {
    let transport = InMemoryTransport::new();
    let router = router_with(&transport);

    let result = router.publish("{}", json!(2.5), "from_api").await;
    assert!(matches!(result, Err(RouterError::InvalidArgument(_))));

    let result = router.publish_cascade("{}", json!(null), "from_api").await;
    assert!(matches!(result, Err(RouterError::InvalidArgument(_))));

    let stats = transport.stats();
    assert_eq!(stats.connects, 0);
    assert_eq!(stats.channels, 0);
    assert_eq!(stats.publishes, 0);
}

#[tokio::test]
async fn test_publish_errors_propagate() {
    let transport = InMemoryTransport::new();
    let router = router_with(&transport);
    router.publish("{}", 1, "from_api").await.unwrap();

    transport.fail_publishes("channel closed");
    assert!(matches!(
        router.publish("{}", 1, "from_api").await,
        Err(RouterError::Transport(_))
    ));
    // No retry at this layer.
    assert_eq!(transport.stats().publishes, 2);
}

#[tokio::test]
async fn test_missing_broker_configuration_surfaces_on_publish() {
    let transport = InMemoryTransport::new();
    let router = TopicRouter::new(Arc::new(ConnectionManager::new(
        Arc::new(transport.clone()),
        Settings::default(),
    )));

    assert!(matches!(
        router.publish("{}", 1, "from_api").await,
        Err(RouterError::Configuration(_))
    ));
    assert_eq!(transport.stats().connects, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_use_creates_each_singleton_once() {
    let transport = InMemoryTransport::new().with_connect_delay(Duration::from_millis(50));
    let router = Arc::new(router_with(&transport));

    let mut handles = Vec::new();
    for i in 0..12 {
        let router = router.clone();
        handles.push(tokio::spawn(async move {
            match i % 3 {
                0 => router.topic_exchange().await.map(|_| ()),
                1 => router.log_queue_binding().await.map(|_| ()),
                _ => router.resource_queue_binding().await.map(|_| ()),
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stats = transport.stats();
    assert_eq!(stats.connects, 1);
    assert_eq!(stats.channels, 3);
    assert_eq!(stats.exchange_declarations, 1);
    assert_eq!(stats.queue_declarations, 2);
    assert_eq!(stats.bindings, 2);
}

#[tokio::test]
async fn test_log_binding_receives_device_logs_only() {
    let transport = InMemoryTransport::new();
    let router = router_with(&transport);

    let logs = router.log_queue_binding().await.unwrap();
    assert_eq!(logs.queue(), "api_log_workers");
    let mut rx = logs.consume().await.unwrap();

    correlation::with_request_id("req-3", async {
        router.publish("log line", 9, "logs").await.unwrap();
        router.publish("rpc", 9, "from_api").await.unwrap();
    })
    .await;

    let delivery = rx.recv().await.unwrap();
    assert_eq!(delivery.routing_key, "bot.device_9.logs");
    assert_eq!(delivery.payload_str(), "log line");
    assert_eq!(delivery.correlation_id.as_deref(), Some("req-3"));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_resource_binding_receives_nested_resource_keys() {
    let transport = InMemoryTransport::new();
    let router = router_with(&transport);

    let resources = router.resource_queue_binding().await.unwrap();
    let mut rx = resources.consume().await.unwrap();

    router.publish("{}", 5, "resources_v0.Sequence.12").await.unwrap();
    router.publish("{}", 5, "logs").await.unwrap();

    let delivery = rx.recv().await.unwrap();
    assert_eq!(delivery.routing_key, "bot.device_5.resources_v0.Sequence.12");
    assert!(rx.try_recv().is_err());

    // The binding is memoized, and its queue keeps a single consumer.
    let again = router.resource_queue_binding().await.unwrap();
    assert!(matches!(
        again.consume().await,
        Err(RouterError::Transport(_))
    ));
}

#[tokio::test]
async fn test_sequential_publishes_arrive_in_order() {
    let transport = InMemoryTransport::new();
    let router = router_with(&transport);
    let mut rx = router
        .log_queue_binding()
        .await
        .unwrap()
        .consume()
        .await
        .unwrap();

    for i in 0..20 {
        router.publish(format!("{i}"), 1, "logs").await.unwrap();
    }
    for i in 0..20 {
        assert_eq!(rx.recv().await.unwrap().payload_str(), i.to_string());
    }
}
