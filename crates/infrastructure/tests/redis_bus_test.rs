//! Redis 事件总线集成测试
//!
//! 需要本地 Redis，设置 REDIS_INTEGRATION_TEST 后运行。

use std::sync::Arc;
use std::time::Duration;

use application::{EventBus, RelayHub, RelaySettings};
use chrono::Utc;
use config::RedisConfig;
use domain::{ChatMessage, DomainEvent, InstanceId, MessageId, ServerFrame, UserId};
use infrastructure::RedisEventBus;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn test_config() -> RedisConfig {
    RedisConfig {
        url: Some(redis_url()),
        channel_prefix: format!("relay-test-{}:", Utc::now().timestamp_nanos_opt().unwrap_or_default()),
        reconnect_base_ms: 50,
        reconnect_max_ms: 500,
        ..RedisConfig::default()
    }
}

async fn process(name: &str, config: &RedisConfig) -> (Arc<RelayHub>, Arc<RedisEventBus>) {
    let bus = Arc::new(RedisEventBus::connect(&redis_url(), config).await.unwrap());
    let mut settings = RelaySettings::new(InstanceId::parse(name).unwrap());
    settings.topic_prefix = config.channel_prefix.clone();
    let hub = Arc::new(RelayHub::new(settings, bus.clone() as Arc<dyn EventBus>));
    hub.start().await.unwrap();
    (hub, bus)
}

#[tokio::test]
async fn events_cross_processes_through_redis() {
    if std::env::var("REDIS_INTEGRATION_TEST").is_err() {
        return;
    }

    let config = test_config();
    let (p1, bus1) = process("p1", &config).await;
    let (p2, _bus2) = process("p2", &config).await;
    assert!(bus1.is_available());

    // 等待订阅连接建立
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut remote = p2.connect().await;
    let mut rx = remote.take_receiver().unwrap();
    let initial = rx.recv().await.unwrap();
    assert!(initial.contains("online-users"));

    p1.publish(DomainEvent::MessageCreated {
        message: ChatMessage {
            id: MessageId(10),
            user_id: UserId(7),
            display_name: "Ana".into(),
            text: "hi".into(),
            sent_at: Utc::now(),
            edited_at: None,
        },
    })
    .await;
    assert!(bus1.flush(Duration::from_secs(2)).await);

    let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let frame: ServerFrame = serde_json::from_str(&frame).unwrap();
    assert_eq!(frame.event, "new-message");
    assert_eq!(frame.data["id"], 10);
}

#[tokio::test]
async fn own_events_are_not_delivered_twice() {
    if std::env::var("REDIS_INTEGRATION_TEST").is_err() {
        return;
    }

    let config = test_config();
    let (p1, bus1) = process("p1", &config).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut local = p1.connect().await;
    let mut rx = local.take_receiver().unwrap();
    rx.recv().await.unwrap();

    p1.publish(DomainEvent::MessageDeleted { id: MessageId(3) })
        .await;
    assert!(bus1.flush(Duration::from_secs(2)).await);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
}
