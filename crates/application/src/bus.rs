//! 事件总线抽象
//!
//! 总线只搬运字节：路由器把领域事件包成 [`BusEnvelope`]（带来源进程标识）再发布，
//! 收到后按来源丢弃本进程自己发出的事件。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{DomainEvent, InstanceId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 总线错误
#[derive(Debug, Error)]
pub enum BusError {
    #[error("event bus unavailable: {0}")]
    Unavailable(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BusError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

/// 总线上传输的事件信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEnvelope {
    /// 发布进程，只用于回环抑制
    pub origin: InstanceId,
    pub published_at: DateTime<Utc>,
    pub event: DomainEvent,
}

impl BusEnvelope {
    pub fn new(origin: InstanceId, event: DomainEvent) -> Self {
        Self {
            origin,
            published_at: Utc::now(),
            event,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, BusError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, BusError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// 订阅回调
#[async_trait]
pub trait BusMessageHandler: Send + Sync {
    async fn handle_message(&self, topic: &str, payload: &[u8]);
}

/// 发布订阅骨干网的适配接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventBus: Send + Sync {
    /// 发布后立即返回，不等待远端确认
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn BusMessageHandler>,
    ) -> Result<(), BusError>;

    /// 当前是否能进行跨进程投递
    fn is_available(&self) -> bool;
}

/// 内存实现的事件总线（用于单机模式和测试）
///
/// 同一个 [`memory::InMemoryBusHub`] 上连接出的多个总线互相可见，
/// 可以模拟多进程部署。
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use tokio::sync::RwLock;

    struct HubInner {
        subscribers: RwLock<HashMap<String, Vec<Arc<dyn BusMessageHandler>>>>,
        available: AtomicBool,
        published: AtomicU64,
    }

    #[derive(Clone)]
    pub struct InMemoryBusHub {
        inner: Arc<HubInner>,
    }

    impl Default for InMemoryBusHub {
        fn default() -> Self {
            Self::new()
        }
    }

    impl InMemoryBusHub {
        pub fn new() -> Self {
            Self {
                inner: Arc::new(HubInner {
                    subscribers: RwLock::new(HashMap::new()),
                    available: AtomicBool::new(true),
                    published: AtomicU64::new(0),
                }),
            }
        }

        /// 为一个进程创建总线端点
        pub fn connect(&self) -> InMemoryEventBus {
            InMemoryEventBus { hub: self.clone() }
        }

        /// 模拟骨干网故障或恢复
        pub fn set_available(&self, available: bool) {
            self.inner.available.store(available, Ordering::Relaxed);
        }

        /// 成功发布的消息总数
        pub fn published_count(&self) -> u64 {
            self.inner.published.load(Ordering::Relaxed)
        }
    }

    pub struct InMemoryEventBus {
        hub: InMemoryBusHub,
    }

    impl InMemoryEventBus {
        /// 单进程使用的独立总线
        pub fn standalone() -> Self {
            InMemoryBusHub::new().connect()
        }

        pub fn hub(&self) -> &InMemoryBusHub {
            &self.hub
        }
    }

    #[async_trait]
    impl EventBus for InMemoryEventBus {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
            if !self.is_available() {
                return Err(BusError::unavailable("in-memory bus is offline"));
            }
            self.hub.inner.published.fetch_add(1, Ordering::Relaxed);

            let handlers = {
                let subscribers = self.hub.inner.subscribers.read().await;
                subscribers.get(topic).cloned().unwrap_or_default()
            };
            for handler in handlers {
                handler.handle_message(topic, &payload).await;
            }
            Ok(())
        }

        async fn subscribe(
            &self,
            topic: &str,
            handler: Arc<dyn BusMessageHandler>,
        ) -> Result<(), BusError> {
            self.hub
                .inner
                .subscribers
                .write()
                .await
                .entry(topic.to_string())
                .or_default()
                .push(handler);
            Ok(())
        }

        fn is_available(&self) -> bool {
            self.hub.inner.available.load(Ordering::Relaxed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryBusHub;
    use super::*;
    use domain::MessageId;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl BusMessageHandler for Recorder {
        async fn handle_message(&self, topic: &str, payload: &[u8]) {
            self.seen
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_vec()));
        }
    }

    #[test]
    fn envelope_carries_origin() {
        let origin = InstanceId::parse("node-a").unwrap();
        let envelope = BusEnvelope::new(
            origin.clone(),
            DomainEvent::MessageDeleted { id: MessageId(10) },
        );
        let decoded = BusEnvelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded.origin, origin);
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn malformed_payload_is_serialization_error() {
        assert!(matches!(
            BusEnvelope::decode(b"{not json"),
            Err(BusError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn memory_bus_fans_out_per_topic() {
        let hub = InMemoryBusHub::new();
        let a = hub.connect();
        let b = hub.connect();
        let recorder = Arc::new(Recorder::default());
        b.subscribe("relay:messages", recorder.clone()).await.unwrap();

        a.publish("relay:messages", b"one".to_vec()).await.unwrap();
        a.publish("relay:presence", b"two".to_vec()).await.unwrap();

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![("relay:messages".to_string(), b"one".to_vec())]);
        assert_eq!(hub.published_count(), 2);
    }

    #[tokio::test]
    async fn offline_memory_bus_reports_unavailable() {
        let hub = InMemoryBusHub::new();
        let bus = hub.connect();
        hub.set_available(false);
        assert!(!bus.is_available());
        assert!(matches!(
            bus.publish("t", vec![]).await,
            Err(BusError::Unavailable(_))
        ));
    }
}
