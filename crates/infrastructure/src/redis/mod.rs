//! 基于 Redis Pub/Sub 的事件总线
//!
//! 发布走有界队列由后台任务写出，`publish` 不等待 Redis 应答；
//! 订阅由另一个后台任务维持，断线期间总线报告不可用，事件只在本地投递。

pub mod error;
mod publisher;
mod subscriber;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use application::{BusError, BusMessageHandler, EventBus};
use async_trait::async_trait;
use config::RedisConfig;
use redis::Client;
use tokio::sync::{mpsc, oneshot, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use error::{RedisError, RedisResult};
use publisher::{Outbound, PublisherTask};
use subscriber::{HandlerMap, SubscriberTask};

use crate::retry::{retry_async, Backoff, RetryConfig};

/// 启动时探测连接的尝试次数
const STARTUP_CONNECT_ATTEMPTS: u32 = 2;

pub struct RedisEventBus {
    outbound: mpsc::Sender<Outbound>,
    available: Arc<AtomicBool>,
    handlers: HandlerMap,
    topics_changed: Arc<Notify>,
    tasks: Vec<JoinHandle<()>>,
}

impl RedisEventBus {
    /// 创建总线并启动后台任务
    ///
    /// 只有 URL 无效才返回错误；Redis 暂时连不上时以降级模式返回，后台继续重连。
    pub async fn connect(url: &str, config: &RedisConfig) -> RedisResult<Self> {
        let client = Client::open(url)?;
        let backoff = Backoff::exponential(config.reconnect_base(), config.reconnect_max());
        let available = Arc::new(AtomicBool::new(false));

        let startup_retry = RetryConfig {
            max_attempts: STARTUP_CONNECT_ATTEMPTS,
            backoff: backoff.clone(),
        };
        let connection = match retry_async(&startup_retry, || {
            let client = client.clone();
            async move {
                let mut connection = client.get_multiplexed_async_connection().await?;
                let _: String = redis::cmd("PING").query_async(&mut connection).await?;
                Ok::<_, RedisError>(connection)
            }
        })
        .await
        {
            Ok(connection) => {
                available.store(true, Ordering::SeqCst);
                info!("已连接 Redis 事件总线");
                Some(connection)
            }
            Err(err) => {
                warn!(error = %err, "Redis 不可用，以单进程模式启动，后台继续重连");
                None
            }
        };

        let (outbound, queue) = mpsc::channel(config.publish_queue.max(1));
        let handlers: HandlerMap = Arc::new(RwLock::new(HashMap::new()));
        let topics_changed = Arc::new(Notify::new());

        let publisher = PublisherTask::new(client.clone(), connection, backoff.clone());
        let subscriber = SubscriberTask {
            client,
            handlers: handlers.clone(),
            topics_changed: topics_changed.clone(),
            available: available.clone(),
            backoff,
        };
        let tasks = vec![
            tokio::spawn(publisher.run(queue)),
            tokio::spawn(subscriber.run()),
        ];

        Ok(Self {
            outbound,
            available,
            handlers,
            topics_changed,
            tasks,
        })
    }

    /// 等待已入队的消息全部写出
    pub async fn flush(&self, timeout: Duration) -> bool {
        let (done, wait) = oneshot::channel();
        if self.outbound.send(Outbound::Flush(done)).await.is_err() {
            return false;
        }
        matches!(tokio::time::timeout(timeout, wait).await, Ok(Ok(())))
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        if !self.is_available() {
            return Err(BusError::unavailable("redis disconnected"));
        }
        self.outbound
            .try_send(Outbound::Publish {
                topic: topic.to_string(),
                payload,
            })
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => {
                    BusError::Publish("publish queue is full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    BusError::unavailable("publisher task stopped")
                }
            })
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn BusMessageHandler>,
    ) -> Result<(), BusError> {
        self.handlers
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .push(handler);
        self.topics_changed.notify_one();
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

impl Drop for RedisEventBus {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> RedisConfig {
        RedisConfig {
            reconnect_base_ms: 5,
            reconnect_max_ms: 10,
            ..RedisConfig::default()
        }
    }

    #[tokio::test]
    async fn invalid_url_is_rejected() {
        let result = RedisEventBus::connect("definitely not a url", &unreachable_config()).await;
        assert!(matches!(result, Err(RedisError::ConfigError { .. })));
    }

    #[tokio::test]
    async fn unreachable_redis_starts_degraded() {
        let bus = RedisEventBus::connect("redis://127.0.0.1:1/", &unreachable_config())
            .await
            .unwrap();
        assert!(!bus.is_available());
        assert!(matches!(
            bus.publish("relay:messages", b"x".to_vec()).await,
            Err(BusError::Unavailable(_))
        ));
    }
}
