//! Redis 订阅任务
//!
//! 维持一条 PubSub 连接，断开后按指数退避重连并重新订阅全部频道。
//! 连接状态同时决定总线是否可用。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use application::BusMessageHandler;
use futures_util::stream::StreamExt;
use redis::aio::PubSub;
use redis::Client;
use tokio::sync::{Notify, RwLock};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::error::{RedisError, RedisResult};
use crate::retry::Backoff;

pub(crate) type HandlerMap = Arc<RwLock<HashMap<String, Vec<Arc<dyn BusMessageHandler>>>>>;

pub(crate) struct SubscriberTask {
    pub(crate) client: Client,
    pub(crate) handlers: HandlerMap,
    pub(crate) topics_changed: Arc<Notify>,
    pub(crate) available: Arc<AtomicBool>,
    pub(crate) backoff: Backoff,
}

impl SubscriberTask {
    pub(crate) async fn run(self) {
        let mut failures = 0u32;
        loop {
            match self.listen(&mut failures).await {
                Ok(()) => info!("Redis 订阅连接已关闭"),
                Err(err) => warn!(error = %err, "Redis 订阅连接失败"),
            }
            if self.available.swap(false, Ordering::SeqCst) {
                warn!("Redis 不可用，降级为仅本地投递");
            }

            failures = failures.saturating_add(1);
            let delay = self.backoff.delay_at(failures);
            debug!(attempt = failures, delay_ms = delay.as_millis() as u64, "等待重连 Redis");
            sleep(delay).await;
        }
    }

    async fn listen(&self, failures: &mut u32) -> RedisResult<()> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        let mut subscribed = HashSet::new();

        loop {
            self.subscribe_new(&mut pubsub, &mut subscribed).await?;
            if !self.available.swap(true, Ordering::SeqCst) {
                info!(topics = subscribed.len(), "Redis 订阅已建立，恢复跨进程投递");
            }
            *failures = 0;

            let mut stream = pubsub.on_message();
            loop {
                tokio::select! {
                    message = stream.next() => match message {
                        Some(message) => self.dispatch(message).await,
                        None => return Ok(()),
                    },
                    _ = self.topics_changed.notified() => break,
                }
            }
        }
    }

    async fn subscribe_new(
        &self,
        pubsub: &mut PubSub,
        subscribed: &mut HashSet<String>,
    ) -> RedisResult<()> {
        let topics: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        for topic in topics {
            if subscribed.contains(&topic) {
                continue;
            }
            pubsub
                .subscribe(&topic)
                .await
                .map_err(|e| RedisError::SubscribeError {
                    message: format!("订阅频道 {} 失败: {}", topic, e),
                })?;
            info!(topic = %topic, "已订阅 Redis 频道");
            subscribed.insert(topic);
        }
        Ok(())
    }

    async fn dispatch(&self, message: redis::Msg) {
        let topic = message.get_channel_name();
        let handlers = {
            let handlers = self.handlers.read().await;
            handlers.get(topic).cloned().unwrap_or_default()
        };
        for handler in handlers {
            handler
                .handle_message(topic, message.get_payload_bytes())
                .await;
        }
    }
}
