//! Redis 发布任务
//!
//! 所有发布请求经同一个队列串行写出，保证本进程的发布顺序。

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::error::{RedisError, RedisResult};
use crate::retry::Backoff;

/// 单条消息的最大发布尝试次数
const MAX_PUBLISH_ATTEMPTS: u32 = 3;

pub(crate) enum Outbound {
    Publish { topic: String, payload: Vec<u8> },
    /// 队列中排在前面的消息都已处理完毕后应答
    Flush(oneshot::Sender<()>),
}

pub(crate) struct PublisherTask {
    client: Client,
    connection: Option<MultiplexedConnection>,
    backoff: Backoff,
}

impl PublisherTask {
    pub(crate) fn new(client: Client, connection: Option<MultiplexedConnection>, backoff: Backoff) -> Self {
        Self {
            client,
            connection,
            backoff,
        }
    }

    pub(crate) async fn run(mut self, mut queue: mpsc::Receiver<Outbound>) {
        while let Some(item) = queue.recv().await {
            match item {
                Outbound::Publish { topic, payload } => self.publish(&topic, &payload).await,
                Outbound::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        info!("Redis 发布任务已停止");
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) {
        for attempt in 1..=MAX_PUBLISH_ATTEMPTS {
            match self.try_publish(topic, payload).await {
                Ok(()) => {
                    debug!(topic = %topic, bytes = payload.len(), "已发布到 Redis");
                    return;
                }
                Err(err) => {
                    self.connection = None;
                    if attempt == MAX_PUBLISH_ATTEMPTS {
                        warn!(topic = %topic, error = %err, "Redis 发布失败，放弃该消息");
                        return;
                    }
                    sleep(self.backoff.delay_at(attempt)).await;
                }
            }
        }
    }

    async fn try_publish(&mut self, topic: &str, payload: &[u8]) -> RedisResult<()> {
        if self.connection.is_none() {
            self.connection = Some(self.client.get_multiplexed_async_connection().await?);
        }
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| RedisError::ConnectionError {
                message: "没有可用的连接".to_string(),
            })?;
        connection
            .publish::<_, _, ()>(topic, payload)
            .await
            .map_err(|e| RedisError::PublishError {
                message: e.to_string(),
            })
    }
}
