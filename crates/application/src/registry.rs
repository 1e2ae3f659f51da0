//! 进程内连接表
//!
//! 每条连接对应一个有界出站队列，发送一律是非阻塞入队：
//! 队列满则丢弃该连接的这一条事件，队列已关闭则视为无操作。
//! 一个慢连接不会拖住对其他连接的遍历。

use std::collections::HashMap;
use std::sync::Arc;

use domain::{ConnectionId, UserId};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

/// 已序列化的出站帧，扇出时共享同一份文本
pub type OutboundFrame = Arc<str>;

/// 单个连接的传输错误，只影响该连接
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
    #[error("outbound buffer of connection {0} is full")]
    Backpressure(ConnectionId),
}

/// 一次本地投递的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub dropped: usize,
}

impl DeliveryReport {
    fn record(&mut self, result: Result<(), TransportError>) {
        match result {
            Ok(()) => self.delivered += 1,
            Err(_) => self.dropped += 1,
        }
    }
}

struct ConnectionSlot {
    sender: mpsc::Sender<OutboundFrame>,
    user_id: Option<UserId>,
}

impl ConnectionSlot {
    fn try_send(&self, id: ConnectionId, frame: &OutboundFrame) -> Result<(), TransportError> {
        self.sender.try_send(frame.clone()).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                tracing::warn!(connection_id = %id, "出站队列已满，丢弃事件");
                TransportError::Backpressure(id)
            }
            mpsc::error::TrySendError::Closed(_) => {
                tracing::debug!(connection_id = %id, "连接已关闭，跳过投递");
                TransportError::Closed(id)
            }
        })
    }
}

/// 连接注册表
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, ConnectionSlot>>,
    buffer: usize,
}

impl ConnectionRegistry {
    pub fn new(buffer: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// 登记新连接，返回句柄和该连接的出站队列接收端
    pub async fn register(&self) -> (ConnectionId, mpsc::Receiver<OutboundFrame>) {
        let id = ConnectionId::generate();
        let (sender, receiver) = mpsc::channel(self.buffer);
        self.connections.write().await.insert(
            id,
            ConnectionSlot {
                sender,
                user_id: None,
            },
        );
        tracing::debug!(connection_id = %id, "连接已登记");
        (id, receiver)
    }

    /// 绑定身份，返回之前绑定的用户
    pub async fn bind(
        &self,
        id: ConnectionId,
        user_id: UserId,
    ) -> Result<Option<UserId>, TransportError> {
        let mut connections = self.connections.write().await;
        let slot = connections
            .get_mut(&id)
            .ok_or(TransportError::Closed(id))?;
        Ok(slot.user_id.replace(user_id))
    }

    /// 撤回绑定，连接仍保留在表中；返回之前绑定的用户
    pub async fn unbind(&self, id: ConnectionId) -> Option<UserId> {
        self.connections
            .write()
            .await
            .get_mut(&id)
            .and_then(|slot| slot.user_id.take())
    }

    /// 注销连接，返回其绑定的用户
    pub async fn unregister(&self, id: ConnectionId) -> Option<UserId> {
        let removed = self.connections.write().await.remove(&id);
        tracing::debug!(connection_id = %id, "连接已注销");
        removed.and_then(|slot| slot.user_id)
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    pub async fn bound_user(&self, id: ConnectionId) -> Option<UserId> {
        self.connections
            .read()
            .await
            .get(&id)
            .and_then(|slot| slot.user_id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// 投递给本进程所有连接
    pub async fn broadcast_local(&self, frame: &OutboundFrame) -> DeliveryReport {
        let connections = self.connections.read().await;
        let mut report = DeliveryReport::default();
        for (id, slot) in connections.iter() {
            report.record(slot.try_send(*id, frame));
        }
        report
    }

    /// 投递给单个连接；连接不存在时为无操作
    pub async fn send_local(&self, id: ConnectionId, frame: &OutboundFrame) -> DeliveryReport {
        let connections = self.connections.read().await;
        let mut report = DeliveryReport::default();
        if let Some(slot) = connections.get(&id) {
            report.record(slot.try_send(id, frame));
        }
        report
    }

    /// 只投递给绑定到指定用户的连接
    pub async fn send_to_users(&self, users: &[UserId], frame: &OutboundFrame) -> DeliveryReport {
        let connections = self.connections.read().await;
        let mut report = DeliveryReport::default();
        for (id, slot) in connections.iter() {
            match slot.user_id {
                Some(user_id) if users.contains(&user_id) => {
                    report.record(slot.try_send(*id, frame))
                }
                _ => {}
            }
        }
        report
    }
}
