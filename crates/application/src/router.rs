//! 事件路由器
//!
//! `publish` 的顺序固定为：序列化 -> 本地投递 -> 发布到总线。
//! 从总线收到的事件只做本地投递，从不再次发布。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use domain::{
    ConnectionId, DomainEvent, EventCategory, EventScope, InstanceId, PresenceEntry,
};
use tokio::sync::Mutex;

use crate::bus::{BusEnvelope, BusError, BusMessageHandler, EventBus};
use crate::cluster::ClusterView;
use crate::registry::{ConnectionRegistry, DeliveryReport, OutboundFrame};

pub struct EventRouter {
    instance_id: InstanceId,
    topic_prefix: String,
    registry: Arc<ConnectionRegistry>,
    bus: Arc<dyn EventBus>,
    cluster: Mutex<ClusterView>,
}

impl EventRouter {
    pub fn new(
        instance_id: InstanceId,
        topic_prefix: impl Into<String>,
        registry: Arc<ConnectionRegistry>,
        bus: Arc<dyn EventBus>,
        presence_ttl: Duration,
    ) -> Self {
        Self {
            instance_id,
            topic_prefix: topic_prefix.into(),
            registry,
            bus,
            cluster: Mutex::new(ClusterView::new(presence_ttl)),
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn topic(&self, category: EventCategory) -> String {
        category.topic(&self.topic_prefix)
    }

    pub fn bus_available(&self) -> bool {
        self.bus.is_available()
    }

    /// 订阅所有事件类别的频道
    pub async fn subscribe_to_bus(self: &Arc<Self>) -> Result<(), BusError> {
        for category in EventCategory::ALL {
            let topic = self.topic(category);
            self.bus
                .subscribe(&topic, self.clone() as Arc<dyn BusMessageHandler>)
                .await?;
            tracing::info!(topic = %topic, instance_id = %self.instance_id, "已订阅总线频道");
        }
        Ok(())
    }

    /// 发布一条已持久化的领域事件
    ///
    /// 总线失败只记录日志，不影响本地投递，也不向调用方传播。
    pub async fn publish(&self, event: DomainEvent) -> DeliveryReport {
        if let DomainEvent::PresenceChanged { roster } = event {
            return self.publish_presence(roster).await;
        }

        let frame = match encode_frame(&event) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(event = event.wire_name(), error = %err, "事件序列化失败，已丢弃");
                return DeliveryReport::default();
            }
        };

        let report = self.deliver_local(&event, &frame).await;
        tracing::debug!(
            event = event.wire_name(),
            delivered = report.delivered,
            dropped = report.dropped,
            "本地投递完成"
        );
        self.publish_to_bus(event).await;
        report
    }

    /// 本进程名单变化：本地下发合并视图，总线上只发布本进程的权威名单
    pub async fn publish_presence(&self, local: Vec<PresenceEntry>) -> DeliveryReport {
        let report = {
            let mut cluster = self.cluster.lock().await;
            cluster.set_local(local.clone());
            self.broadcast_roster(cluster.merged()).await
        };
        self.publish_to_bus(DomainEvent::PresenceChanged { roster: local })
            .await;
        report
    }

    /// 定时重发本进程名单，维持远端缓存不过期
    pub async fn republish_presence(&self, local: Vec<PresenceEntry>) {
        self.cluster.lock().await.set_local(local.clone());
        self.publish_to_bus(DomainEvent::PresenceChanged { roster: local })
            .await;
    }

    /// 清理过期的远端快照，变化时重新下发
    pub async fn expire_remote_presence(&self) -> bool {
        let mut cluster = self.cluster.lock().await;
        let changed = cluster.expire(Instant::now());
        if changed {
            self.broadcast_roster(cluster.merged()).await;
        }
        changed
    }

    /// 当前客户端可见的在线名单（集群合并视图）
    pub async fn online_users(&self) -> Vec<PresenceEntry> {
        self.cluster.lock().await.merged()
    }

    /// 向新连接发送当前名单
    pub async fn send_online_users(&self, id: ConnectionId) -> DeliveryReport {
        let cluster = self.cluster.lock().await;
        let event = DomainEvent::PresenceChanged {
            roster: cluster.merged(),
        };
        match encode_frame(&event) {
            Ok(frame) => self.registry.send_local(id, &frame).await,
            Err(err) => {
                tracing::error!(connection_id = %id, error = %err, "在线名单序列化失败");
                DeliveryReport::default()
            }
        }
    }

    /// 处理来自其他进程的事件，只做本地投递
    pub async fn deliver_remote(&self, envelope: BusEnvelope) -> DeliveryReport {
        let BusEnvelope { origin, event, .. } = envelope;

        if let DomainEvent::PresenceChanged { roster } = event {
            let mut cluster = self.cluster.lock().await;
            if cluster.apply_remote(origin.clone(), roster, Instant::now()) {
                tracing::debug!(origin = %origin, "远端在线名单变化");
                return self.broadcast_roster(cluster.merged()).await;
            }
            return DeliveryReport::default();
        }

        match encode_frame(&event) {
            Ok(frame) => self.deliver_local(&event, &frame).await,
            Err(err) => {
                tracing::warn!(origin = %origin, error = %err, "远端事件序列化失败，已丢弃");
                DeliveryReport::default()
            }
        }
    }

    async fn deliver_local(&self, event: &DomainEvent, frame: &OutboundFrame) -> DeliveryReport {
        match event.scope() {
            EventScope::Group => self.registry.broadcast_local(frame).await,
            EventScope::Private(participants) => {
                self.registry
                    .send_to_users(&participants.as_array(), frame)
                    .await
            }
        }
    }

    async fn broadcast_roster(&self, roster: Vec<PresenceEntry>) -> DeliveryReport {
        let event = DomainEvent::PresenceChanged { roster };
        match encode_frame(&event) {
            Ok(frame) => self.registry.broadcast_local(&frame).await,
            Err(err) => {
                tracing::error!(error = %err, "在线名单序列化失败");
                DeliveryReport::default()
            }
        }
    }

    async fn publish_to_bus(&self, event: DomainEvent) {
        let topic = self.topic(event.category());
        let payload = match BusEnvelope::new(self.instance_id.clone(), event).encode() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(topic = %topic, error = %err, "总线消息序列化失败");
                return;
            }
        };

        match self.bus.publish(&topic, payload).await {
            Ok(()) => {}
            Err(BusError::Unavailable(reason)) => {
                tracing::debug!(topic = %topic, reason = %reason, "总线不可用，仅本地投递");
            }
            Err(err) => {
                tracing::warn!(topic = %topic, error = %err, "总线发布失败，仅本地投递");
            }
        }
    }
}

#[async_trait]
impl BusMessageHandler for EventRouter {
    async fn handle_message(&self, topic: &str, payload: &[u8]) {
        let envelope = match BusEnvelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(topic = %topic, error = %err, "丢弃无法解析的总线消息");
                return;
            }
        };

        if envelope.origin == self.instance_id {
            tracing::trace!(topic = %topic, "忽略本进程发出的事件");
            return;
        }

        self.deliver_remote(envelope).await;
    }
}

fn encode_frame(event: &DomainEvent) -> Result<OutboundFrame, serde_json::Error> {
    let text = event.to_frame()?.to_text()?;
    Ok(Arc::from(text))
}
