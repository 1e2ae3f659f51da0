//! 中继组装
//!
//! 把连接表、路由器、在线跟踪器和生命周期管理器接到同一条事件总线上。

use std::sync::Arc;
use std::time::Duration;

use config::AppConfig;
use domain::{Caller, DomainError, DomainEvent, InstanceId, PresenceEntry};
use tokio::task::JoinHandle;

use crate::bus::{BusError, EventBus};
use crate::lifecycle::{ConnectionHandle, ConnectionLifecycle};
use crate::presence::PresenceTracker;
use crate::registry::{ConnectionRegistry, DeliveryReport};
use crate::router::EventRouter;

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub instance_id: InstanceId,
    pub topic_prefix: String,
    pub outbound_buffer: usize,
    pub heartbeat_interval: Duration,
    pub presence_ttl: Duration,
}

impl RelaySettings {
    pub fn new(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            topic_prefix: "relay:".to_string(),
            outbound_buffer: 256,
            heartbeat_interval: Duration::from_secs(10),
            presence_ttl: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, DomainError> {
        let instance_id = match config.relay.instance_id.as_deref() {
            Some(id) => InstanceId::parse(id)?,
            None => InstanceId::generate(),
        };
        Ok(Self {
            instance_id,
            topic_prefix: config.redis.channel_prefix.clone(),
            outbound_buffer: config.relay.outbound_buffer,
            heartbeat_interval: config.relay.heartbeat_interval(),
            presence_ttl: config.relay.presence_ttl(),
        })
    }
}

pub struct RelayHub {
    settings: RelaySettings,
    registry: Arc<ConnectionRegistry>,
    router: Arc<EventRouter>,
    tracker: Arc<PresenceTracker>,
    lifecycle: Arc<ConnectionLifecycle>,
}

impl RelayHub {
    pub fn new(settings: RelaySettings, bus: Arc<dyn EventBus>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(settings.outbound_buffer));
        let router = Arc::new(EventRouter::new(
            settings.instance_id.clone(),
            settings.topic_prefix.clone(),
            registry.clone(),
            bus,
            settings.presence_ttl,
        ));
        let tracker = Arc::new(PresenceTracker::new(router.clone()));
        let lifecycle = Arc::new(ConnectionLifecycle::new(
            registry.clone(),
            router.clone(),
            tracker.clone(),
        ));
        Self {
            settings,
            registry,
            router,
            tracker,
            lifecycle,
        }
    }

    /// 订阅总线频道；失败时仍可单机运行
    pub async fn start(&self) -> Result<(), BusError> {
        self.router.subscribe_to_bus().await?;
        tracing::info!(instance_id = %self.settings.instance_id, "中继已接入事件总线");
        Ok(())
    }

    /// 进程内可信连接，在线声明的用户不做校验
    pub async fn connect(&self) -> ConnectionHandle {
        self.lifecycle.open(None).await
    }

    /// 已认证的连接，只能为调用方自己声明在线
    pub async fn connect_as(&self, caller: Caller) -> ConnectionHandle {
        self.lifecycle.open(Some(caller)).await
    }

    /// 交给 CRUD 层在持久化成功后调用
    pub async fn publish(&self, event: DomainEvent) -> DeliveryReport {
        self.router.publish(event).await
    }

    pub async fn online_users(&self) -> Vec<PresenceEntry> {
        self.router.online_users().await
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.settings.instance_id
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub fn tracker(&self) -> &Arc<PresenceTracker> {
        &self.tracker
    }

    /// 周期性重发名单并清理过期的远端快照
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(hub.settings.heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                hub.tracker.heartbeat().await;
            }
        })
    }

    /// 优雅停机
    ///
    /// 心跳必须先停下，否则撤回后的名单会被下一次心跳重新发布。
    pub async fn shutdown(&self, heartbeat: Option<JoinHandle<()>>) {
        if let Some(heartbeat) = heartbeat {
            heartbeat.abort();
            let _ = heartbeat.await;
        }
        self.tracker.withdraw_from_cluster().await;
        tracing::info!(
            instance_id = %self.settings.instance_id,
            connections = self.registry.len().await,
            "中继已停止"
        );
    }
}
