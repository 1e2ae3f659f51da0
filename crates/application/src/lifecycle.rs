//! 连接生命周期管理
//!
//! 每条传输层连接对应一个 [`ConnectionHandle`]，由该连接的任务独占。
//! `close` 与 `Drop` 共用 [`ConnectionState::close`] 判定，保证清理只执行一次。

use std::sync::Arc;

use domain::{
    Caller, ClientFrame, ConnectionId, ConnectionState, DomainError, PresenceAnnounce,
    PresenceEntry, UserId,
};
use tokio::sync::mpsc;

use crate::error::ApplicationError;
use crate::presence::PresenceTracker;
use crate::registry::{ConnectionRegistry, OutboundFrame};
use crate::router::EventRouter;

pub struct ConnectionLifecycle {
    registry: Arc<ConnectionRegistry>,
    router: Arc<EventRouter>,
    tracker: Arc<PresenceTracker>,
}

impl ConnectionLifecycle {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        router: Arc<EventRouter>,
        tracker: Arc<PresenceTracker>,
    ) -> Self {
        Self {
            registry,
            router,
            tracker,
        }
    }

    /// 接受新连接：登记并立即下发当前在线名单
    ///
    /// `identity` 为传输层认证得到的调用方；有身份的连接只能为自己声明在线。
    pub async fn open(self: &Arc<Self>, identity: Option<Caller>) -> ConnectionHandle {
        let (id, receiver) = self.registry.register().await;
        self.router.send_online_users(id).await;
        match &identity {
            Some(caller) => {
                tracing::info!(connection_id = %id, user_id = %caller.user_id, "连接已建立")
            }
            None => tracing::info!(connection_id = %id, "连接已建立"),
        }
        ConnectionHandle {
            id,
            state: ConnectionState::OpenUnbound,
            identity,
            receiver: Some(receiver),
            lifecycle: self.clone(),
        }
    }

    async fn cleanup(&self, id: ConnectionId) {
        let user_id = self.registry.unregister(id).await;
        self.tracker.on_disconnect(id).await;
        match user_id {
            Some(user_id) => tracing::info!(connection_id = %id, user_id = %user_id, "连接已关闭"),
            None => tracing::info!(connection_id = %id, "未绑定的连接已关闭"),
        }
    }
}

/// 单条连接的句柄
pub struct ConnectionHandle {
    id: ConnectionId,
    state: ConnectionState,
    identity: Option<Caller>,
    receiver: Option<mpsc::Receiver<OutboundFrame>>,
    lifecycle: Arc<ConnectionLifecycle>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn identity(&self) -> Option<&Caller> {
        self.identity.as_ref()
    }

    /// 出站队列接收端，只能取走一次
    pub fn take_receiver(&mut self) -> Option<mpsc::Receiver<OutboundFrame>> {
        self.receiver.take()
    }

    pub async fn handle_frame(&mut self, frame: ClientFrame) -> Result<(), ApplicationError> {
        match frame {
            ClientFrame::PresenceAnnounce(announce) => self.announce(announce).await,
        }
    }

    /// 处理在线声明
    ///
    /// 上线声明把连接绑定到该用户，下线声明撤回本连接自己的绑定。
    pub async fn announce(&mut self, announce: PresenceAnnounce) -> Result<(), ApplicationError> {
        if !self.state.is_open() {
            return Err(DomainError::ConnectionClosed {
                connection_id: self.id.to_string(),
            }
            .into());
        }

        let PresenceAnnounce {
            user_id,
            display_name,
            online,
        } = announce;

        if let Some(caller) = &self.identity {
            if caller.user_id != user_id {
                tracing::warn!(
                    connection_id = %self.id,
                    user_id = %user_id,
                    caller_id = %caller.user_id,
                    "拒绝为其他用户声明在线"
                );
                return Err(
                    DomainError::permission_denied("announce presence for another user").into(),
                );
            }
        }

        if online {
            self.announce_online(user_id, &display_name).await
        } else {
            self.announce_offline(user_id, &display_name).await
        }
    }

    async fn announce_online(
        &mut self,
        user_id: UserId,
        display_name: &str,
    ) -> Result<(), ApplicationError> {
        PresenceEntry::new(user_id, display_name)?;
        // 名单广播前必须已能收到该用户的私聊
        if self.state.bound_user() != Some(user_id) {
            self.lifecycle.registry.bind(self.id, user_id).await?;
            self.state.bind(self.id, user_id)?;
            tracing::info!(connection_id = %self.id, user_id = %user_id, "连接已绑定用户");
        }

        self.lifecycle
            .tracker
            .announce(self.id, user_id, display_name, true)
            .await?;
        Ok(())
    }

    async fn announce_offline(
        &mut self,
        user_id: UserId,
        display_name: &str,
    ) -> Result<(), ApplicationError> {
        if self.state.bound_user() == Some(user_id) {
            self.lifecycle.registry.unbind(self.id).await;
            self.state.unbind();
            tracing::info!(connection_id = %self.id, user_id = %user_id, "连接已撤回用户绑定");
        }

        self.lifecycle
            .tracker
            .announce(self.id, user_id, display_name, false)
            .await?;
        Ok(())
    }

    /// 传输层关闭；只有第一次调用会执行清理
    pub async fn close(&mut self) -> bool {
        if !self.state.close() {
            return false;
        }
        self.lifecycle.cleanup(self.id).await;
        true
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if !self.state.close() {
            return;
        }
        let lifecycle = self.lifecycle.clone();
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::debug!(connection_id = %id, "连接未显式关闭，异步清理");
                runtime.spawn(async move { lifecycle.cleanup(id).await });
            }
            Err(_) => tracing::warn!(connection_id = %id, "没有可用的运行时，连接未清理"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::InMemoryEventBus;
    use crate::bus::{BusError, BusMessageHandler, EventBus};
    use async_trait::async_trait;
    use chrono::Utc;
    use domain::{DomainEvent, InstanceId, MessageId, PrivateMessage, Role, ServerFrame};
    use std::sync::Mutex;
    use std::time::Duration;

    fn lifecycle() -> (Arc<ConnectionLifecycle>, Arc<ConnectionRegistry>, Arc<PresenceTracker>) {
        let registry = Arc::new(ConnectionRegistry::new(16));
        lifecycle_on(registry, Arc::new(InMemoryEventBus::standalone()))
    }

    fn lifecycle_on(
        registry: Arc<ConnectionRegistry>,
        bus: Arc<dyn EventBus>,
    ) -> (Arc<ConnectionLifecycle>, Arc<ConnectionRegistry>, Arc<PresenceTracker>) {
        let router = Arc::new(EventRouter::new(
            InstanceId::parse("p1").unwrap(),
            "relay:",
            registry.clone(),
            bus,
            Duration::from_secs(30),
        ));
        let tracker = Arc::new(PresenceTracker::new(router.clone()));
        let lifecycle = Arc::new(ConnectionLifecycle::new(
            registry.clone(),
            router,
            tracker.clone(),
        ));
        (lifecycle, registry, tracker)
    }

    fn online(user: i64, name: &str) -> PresenceAnnounce {
        PresenceAnnounce {
            user_id: UserId(user),
            display_name: name.into(),
            online: true,
        }
    }

    #[tokio::test]
    async fn open_sends_initial_snapshot() {
        let (lifecycle, _, _) = lifecycle();
        let mut handle = lifecycle.open(None).await;
        let mut rx = handle.take_receiver().unwrap();

        let frame: ServerFrame = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame.event, "online-users");
        assert_eq!(frame.data, serde_json::json!([]));
        assert_eq!(handle.state(), ConnectionState::OpenUnbound);
    }

    #[tokio::test]
    async fn announce_binds_and_close_cleans_up_once() {
        let (lifecycle, registry, tracker) = lifecycle();
        let mut handle = lifecycle.open(None).await;
        handle.announce(online(7, "Ana")).await.unwrap();

        assert_eq!(handle.state(), ConnectionState::OpenBound(UserId(7)));
        assert_eq!(registry.bound_user(handle.id()).await, Some(UserId(7)));
        assert!(tracker.is_online(UserId(7)).await);

        assert!(handle.close().await);
        assert!(!handle.close().await);
        assert!(registry.is_empty().await);
        assert!(!tracker.is_online(UserId(7)).await);
        assert!(handle.announce(online(7, "Ana")).await.is_err());
    }

    #[tokio::test]
    async fn dropped_handle_is_cleaned_up() {
        let (lifecycle, registry, tracker) = lifecycle();
        let mut handle = lifecycle.open(None).await;
        handle.announce(online(7, "Ana")).await.unwrap();
        drop(handle);

        for _ in 0..50 {
            if registry.is_empty().await {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(registry.is_empty().await);
        assert!(!tracker.is_online(UserId(7)).await);
    }

    #[tokio::test]
    async fn invalid_announce_leaves_connection_unbound() {
        let (lifecycle, registry, _) = lifecycle();
        let mut handle = lifecycle.open(None).await;
        assert!(handle.announce(online(7, "")).await.is_err());
        assert_eq!(handle.state(), ConnectionState::OpenUnbound);
        assert_eq!(registry.bound_user(handle.id()).await, None);
    }

    fn offline(user: i64) -> PresenceAnnounce {
        PresenceAnnounce {
            user_id: UserId(user),
            display_name: String::new(),
            online: false,
        }
    }

    fn private_between(id: i64, from: i64, to: i64) -> DomainEvent {
        DomainEvent::PrivateMessageCreated {
            message: PrivateMessage {
                id: MessageId(id),
                sender_id: UserId(from),
                recipient_id: UserId(to),
                sender_name: "A".into(),
                text: "psst".into(),
                sent_at: Utc::now(),
                edited_at: None,
            },
        }
    }

    fn drain_events(rx: &mut mpsc::Receiver<OutboundFrame>) -> Vec<String> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let frame: ServerFrame = serde_json::from_str(&frame).unwrap();
            events.push(frame.event);
        }
        events
    }

    #[tokio::test]
    async fn offline_announce_releases_private_binding() {
        let (lifecycle, registry, tracker) = lifecycle();
        let mut handle = lifecycle.open(None).await;
        let mut rx = handle.take_receiver().unwrap();
        handle.announce(online(2, "Bo")).await.unwrap();
        handle.announce(offline(2)).await.unwrap();

        assert_eq!(handle.state(), ConnectionState::OpenUnbound);
        assert_eq!(registry.bound_user(handle.id()).await, None);
        assert!(tracker.roster().await.is_empty());
        drain_events(&mut rx);

        lifecycle.router.publish(private_between(5, 1, 2)).await;
        assert!(drain_events(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn offline_for_another_user_keeps_binding() {
        let (lifecycle, registry, _) = lifecycle();
        let mut handle = lifecycle.open(None).await;
        handle.announce(online(2, "Bo")).await.unwrap();
        handle.announce(offline(3)).await.unwrap();

        assert_eq!(handle.state(), ConnectionState::OpenBound(UserId(2)));
        assert_eq!(registry.bound_user(handle.id()).await, Some(UserId(2)));
    }

    #[tokio::test]
    async fn authenticated_connection_cannot_announce_for_others() {
        let (lifecycle, registry, tracker) = lifecycle();
        let caller = Caller {
            user_id: UserId(1),
            display_name: "A".into(),
            role: Role::new("member"),
        };
        let mut handle = lifecycle.open(Some(caller)).await;
        let mut rx = handle.take_receiver().unwrap();
        drain_events(&mut rx);

        let forged = handle.announce(online(2, "Bo")).await;
        assert!(matches!(
            forged,
            Err(ApplicationError::Domain(DomainError::PermissionDenied { .. }))
        ));
        assert_eq!(registry.bound_user(handle.id()).await, None);
        assert!(tracker.roster().await.is_empty());

        lifecycle.router.publish(private_between(5, 3, 2)).await;
        assert!(drain_events(&mut rx).is_empty());

        handle.announce(online(1, "A")).await.unwrap();
        assert_eq!(handle.state(), ConnectionState::OpenBound(UserId(1)));
    }

    /// 记录每次发布名单时被观察连接的绑定情况
    struct BindingRecorder {
        registry: Arc<ConnectionRegistry>,
        watched: Mutex<Option<ConnectionId>>,
        seen: Mutex<Vec<Option<UserId>>>,
    }

    #[async_trait]
    impl EventBus for BindingRecorder {
        async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<(), BusError> {
            let watched = *self.watched.lock().unwrap();
            if let Some(id) = watched {
                let bound = self.registry.bound_user(id).await;
                self.seen.lock().unwrap().push(bound);
            }
            Ok(())
        }

        async fn subscribe(
            &self,
            _topic: &str,
            _handler: Arc<dyn BusMessageHandler>,
        ) -> Result<(), BusError> {
            Ok(())
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn connection_is_bound_before_roster_is_published() {
        let registry = Arc::new(ConnectionRegistry::new(16));
        let recorder = Arc::new(BindingRecorder {
            registry: registry.clone(),
            watched: Mutex::new(None),
            seen: Mutex::new(Vec::new()),
        });
        let (lifecycle, _, _) = lifecycle_on(registry, recorder.clone());

        let mut handle = lifecycle.open(None).await;
        *recorder.watched.lock().unwrap() = Some(handle.id());
        handle.announce(online(7, "Ana")).await.unwrap();
        handle.announce(offline(7)).await.unwrap();

        assert_eq!(*recorder.seen.lock().unwrap(), vec![Some(UserId(7)), None]);
    }
}
