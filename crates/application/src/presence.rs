//! 在线状态跟踪器
//!
//! 名单由"在线声明"推导：一个用户只要还有任意一条连接处于已声明在线，就留在名单里。
//! 每次变化都通过 [`EventRouter::publish_presence`] 下发完整快照。

use std::collections::HashMap;
use std::sync::Arc;

use domain::{ConnectionId, PresenceEntry, Roster, UserId};
use tokio::sync::Mutex;

use crate::error::ApplicationError;
use crate::router::EventRouter;

#[derive(Default)]
struct PresenceState {
    roster: Roster,
    /// 每条连接当前声明的用户
    announcements: HashMap<ConnectionId, UserId>,
}

impl PresenceState {
    fn announce_online(&mut self, id: ConnectionId, entry: PresenceEntry) -> bool {
        let mut changed = false;
        if let Some(previous) = self.announcements.insert(id, entry.user_id) {
            if previous != entry.user_id {
                changed = self.release(previous);
            }
        }
        let upserted = self.roster.upsert(entry);
        changed || upserted
    }

    fn withdraw(&mut self, id: ConnectionId) -> bool {
        match self.announcements.remove(&id) {
            Some(user_id) => self.release(user_id),
            None => false,
        }
    }

    /// 没有其他连接为该用户声明在线时才移出名单
    fn release(&mut self, user_id: UserId) -> bool {
        if self.announcements.values().any(|u| *u == user_id) {
            false
        } else {
            self.roster.remove(user_id)
        }
    }
}

pub struct PresenceTracker {
    router: Arc<EventRouter>,
    state: Mutex<PresenceState>,
}

impl PresenceTracker {
    pub fn new(router: Arc<EventRouter>) -> Self {
        Self {
            router,
            state: Mutex::new(PresenceState::default()),
        }
    }

    /// 处理在线声明，返回名单是否变化
    ///
    /// 下线声明只撤回本连接对该用户的声明。
    pub async fn announce(
        &self,
        id: ConnectionId,
        user_id: UserId,
        display_name: &str,
        online: bool,
    ) -> Result<bool, ApplicationError> {
        let mut state = self.state.lock().await;
        let changed = if online {
            let entry = PresenceEntry::new(user_id, display_name)?;
            state.announce_online(id, entry)
        } else if state.announcements.get(&id) == Some(&user_id) {
            state.withdraw(id)
        } else {
            tracing::debug!(connection_id = %id, user_id = %user_id, "连接未声明该用户，忽略下线声明");
            false
        };

        if changed {
            tracing::info!(connection_id = %id, user_id = %user_id, online, roster_size = state.roster.len(), "在线名单已更新");
            self.router.publish_presence(state.roster.snapshot()).await;
        }
        Ok(changed)
    }

    /// 连接关闭；由生命周期管理器保证每条连接只调用一次
    pub async fn on_disconnect(&self, id: ConnectionId) -> bool {
        let mut state = self.state.lock().await;
        let changed = state.withdraw(id);
        if changed {
            tracing::info!(connection_id = %id, roster_size = state.roster.len(), "连接断开，用户已下线");
            self.router.publish_presence(state.roster.snapshot()).await;
        }
        changed
    }

    /// 本进程权威名单
    pub async fn roster(&self) -> Vec<PresenceEntry> {
        self.state.lock().await.roster.snapshot()
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.state.lock().await.roster.contains(user_id)
    }

    /// 重发本进程名单并清理过期的远端快照
    pub async fn heartbeat(&self) {
        let state = self.state.lock().await;
        self.router.republish_presence(state.roster.snapshot()).await;
        drop(state);
        self.router.expire_remote_presence().await;
    }

    /// 优雅停机：通知其他进程本进程的用户已全部离线
    pub async fn withdraw_from_cluster(&self) {
        let state = self.state.lock().await;
        tracing::info!(roster_size = state.roster.len(), "撤回本进程在线名单");
        self.router.republish_presence(Vec::new()).await;
    }
}
