//! 集群在线视图
//!
//! 本进程名单是权威的；其他进程的快照只按来源缓存，用于合成发给本地客户端的
//! `online-users`。远端快照超过 TTL 未刷新即视为该进程已消失。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use domain::{InstanceId, PresenceEntry, Roster};

struct RemoteSnapshot {
    roster: Vec<PresenceEntry>,
    received_at: Instant,
}

pub struct ClusterView {
    local: Vec<PresenceEntry>,
    remote: HashMap<InstanceId, RemoteSnapshot>,
    ttl: Duration,
}

impl ClusterView {
    pub fn new(ttl: Duration) -> Self {
        Self {
            local: Vec::new(),
            remote: HashMap::new(),
            ttl,
        }
    }

    pub fn set_local(&mut self, roster: Vec<PresenceEntry>) {
        self.local = roster;
    }

    /// 记录远端快照，返回合并视图是否因此变化
    pub fn apply_remote(
        &mut self,
        origin: InstanceId,
        roster: Vec<PresenceEntry>,
        now: Instant,
    ) -> bool {
        let before = self.merged();
        if roster.is_empty() {
            self.remote.remove(&origin);
        } else {
            self.remote.insert(
                origin,
                RemoteSnapshot {
                    roster,
                    received_at: now,
                },
            );
        }
        self.merged() != before
    }

    /// 丢弃过期的远端快照，返回合并视图是否因此变化
    pub fn expire(&mut self, now: Instant) -> bool {
        let before = self.merged();
        let ttl = self.ttl;
        self.remote.retain(|origin, snapshot| {
            let alive = now.saturating_duration_since(snapshot.received_at) < ttl;
            if !alive {
                tracing::info!(origin = %origin, "远端在线快照已过期");
            }
            alive
        });
        self.merged() != before
    }

    pub fn remote_instances(&self) -> usize {
        self.remote.len()
    }

    /// 本地名单与所有远端名单的并集，本地优先
    pub fn merged(&self) -> Vec<PresenceEntry> {
        let mut origins: Vec<&InstanceId> = self.remote.keys().collect();
        origins.sort();
        let snapshots = std::iter::once(self.local.as_slice()).chain(
            origins
                .into_iter()
                .filter_map(|origin| self.remote.get(origin))
                .map(|snapshot| snapshot.roster.as_slice()),
        );
        Roster::union(snapshots).snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::UserId;

    fn entry(id: i64, name: &str) -> PresenceEntry {
        PresenceEntry::new(UserId(id), name).unwrap()
    }

    fn origin(name: &str) -> InstanceId {
        InstanceId::parse(name).unwrap()
    }

    #[test]
    fn merged_view_is_union_of_local_and_remote() {
        let mut view = ClusterView::new(Duration::from_secs(30));
        view.set_local(vec![entry(1, "Ana")]);
        let now = Instant::now();
        assert!(view.apply_remote(origin("p2"), vec![entry(2, "Bo"), entry(1, "Ana")], now));

        let ids: Vec<i64> = view.merged().iter().map(|e| e.user_id.0).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn identical_remote_snapshot_reports_no_change() {
        let mut view = ClusterView::new(Duration::from_secs(30));
        let now = Instant::now();
        assert!(view.apply_remote(origin("p2"), vec![entry(2, "Bo")], now));
        assert!(!view.apply_remote(origin("p2"), vec![entry(2, "Bo")], now));
    }

    #[test]
    fn empty_remote_snapshot_withdraws_origin() {
        let mut view = ClusterView::new(Duration::from_secs(30));
        let now = Instant::now();
        view.apply_remote(origin("p2"), vec![entry(2, "Bo")], now);
        assert!(view.apply_remote(origin("p2"), vec![], now));
        assert_eq!(view.remote_instances(), 0);
        assert!(view.merged().is_empty());
    }

    #[test]
    fn stale_remote_snapshots_expire() {
        let mut view = ClusterView::new(Duration::from_secs(30));
        let start = Instant::now();
        view.apply_remote(origin("p2"), vec![entry(2, "Bo")], start);

        assert!(!view.expire(start + Duration::from_secs(10)));
        assert!(view.expire(start + Duration::from_secs(31)));
        assert!(view.merged().is_empty());
    }
}
