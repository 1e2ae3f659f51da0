//! 在线名单模型
//!
//! 名单以 `user_id` 为键，同一用户多条连接只出现一次，显示名以最后一次声明为准。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::UserId;

/// 在线名单中的一条记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub user_id: UserId,
    pub display_name: String,
}

impl PresenceEntry {
    pub const MAX_DISPLAY_NAME: usize = 64;

    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Result<Self, DomainError> {
        let display_name = display_name.into().trim().to_owned();
        if display_name.is_empty() {
            return Err(DomainError::validation_error(
                "display_name",
                "cannot be empty",
            ));
        }
        if display_name.chars().count() > Self::MAX_DISPLAY_NAME {
            return Err(DomainError::validation_error("display_name", "too long"));
        }
        Ok(Self {
            user_id,
            display_name,
        })
    }
}

/// 在线名单，按 `user_id` 有序
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    entries: BTreeMap<UserId, String>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或更新，返回名单是否发生变化
    pub fn upsert(&mut self, entry: PresenceEntry) -> bool {
        match self.entries.get(&entry.user_id) {
            Some(name) if *name == entry.display_name => false,
            _ => {
                self.entries.insert(entry.user_id, entry.display_name);
                true
            }
        }
    }

    /// 移除用户，返回是否存在
    pub fn remove(&mut self, user_id: UserId) -> bool {
        self.entries.remove(&user_id).is_some()
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.entries.contains_key(&user_id)
    }

    pub fn display_name(&self, user_id: UserId) -> Option<&str> {
        self.entries.get(&user_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 完整快照
    pub fn snapshot(&self) -> Vec<PresenceEntry> {
        self.entries
            .iter()
            .map(|(user_id, display_name)| PresenceEntry {
                user_id: *user_id,
                display_name: display_name.clone(),
            })
            .collect()
    }

    /// 合并多个快照，重复用户保留先出现的那条
    pub fn union<'a, I>(snapshots: I) -> Self
    where
        I: IntoIterator<Item = &'a [PresenceEntry]>,
    {
        let mut roster = Self::new();
        for snapshot in snapshots {
            for entry in snapshot {
                roster
                    .entries
                    .entry(entry.user_id)
                    .or_insert_with(|| entry.display_name.clone());
            }
        }
        roster
    }
}

impl FromIterator<PresenceEntry> for Roster {
    fn from_iter<T: IntoIterator<Item = PresenceEntry>>(iter: T) -> Self {
        let mut roster = Self::new();
        for entry in iter {
            roster.upsert(entry);
        }
        roster
    }
}
