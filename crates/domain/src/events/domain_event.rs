//! 消息生命周期与在线状态的领域事件
//!
//! 事件发布后不可变。总线传输使用 [`DomainEvent`] 的标签化序列化，
//! 客户端看到的则是 [`ServerFrame`] 中的具名事件。

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::frames::ServerFrame;
use crate::message::{ChatMessage, Participants, PrivateMessage};
use crate::presence::PresenceEntry;
use crate::value_objects::{MessageId, Timestamp, UserId};

/// 客户端事件名
pub mod wire {
    pub const NEW_MESSAGE: &str = "new-message";
    pub const MESSAGE_EDITED: &str = "message-edited";
    pub const MESSAGE_DELETED: &str = "message-deleted";
    pub const CHAT_CLEARED: &str = "chat-cleared";
    pub const NEW_PRIVATE_MESSAGE: &str = "new-private-message";
    pub const PRIVATE_MESSAGE_EDITED: &str = "private-message-edited";
    pub const PRIVATE_MESSAGE_DELETED: &str = "private-message-deleted";
    pub const ONLINE_USERS: &str = "online-users";
    pub const PRESENCE_ANNOUNCE: &str = "presence-announce";
}

/// 领域事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum DomainEvent {
    MessageCreated {
        message: ChatMessage,
    },
    MessageEdited {
        message: ChatMessage,
    },
    MessageDeleted {
        id: MessageId,
    },
    PrivateMessageCreated {
        message: PrivateMessage,
    },
    PrivateMessageEdited {
        message: PrivateMessage,
    },
    PrivateMessageDeleted {
        id: MessageId,
        participants: Participants,
    },
    ChatCleared {
        cleared_by: UserId,
        cleared_at: Timestamp,
    },
    PresenceChanged {
        roster: Vec<PresenceEntry>,
    },
}

/// 投递范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventScope {
    /// 所有本地连接
    Group,
    /// 只投递给绑定到任一参与者的连接
    Private(Participants),
}

/// 事件类别，每个类别对应一个总线频道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Messages,
    PrivateMessages,
    Presence,
}

impl EventCategory {
    pub const ALL: [EventCategory; 3] = [
        EventCategory::Messages,
        EventCategory::PrivateMessages,
        EventCategory::Presence,
    ];

    /// 频道名后缀
    pub fn topic_suffix(&self) -> &'static str {
        match self {
            EventCategory::Messages => "messages",
            EventCategory::PrivateMessages => "private-messages",
            EventCategory::Presence => "presence",
        }
    }

    pub fn topic(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.topic_suffix())
    }
}

impl DomainEvent {
    pub fn scope(&self) -> EventScope {
        match self {
            DomainEvent::PrivateMessageCreated { message }
            | DomainEvent::PrivateMessageEdited { message } => {
                EventScope::Private(message.participants())
            }
            DomainEvent::PrivateMessageDeleted { participants, .. } => {
                EventScope::Private(*participants)
            }
            _ => EventScope::Group,
        }
    }

    pub fn category(&self) -> EventCategory {
        match self {
            DomainEvent::MessageCreated { .. }
            | DomainEvent::MessageEdited { .. }
            | DomainEvent::MessageDeleted { .. }
            | DomainEvent::ChatCleared { .. } => EventCategory::Messages,
            DomainEvent::PrivateMessageCreated { .. }
            | DomainEvent::PrivateMessageEdited { .. }
            | DomainEvent::PrivateMessageDeleted { .. } => EventCategory::PrivateMessages,
            DomainEvent::PresenceChanged { .. } => EventCategory::Presence,
        }
    }

    /// 客户端事件名
    pub fn wire_name(&self) -> &'static str {
        match self {
            DomainEvent::MessageCreated { .. } => wire::NEW_MESSAGE,
            DomainEvent::MessageEdited { .. } => wire::MESSAGE_EDITED,
            DomainEvent::MessageDeleted { .. } => wire::MESSAGE_DELETED,
            DomainEvent::ChatCleared { .. } => wire::CHAT_CLEARED,
            DomainEvent::PrivateMessageCreated { .. } => wire::NEW_PRIVATE_MESSAGE,
            DomainEvent::PrivateMessageEdited { .. } => wire::PRIVATE_MESSAGE_EDITED,
            DomainEvent::PrivateMessageDeleted { .. } => wire::PRIVATE_MESSAGE_DELETED,
            DomainEvent::PresenceChanged { .. } => wire::ONLINE_USERS,
        }
    }

    /// 转换为客户端帧，载荷只包含该事件的字段
    pub fn to_frame(&self) -> Result<ServerFrame, serde_json::Error> {
        let data = match self {
            DomainEvent::MessageCreated { message } | DomainEvent::MessageEdited { message } => {
                serde_json::to_value(message)?
            }
            DomainEvent::PrivateMessageCreated { message }
            | DomainEvent::PrivateMessageEdited { message } => serde_json::to_value(message)?,
            DomainEvent::MessageDeleted { id } => json!({ "id": id }),
            DomainEvent::PrivateMessageDeleted { id, participants } => json!({
                "id": id,
                "participants": participants.as_array(),
            }),
            DomainEvent::ChatCleared {
                cleared_by,
                cleared_at,
            } => json!({ "cleared_by": cleared_by, "cleared_at": cleared_at }),
            DomainEvent::PresenceChanged { roster } => serde_json::to_value(roster)?,
        };
        Ok(ServerFrame::new(self.wire_name(), data))
    }
}
