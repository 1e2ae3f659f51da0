use serde::{Deserialize, Serialize};

use crate::value_objects::{MessageId, MessageText, Timestamp, UserId};

/// 群聊消息（存储层持久化后的记录）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub user_id: UserId,
    pub display_name: String,
    pub text: String,
    pub sent_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<Timestamp>,
}

/// 私聊消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub sender_name: String,
    pub text: String,
    pub sent_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<Timestamp>,
}

impl PrivateMessage {
    pub fn participants(&self) -> Participants {
        Participants::new(self.sender_id, self.recipient_id)
    }

    pub fn involves(&self, user_id: UserId) -> bool {
        self.participants().contains(user_id)
    }
}

/// 私聊双方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participants {
    pub first: UserId,
    pub second: UserId,
}

impl Participants {
    pub fn new(first: UserId, second: UserId) -> Self {
        Self { first, second }
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.first == user_id || self.second == user_id
    }

    pub fn as_array(&self) -> [UserId; 2] {
        [self.first, self.second]
    }
}

/// 待写入的群聊消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatMessage {
    pub user_id: UserId,
    pub display_name: String,
    pub text: MessageText,
}

/// 待写入的私聊消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPrivateMessage {
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub sender_name: String,
    pub text: MessageText,
}
