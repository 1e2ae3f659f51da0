//! 持久化协作方接口
//!
//! 存储层负责分配消息 ID 和时间戳；写入成功后才允许发布事件。

use async_trait::async_trait;
use domain::{
    ChatMessage, MessageId, MessageText, NewChatMessage, NewPrivateMessage, PrivateMessage,
    Timestamp, UserId,
};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{resource} {id} not found")]
    NotFound {
        resource: &'static str,
        id: MessageId,
    },
    #[error("storage failure: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn message_not_found(id: MessageId) -> Self {
        Self::NotFound {
            resource: "message",
            id,
        }
    }

    pub fn private_message_not_found(id: MessageId) -> Self {
        Self::NotFound {
            resource: "private message",
            id,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message(&self, message: NewChatMessage) -> Result<ChatMessage, StoreError>;

    /// 最近的群聊消息，按发送时间升序
    async fn list_messages(&self, limit: usize) -> Result<Vec<ChatMessage>, StoreError>;

    async fn find_message(&self, id: MessageId) -> Result<Option<ChatMessage>, StoreError>;

    async fn update_message(
        &self,
        id: MessageId,
        text: MessageText,
    ) -> Result<ChatMessage, StoreError>;

    async fn delete_message(&self, id: MessageId) -> Result<(), StoreError>;

    /// 清空群聊，返回清空时间
    async fn clear_messages(&self) -> Result<Timestamp, StoreError>;

    async fn insert_private(
        &self,
        message: NewPrivateMessage,
    ) -> Result<PrivateMessage, StoreError>;

    /// 两个用户之间的私聊记录，按发送时间升序
    async fn list_conversation(
        &self,
        first: UserId,
        second: UserId,
        limit: usize,
    ) -> Result<Vec<PrivateMessage>, StoreError>;

    async fn find_private(&self, id: MessageId) -> Result<Option<PrivateMessage>, StoreError>;

    async fn update_private(
        &self,
        id: MessageId,
        text: MessageText,
    ) -> Result<PrivateMessage, StoreError>;

    async fn delete_private(&self, id: MessageId) -> Result<(), StoreError>;

    /// 记录用户最近一次查看群聊的时间
    async fn mark_group_visit(&self, user_id: UserId) -> Result<Timestamp, StoreError>;

    async fn last_group_visit(&self, user_id: UserId) -> Result<Option<Timestamp>, StoreError>;

    /// `since` 之后其他用户发的群聊消息数；`None` 表示从未查看过
    async fn count_group_since(
        &self,
        user_id: UserId,
        since: Option<Timestamp>,
    ) -> Result<usize, StoreError>;
}
