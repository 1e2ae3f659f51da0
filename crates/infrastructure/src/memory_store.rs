//! 内存消息存储
//!
//! 单进程部署和测试使用；ID 由存储自增分配，时间戳来自注入的时钟。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use application::{Clock, MessageStore, StoreError, SystemClock};
use async_trait::async_trait;
use domain::{
    ChatMessage, MessageId, MessageText, NewChatMessage, NewPrivateMessage, Participants,
    PrivateMessage, Timestamp, UserId,
};
use tokio::sync::RwLock;

#[derive(Default)]
struct StoreState {
    next_id: i64,
    messages: BTreeMap<MessageId, ChatMessage>,
    private: BTreeMap<MessageId, PrivateMessage>,
    group_visits: HashMap<UserId, Timestamp>,
}

impl StoreState {
    fn allocate_id(&mut self) -> MessageId {
        self.next_id += 1;
        MessageId(self.next_id)
    }
}

pub struct InMemoryMessageStore {
    state: RwLock<StoreState>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryMessageStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            clock,
        }
    }
}

/// 取最后 `limit` 条，保持升序
fn tail<T: Clone>(items: impl DoubleEndedIterator<Item = T>, limit: usize) -> Vec<T> {
    let mut recent: Vec<T> = items.rev().take(limit).collect();
    recent.reverse();
    recent
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert_message(&self, message: NewChatMessage) -> Result<ChatMessage, StoreError> {
        let mut state = self.state.write().await;
        let stored = ChatMessage {
            id: state.allocate_id(),
            user_id: message.user_id,
            display_name: message.display_name,
            text: message.text.as_str().to_string(),
            sent_at: self.clock.now(),
            edited_at: None,
        };
        state.messages.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn list_messages(&self, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        let state = self.state.read().await;
        Ok(tail(state.messages.values().cloned(), limit))
    }

    async fn find_message(&self, id: MessageId) -> Result<Option<ChatMessage>, StoreError> {
        Ok(self.state.read().await.messages.get(&id).cloned())
    }

    async fn update_message(
        &self,
        id: MessageId,
        text: MessageText,
    ) -> Result<ChatMessage, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let message = state
            .messages
            .get_mut(&id)
            .ok_or(StoreError::message_not_found(id))?;
        message.text = text.as_str().to_string();
        message.edited_at = Some(now);
        Ok(message.clone())
    }

    async fn delete_message(&self, id: MessageId) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .messages
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::message_not_found(id))
    }

    async fn clear_messages(&self) -> Result<Timestamp, StoreError> {
        self.state.write().await.messages.clear();
        Ok(self.clock.now())
    }

    async fn insert_private(
        &self,
        message: NewPrivateMessage,
    ) -> Result<PrivateMessage, StoreError> {
        let mut state = self.state.write().await;
        let stored = PrivateMessage {
            id: state.allocate_id(),
            sender_id: message.sender_id,
            recipient_id: message.recipient_id,
            sender_name: message.sender_name,
            text: message.text.as_str().to_string(),
            sent_at: self.clock.now(),
            edited_at: None,
        };
        state.private.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn list_conversation(
        &self,
        first: UserId,
        second: UserId,
        limit: usize,
    ) -> Result<Vec<PrivateMessage>, StoreError> {
        let pair = Participants::new(first, second);
        let state = self.state.read().await;
        let conversation = state
            .private
            .values()
            .filter(|m| pair.contains(m.sender_id) && pair.contains(m.recipient_id))
            .cloned();
        Ok(tail(conversation, limit))
    }

    async fn find_private(&self, id: MessageId) -> Result<Option<PrivateMessage>, StoreError> {
        Ok(self.state.read().await.private.get(&id).cloned())
    }

    async fn update_private(
        &self,
        id: MessageId,
        text: MessageText,
    ) -> Result<PrivateMessage, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let message = state
            .private
            .get_mut(&id)
            .ok_or(StoreError::private_message_not_found(id))?;
        message.text = text.as_str().to_string();
        message.edited_at = Some(now);
        Ok(message.clone())
    }

    async fn delete_private(&self, id: MessageId) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .private
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::private_message_not_found(id))
    }

    async fn mark_group_visit(&self, user_id: UserId) -> Result<Timestamp, StoreError> {
        let now = self.clock.now();
        self.state.write().await.group_visits.insert(user_id, now);
        Ok(now)
    }

    async fn last_group_visit(&self, user_id: UserId) -> Result<Option<Timestamp>, StoreError> {
        Ok(self.state.read().await.group_visits.get(&user_id).copied())
    }

    async fn count_group_since(
        &self,
        user_id: UserId,
        since: Option<Timestamp>,
    ) -> Result<usize, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .values()
            .filter(|m| m.user_id != user_id)
            .filter(|m| since.map_or(true, |since| m.sent_at > since))
            .count())
    }
}
