use std::sync::Arc;

use domain::{
    Caller, ChatMessage, DomainError, DomainEvent, MessageId, MessageText, NewChatMessage,
    NewPrivateMessage, PrivateMessage, Timestamp, UserId,
};

use crate::{
    error::ApplicationError,
    router::EventRouter,
    store::{MessageStore, StoreError},
};

/// 单次历史查询的最大条数
const MAX_HISTORY: usize = 500;

pub struct ChatServiceDependencies {
    pub store: Arc<dyn MessageStore>,
    pub router: Arc<EventRouter>,
}

/// 消息 CRUD：先持久化，成功后恰好发布一次事件
pub struct ChatService {
    deps: ChatServiceDependencies,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn send_message(
        &self,
        caller: &Caller,
        text: String,
    ) -> Result<ChatMessage, ApplicationError> {
        let text = MessageText::parse(text)?;
        let stored = self
            .deps
            .store
            .insert_message(NewChatMessage {
                user_id: caller.user_id,
                display_name: caller.display_name.clone(),
                text,
            })
            .await?;

        self.deps
            .router
            .publish(DomainEvent::MessageCreated {
                message: stored.clone(),
            })
            .await;
        Ok(stored)
    }

    pub async fn list_messages(&self, limit: usize) -> Result<Vec<ChatMessage>, ApplicationError> {
        let limit = limit.clamp(1, MAX_HISTORY);
        Ok(self.deps.store.list_messages(limit).await?)
    }

    pub async fn edit_message(
        &self,
        caller: &Caller,
        id: MessageId,
        text: String,
    ) -> Result<ChatMessage, ApplicationError> {
        let text = MessageText::parse(text)?;
        let existing = self
            .deps
            .store
            .find_message(id)
            .await?
            .ok_or(StoreError::message_not_found(id))?;
        if !caller.can_modify(existing.user_id) {
            return Err(DomainError::permission_denied("edit message").into());
        }

        let updated = self.deps.store.update_message(id, text).await?;
        self.deps
            .router
            .publish(DomainEvent::MessageEdited {
                message: updated.clone(),
            })
            .await;
        Ok(updated)
    }

    pub async fn delete_message(
        &self,
        caller: &Caller,
        id: MessageId,
    ) -> Result<(), ApplicationError> {
        let existing = self
            .deps
            .store
            .find_message(id)
            .await?
            .ok_or(StoreError::message_not_found(id))?;
        if !caller.can_modify(existing.user_id) {
            return Err(DomainError::permission_denied("delete message").into());
        }

        self.deps.store.delete_message(id).await?;
        self.deps
            .router
            .publish(DomainEvent::MessageDeleted { id })
            .await;
        Ok(())
    }

    /// 清空群聊，只有主管可以操作
    pub async fn clear_messages(&self, caller: &Caller) -> Result<(), ApplicationError> {
        if !caller.role.is_supervisor() {
            return Err(DomainError::permission_denied("clear chat").into());
        }

        let cleared_at = self.deps.store.clear_messages().await?;
        tracing::info!(user_id = %caller.user_id, "群聊已清空");
        self.deps
            .router
            .publish(DomainEvent::ChatCleared {
                cleared_by: caller.user_id,
                cleared_at,
            })
            .await;
        Ok(())
    }

    /// 调用方上次查看群聊后，其他人发的消息数
    pub async fn unread_count(&self, caller: &Caller) -> Result<usize, ApplicationError> {
        let since = self.deps.store.last_group_visit(caller.user_id).await?;
        Ok(self
            .deps
            .store
            .count_group_since(caller.user_id, since)
            .await?)
    }

    pub async fn mark_group_visited(&self, caller: &Caller) -> Result<Timestamp, ApplicationError> {
        Ok(self.deps.store.mark_group_visit(caller.user_id).await?)
    }

    pub async fn send_private(
        &self,
        caller: &Caller,
        recipient_id: UserId,
        text: String,
    ) -> Result<PrivateMessage, ApplicationError> {
        if recipient_id == caller.user_id {
            return Err(
                DomainError::validation_error("recipient_id", "cannot message yourself").into(),
            );
        }
        let text = MessageText::parse(text)?;
        let stored = self
            .deps
            .store
            .insert_private(NewPrivateMessage {
                sender_id: caller.user_id,
                recipient_id,
                sender_name: caller.display_name.clone(),
                text,
            })
            .await?;

        self.deps
            .router
            .publish(DomainEvent::PrivateMessageCreated {
                message: stored.clone(),
            })
            .await;
        Ok(stored)
    }

    /// 调用方与另一用户之间的私聊记录
    pub async fn list_conversation(
        &self,
        caller: &Caller,
        other: UserId,
        limit: usize,
    ) -> Result<Vec<PrivateMessage>, ApplicationError> {
        let limit = limit.clamp(1, MAX_HISTORY);
        Ok(self
            .deps
            .store
            .list_conversation(caller.user_id, other, limit)
            .await?)
    }

    pub async fn edit_private(
        &self,
        caller: &Caller,
        id: MessageId,
        text: String,
    ) -> Result<PrivateMessage, ApplicationError> {
        let text = MessageText::parse(text)?;
        let existing = self
            .deps
            .store
            .find_private(id)
            .await?
            .ok_or(StoreError::private_message_not_found(id))?;
        if !caller.can_modify(existing.sender_id) {
            return Err(DomainError::permission_denied("edit private message").into());
        }

        let updated = self.deps.store.update_private(id, text).await?;
        self.deps
            .router
            .publish(DomainEvent::PrivateMessageEdited {
                message: updated.clone(),
            })
            .await;
        Ok(updated)
    }

    pub async fn delete_private(
        &self,
        caller: &Caller,
        id: MessageId,
    ) -> Result<(), ApplicationError> {
        let existing = self
            .deps
            .store
            .find_private(id)
            .await?
            .ok_or(StoreError::private_message_not_found(id))?;
        if !caller.can_modify(existing.sender_id) {
            return Err(DomainError::permission_denied("delete private message").into());
        }

        self.deps.store.delete_private(id).await?;
        self.deps
            .router
            .publish(DomainEvent::PrivateMessageDeleted {
                id,
                participants: existing.participants(),
            })
            .await;
        Ok(())
    }
}
