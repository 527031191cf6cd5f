use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{ ConversationStore, StoreError, CONVERSATION_LIST_LIMIT };
use crate::models::chat::{ Conversation, Message };

#[derive(Default)]
struct Collections {
    conversations: HashMap<String, Conversation>,
    messages: HashMap<String, Vec<Message>>,
}

/// Process-local store. Every operation runs under one lock, so each write is atomic.
#[derive(Default)]
pub struct MemoryConversationStore {
    inner: RwLock<Collections>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn find_conversation(
        &self,
        id: &str,
        owner_id: &str
    ) -> Result<Option<Conversation>, StoreError> {
        let inner = self.inner.read().await;
        Ok(
            inner.conversations
                .get(id)
                .filter(|c| c.user_id == owner_id)
                .cloned()
        )
    }

    async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.conversations.insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>, StoreError> {
        let inner = self.inner.read().await;
        let mut owned: Vec<Conversation> = inner.conversations
            .values()
            .filter(|c| c.user_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        owned.truncate(CONVERSATION_LIST_LIMIT);
        Ok(owned)
    }

    async fn rename_conversation(
        &self,
        id: &str,
        owner_id: &str,
        title: &str
    ) -> Result<Option<Conversation>, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(
            inner.conversations
                .get_mut(id)
                .filter(|c| c.user_id == owner_id)
                .map(|c| {
                    c.title = title.to_string();
                    c.clone()
                })
        )
    }

    async fn touch_conversation(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let conversation = inner.conversations
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {}", id)))?;
        if at > conversation.updated_at {
            conversation.updated_at = at;
        }
        Ok(())
    }

    async fn delete_conversation_cascade(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.conversations.remove(id);
        inner.messages.remove(id);
        Ok(())
    }

    async fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.conversations.contains_key(&message.conversation_id) {
            return Err(StoreError::NotFound(format!("conversation {}", message.conversation_id)));
        }
        let log = inner.messages.entry(message.conversation_id.clone()).or_default();
        let pos = log.partition_point(|m| m.created_at <= message.created_at);
        log.insert(pos, message.clone());
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.messages.get(conversation_id).cloned().unwrap_or_default())
    }
}
