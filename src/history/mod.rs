mod memory;
mod redis;

pub use self::memory::MemoryConversationStore;
pub use self::redis::RedisConversationStore;

use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use log::info;
use std::error::Error;
use std::sync::Arc;
use thiserror::Error;
use crate::cli::Args;
use crate::models::chat::{ Conversation, Message };

/// Cap on conversations returned by a listing, newest update first.
pub const CONVERSATION_LIST_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<::redis::RedisError> for StoreError {
    fn from(err: ::redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Persistent home of conversations and their append-only message logs.
/// Each method is a single-document write or read; callers take no locks.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Scoped lookup: `None` both when `id` is unknown and when `owner_id` does not own it.
    async fn find_conversation(
        &self,
        id: &str,
        owner_id: &str
    ) -> Result<Option<Conversation>, StoreError>;

    async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError>;

    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>, StoreError>;

    async fn rename_conversation(
        &self,
        id: &str,
        owner_id: &str,
        title: &str
    ) -> Result<Option<Conversation>, StoreError>;

    async fn touch_conversation(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn delete_conversation_cascade(&self, id: &str) -> Result<(), StoreError>;

    async fn insert_message(&self, message: &Message) -> Result<(), StoreError>;

    /// All messages of a conversation, oldest first.
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError>;

    /// The newest `limit` messages, oldest first.
    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize
    ) -> Result<Vec<Message>, StoreError> {
        let mut messages = self.list_messages(conversation_id).await?;
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }
}

pub fn create_conversation_store(
    args: &Args
) -> Result<Arc<dyn ConversationStore>, Box<dyn Error + Send + Sync>> {
    match args.store_type.to_lowercase().as_str() {
        "memory" => Ok(Arc::new(MemoryConversationStore::new())),
        "redis" => {
            let store = RedisConversationStore::new(&args.store_host, &args.store_prefix)?;
            Ok(Arc::new(store))
        }
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported conversation store type: {}", args.store_type)
                    )
                )
            ),
    }
}

pub fn initialize_conversation_store(
    args: &Args
) -> Result<Arc<dyn ConversationStore>, Box<dyn Error + Send + Sync>> {
    if args.store_type.eq_ignore_ascii_case("memory") {
        info!("Conversations will be kept in process memory");
    } else {
        info!("Conversations will be stored in: {} at {}", args.store_type, args.store_host);
    }
    create_conversation_store(args)
}
