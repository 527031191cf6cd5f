use std::sync::Arc;
use thiserror::Error;

use crate::auth::CallerIdentity;
use crate::history::{ ConversationStore, StoreError };
use crate::models::chat::Conversation;

#[derive(Debug, Error)]
pub enum GuardError {
    /// The conversation is absent or belongs to someone else; callers cannot tell which.
    #[error("Conversation not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Gate in front of every conversation read or write.
#[derive(Clone)]
pub struct OwnershipGuard {
    store: Arc<dyn ConversationStore>,
}

impl OwnershipGuard {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    pub async fn authorize(
        &self,
        caller: &CallerIdentity,
        conversation_id: &str
    ) -> Result<Conversation, GuardError> {
        self.store
            .find_conversation(conversation_id, &caller.user_id).await?
            .ok_or(GuardError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryConversationStore;

    #[tokio::test]
    async fn absent_and_foreign_conversations_look_the_same() {
        let store = Arc::new(MemoryConversationStore::new());
        let conversation = Conversation::new("alice", "Private");
        store.insert_conversation(&conversation).await.unwrap();
        let guard = OwnershipGuard::new(store);

        let owner = CallerIdentity::new("alice");
        let stranger = CallerIdentity::new("mallory");

        assert_eq!(guard.authorize(&owner, &conversation.id).await.unwrap().id, conversation.id);

        let foreign = guard.authorize(&stranger, &conversation.id).await.unwrap_err();
        let missing = guard.authorize(&owner, "never-created").await.unwrap_err();
        assert!(matches!(foreign, GuardError::NotFound));
        assert!(matches!(missing, GuardError::NotFound));
        assert_eq!(foreign.to_string(), missing.to_string());
    }
}
