use chrono::Utc;
use futures::{ Stream, StreamExt };
use log::{ debug, error, info, warn };
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::auth::CallerIdentity;
use crate::config::RelayConfig;
use crate::config::prompt::PromptConfig;
use crate::guard::{ GuardError, OwnershipGuard };
use crate::history::{ ConversationStore, StoreError };
use crate::llm::chat::{ ChatClient, ChatPrompt, ChatTurn, ProviderError };
use crate::llm::registry::{ ProviderRegistry, ResolvedModel };
use crate::models::chat::{ ChatRequest, Message, StreamEvent };

/// Events of one exchange: deltas in provider order, then at most one `Completed`.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

const EVENT_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Validating,
    PersistingUserMessage,
    Streaming,
    PersistingAssistantMessage,
    Completed,
    Failed,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Failures that reject the request before any event is produced.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Conversation not found")]
    NotFound,
    #[error("failed to record message: {0}")]
    Store(#[from] StoreError),
}

impl From<GuardError> for DispatchError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::NotFound => DispatchError::NotFound,
            GuardError::Store(e) => DispatchError::Store(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Longest wait for the next provider chunk.
    pub provider_timeout: Duration,
    /// Prior messages handed to the provider as context; 0 keeps prompts single-turn.
    pub history_context_limit: usize,
    pub prompts: Arc<PromptConfig>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(120),
            history_context_limit: 10,
            prompts: Arc::new(PromptConfig::default()),
        }
    }
}

impl From<&RelayConfig> for DispatchSettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            provider_timeout: config.provider_timeout,
            history_context_limit: config.history_context_limit,
            prompts: Arc::clone(&config.prompts),
        }
    }
}

/// Orchestrates one chat exchange per call. Holds no state between calls;
/// everything durable goes through the store.
#[derive(Clone)]
pub struct ChatDispatcher {
    store: Arc<dyn ConversationStore>,
    guard: OwnershipGuard,
    registry: ProviderRegistry,
    settings: DispatchSettings,
}

impl ChatDispatcher {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        registry: ProviderRegistry,
        settings: DispatchSettings
    ) -> Self {
        Self {
            guard: OwnershipGuard::new(Arc::clone(&store)),
            store,
            registry,
            settings,
        }
    }

    pub fn guard(&self) -> &OwnershipGuard {
        &self.guard
    }

    /// Validates ownership and records the user message, then hands back the
    /// live event stream. Errors here mean nothing was streamed; a not-found
    /// rejection also means nothing was written.
    ///
    /// Not idempotent: every call records a new user/assistant pair.
    pub async fn dispatch(
        &self,
        caller: &CallerIdentity,
        request: ChatRequest
    ) -> Result<EventStream, DispatchError> {
        let mut exchange = Exchange {
            store: Arc::clone(&self.store),
            registry: self.registry.clone(),
            settings: self.settings.clone(),
            request,
            state: DispatchState::Validating,
        };

        let user_message = match exchange.validate_and_record(&self.guard, caller).await {
            Ok(message) => message,
            Err(e) => {
                exchange.transition(DispatchState::Failed);
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(exchange.run(user_message, tx));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

struct Exchange {
    store: Arc<dyn ConversationStore>,
    registry: ProviderRegistry,
    settings: DispatchSettings,
    request: ChatRequest,
    state: DispatchState,
}

/// Text relayed in place of a provider failure.
fn inline_error_text(err: &ProviderError, accumulated: &str) -> String {
    if accumulated.is_empty() {
        format!("Error: {}", err)
    } else {
        format!("\n\nError: {}", err)
    }
}

impl Exchange {
    fn transition(&mut self, next: DispatchState) {
        debug!(
            "dispatch [{}]: {} -> {}",
            self.request.conversation_id,
            self.state,
            next
        );
        self.state = next;
    }

    async fn validate_and_record(
        &mut self,
        guard: &OwnershipGuard,
        caller: &CallerIdentity
    ) -> Result<Message, DispatchError> {
        let conversation = guard.authorize(caller, &self.request.conversation_id).await?;

        self.transition(DispatchState::PersistingUserMessage);
        let user_message = Message::user(&conversation.id, &self.request.content);
        self.store.insert_message(&user_message).await?;
        Ok(user_message)
    }

    async fn load_context(&self, user_message: &Message) -> Vec<ChatTurn> {
        let limit = self.settings.history_context_limit;
        if limit == 0 {
            return Vec::new();
        }
        match self.store.recent_messages(&user_message.conversation_id, limit + 1).await {
            Ok(messages) => {
                let prior: Vec<ChatTurn> = messages
                    .into_iter()
                    .filter(|m| m.id != user_message.id)
                    .map(|m| ChatTurn { role: m.role, content: m.content })
                    .collect();
                let skip = prior.len().saturating_sub(limit);
                prior.into_iter().skip(skip).collect()
            }
            Err(e) => {
                warn!(
                    "Could not load history for {}, continuing without context: {}",
                    user_message.conversation_id,
                    e
                );
                Vec::new()
            }
        }
    }

    /// Relays provider chunks until the provider finishes, fails or stalls.
    /// Returns `None` when the caller went away mid-stream.
    async fn stream_answer(
        &self,
        client: Arc<dyn ChatClient>,
        resolved: &ResolvedModel,
        prompt: ChatPrompt,
        tx: &mpsc::Sender<StreamEvent>
    ) -> Option<String> {
        let mut chunks = client.send(prompt);
        let mut buffer = String::new();
        let timeout = self.settings.provider_timeout;

        loop {
            let next = tokio::select! {
                _ = tx.closed() => return None,
                next = tokio::time::timeout(timeout, chunks.next()) => next,
            };

            let failure = match next {
                Ok(Some(Ok(chunk))) => {
                    buffer.push_str(&chunk);
                    if tx.send(StreamEvent::Delta(chunk)).await.is_err() {
                        return None;
                    }
                    continue;
                }
                Ok(None) => {
                    return Some(buffer);
                }
                Ok(Some(Err(err))) => err,
                Err(_) =>
                    ProviderError::Timeout {
                        provider: resolved.family,
                        elapsed: timeout,
                    },
            };

            warn!(
                "Provider {} failed for conversation {}: {}",
                resolved.family,
                self.request.conversation_id,
                failure
            );
            let text = inline_error_text(&failure, &buffer);
            buffer.push_str(&text);
            if tx.send(StreamEvent::Delta(text)).await.is_err() {
                return None;
            }
            return Some(buffer);
        }
    }

    async fn run(mut self, user_message: Message, tx: mpsc::Sender<StreamEvent>) {
        self.transition(DispatchState::Streaming);
        let (client, resolved) = self.registry.resolve(&self.request.model);
        let prompt = ChatPrompt {
            model: resolved.model.clone(),
            system_prompt: self.settings.prompts.system_prompt_for_tag(&self.request.task_type).to_string(),
            context: self.load_context(&user_message).await,
            user_text: self.request.content.clone(),
        };
        info!(
            "Dispatching conversation {} to {} / {} (task={}, context={} turns)",
            user_message.conversation_id,
            resolved.family,
            resolved.model,
            self.request.task_type,
            prompt.context.len()
        );

        let Some(answer) = self.stream_answer(client, &resolved, prompt, &tx).await else {
            warn!(
                "Caller disconnected from conversation {}; assistant message not recorded",
                user_message.conversation_id
            );
            self.transition(DispatchState::Failed);
            return;
        };

        if tx.is_closed() {
            warn!(
                "Caller disconnected from conversation {} before completion; assistant message not recorded",
                user_message.conversation_id
            );
            self.transition(DispatchState::Failed);
            return;
        }

        self.transition(DispatchState::PersistingAssistantMessage);
        let assistant = Message::assistant(
            &user_message.conversation_id,
            answer,
            &resolved.model,
            user_message.created_at
        );
        if let Err(e) = self.store.insert_message(&assistant).await {
            error!("Failed to record assistant message for {}: {}", assistant.conversation_id, e);
            self.transition(DispatchState::Failed);
            return;
        }
        let touched_at = Utc::now().max(assistant.created_at);
        if let Err(e) = self.store.touch_conversation(&assistant.conversation_id, touched_at).await {
            error!("Failed to update conversation {}: {}", assistant.conversation_id, e);
            self.transition(DispatchState::Failed);
            return;
        }

        self.transition(DispatchState::Completed);
        if tx.send(StreamEvent::Completed { message_id: assistant.id }).await.is_err() {
            debug!("Caller left before the terminal event for {}", assistant.conversation_id);
        }
    }
}
