use chrono::{ DateTime, Duration, Utc };
use serde::{ Serialize, Deserialize };
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(user_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            title: title.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    /// Set only on assistant messages.
    #[serde(rename = "model_used")]
    pub model: Option<String>,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            role: Role::User,
            content: content.into(),
            model: None,
            created_at: Utc::now(),
        }
    }

    /// Assistant reply stamped strictly after `after`, the user message it answers.
    pub fn assistant(
        conversation_id: impl Into<String>,
        content: impl Into<String>,
        model: impl Into<String>,
        after: DateTime<Utc>
    ) -> Self {
        let earliest = after + Duration::microseconds(1);
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            role: Role::Assistant,
            content: content.into(),
            model: Some(model.into()),
            created_at: Utc::now().max(earliest),
        }
    }
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_task_type() -> String {
    "general".to_string()
}

/// Body of `POST /api/chat`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub content: String,
    #[serde(alias = "conversationId")]
    pub conversation_id: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_task_type", alias = "taskType")]
    pub task_type: String,
}

fn default_title() -> String {
    "New Chat".to_string()
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default = "default_title")]
    pub title: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RenameConversationRequest {
    pub title: String,
}

/// One event of a streamed exchange. Nothing follows `Completed`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Completed {
        message_id: String,
    },
}

/// Wire shape of a [`StreamEvent`].
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFrame {
    pub content: String,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message_id: Option<String>,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Completed { .. })
    }

    pub fn to_frame(&self) -> StreamFrame {
        match self {
            StreamEvent::Delta(content) =>
                StreamFrame {
                    content: content.clone(),
                    done: false,
                    message_id: None,
                },
            StreamEvent::Completed { message_id } =>
                StreamFrame {
                    content: String::new(),
                    done: true,
                    message_id: Some(message_id.clone()),
                },
        }
    }
}
