use log::debug;
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE } };
use serde::{ Deserialize, Serialize };
use std::error::Error as StdError;

use super::{
    error_stream,
    http_stream_generate,
    sse_data,
    ChatClient,
    ChatPrompt,
    ChatTurn,
    ChunkStream,
    ProviderError,
    StreamLine,
};
use crate::llm::{ LlmConfig, ProviderFamily };
use crate::models::chat::Role;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicChatClient {
    http: HttpClient,
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
}

#[derive(Serialize, Debug, PartialEq)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<AnthropicMessage>,
    stream: bool,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicEvent {
    ContentBlockDelta {
        delta: AnthropicDelta,
    },
    MessageStop,
    Error {
        error: AnthropicErrorBody,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct AnthropicDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

fn parse_anthropic_line(line: &str) -> StreamLine {
    let Some(data) = sse_data(line) else {
        return StreamLine::Skip;
    };
    if data.is_empty() {
        return StreamLine::Skip;
    }
    match serde_json::from_str::<AnthropicEvent>(data) {
        Ok(AnthropicEvent::ContentBlockDelta { delta }) =>
            match delta.text {
                Some(text) if !text.is_empty() => StreamLine::Chunk(text),
                _ => StreamLine::Skip,
            }
        Ok(AnthropicEvent::MessageStop) => StreamLine::Done,
        Ok(AnthropicEvent::Error { error }) => StreamLine::Error(error.message),
        Ok(AnthropicEvent::Other) => StreamLine::Skip,
        Err(e) => StreamLine::Error(format!("unparseable event ({}): {}", e, data)),
    }
}

/// The Messages API wants alternating turns that open with `user`; drop
/// leading assistant turns and fold consecutive same-role turns together.
fn build_messages(context: &[ChatTurn], user_text: &str) -> Vec<AnthropicMessage> {
    let mut messages: Vec<AnthropicMessage> = Vec::with_capacity(context.len() + 1);
    let turns = context
        .iter()
        .map(|turn| (turn.role, turn.content.as_str()))
        .chain(std::iter::once((Role::User, user_text)))
        .skip_while(|(role, _)| *role == Role::Assistant);

    for (role, content) in turns {
        match messages.last_mut() {
            Some(last) if last.role == role.as_str() => {
                last.content.push_str("\n\n");
                last.content.push_str(content);
            }
            _ =>
                messages.push(AnthropicMessage {
                    role: role.as_str(),
                    content: content.to_string(),
                }),
        }
    }
    messages
}

impl AnthropicChatClient {
    pub fn new(
        api_key: Option<String>,
        base_url: Option<String>,
        max_tokens: u32
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));

        let http = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Box::new(e) as Box<dyn StdError + Send + Sync>)?;

        Ok(Self {
            http,
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            max_tokens,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        Self::new(config.api_key.clone(), config.base_url.clone(), config.max_tokens)
    }
}

impl ChatClient for AnthropicChatClient {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Anthropic
    }

    fn send(&self, prompt: ChatPrompt) -> ChunkStream {
        let Some(api_key) = self.api_key.as_deref() else {
            return error_stream(ProviderError::Configuration {
                provider: ProviderFamily::Anthropic,
                message: "ANTHROPIC_API_KEY is not set".to_string(),
            });
        };

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        debug!("Anthropic stream → model={} url={}", prompt.model, url);

        let req = AnthropicRequest {
            model: prompt.model.clone(),
            max_tokens: self.max_tokens,
            system: prompt.system_prompt.clone(),
            messages: build_messages(&prompt.context, &prompt.user_text),
            stream: true,
        };

        let request = self.http.post(&url).header("x-api-key", api_key).json(&req);

        http_stream_generate(ProviderFamily::Anthropic, request, parse_anthropic_line, true)
    }
}
