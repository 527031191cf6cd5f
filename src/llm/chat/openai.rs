use log::debug;
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };
use std::error::Error as StdError;

use super::{
    error_stream,
    http_stream_generate,
    sse_data,
    ChatClient,
    ChatPrompt,
    ChunkStream,
    ProviderError,
    StreamLine,
};
use crate::llm::{ LlmConfig, ProviderFamily };

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAIChatClient {
    http: HttpClient,
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_completion_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAIStreamResponse {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    error: Option<OpenAIErrorBody>,
}

#[derive(Deserialize)]
struct OpenAIErrorBody {
    message: String,
}

#[derive(Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIDelta,
}

#[derive(Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
}

fn parse_openai_line(line: &str) -> StreamLine {
    let Some(data) = sse_data(line) else {
        return StreamLine::Skip;
    };
    if data.is_empty() {
        return StreamLine::Skip;
    }
    if data == "[DONE]" {
        return StreamLine::Done;
    }
    match serde_json::from_str::<OpenAIStreamResponse>(data) {
        Ok(resp) => {
            if let Some(err) = resp.error {
                return StreamLine::Error(err.message);
            }
            let text: String = resp.choices
                .into_iter()
                .filter_map(|choice| choice.delta.content)
                .collect();
            if text.is_empty() { StreamLine::Skip } else { StreamLine::Chunk(text) }
        }
        Err(e) => StreamLine::Error(format!("unparseable chunk ({}): {}", e, data)),
    }
}

fn build_messages(prompt: &ChatPrompt) -> Vec<OpenAIMessage> {
    let mut messages = Vec::with_capacity(prompt.context.len() + 2);
    messages.push(OpenAIMessage {
        role: "system".to_string(),
        content: prompt.system_prompt.clone(),
    });
    for turn in &prompt.context {
        messages.push(OpenAIMessage {
            role: turn.role.as_str().to_string(),
            content: turn.content.clone(),
        });
    }
    messages.push(OpenAIMessage {
        role: "user".to_string(),
        content: prompt.user_text.clone(),
    });
    messages
}

impl OpenAIChatClient {
    pub fn new(
        api_key: Option<String>,
        base_url: Option<String>,
        max_tokens: u32
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

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

impl ChatClient for OpenAIChatClient {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::OpenAI
    }

    fn send(&self, prompt: ChatPrompt) -> ChunkStream {
        let Some(api_key) = self.api_key.as_deref() else {
            return error_stream(ProviderError::Configuration {
                provider: ProviderFamily::OpenAI,
                message: "OPENAI_API_KEY is not set".to_string(),
            });
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        debug!("OpenAI stream → model={} url={}", prompt.model, url);

        let req = OpenAIChatRequest {
            model: prompt.model.clone(),
            messages: build_messages(&prompt),
            max_completion_tokens: self.max_tokens,
            stream: true,
        };

        let request = self.http
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", api_key))
            .json(&req);

        http_stream_generate(ProviderFamily::OpenAI, request, parse_openai_line, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::chat::ChatTurn;
    use crate::models::chat::Role;
    use futures::StreamExt;

    #[test]
    fn parses_delta_lines() {
        assert_eq!(
            parse_openai_line(r#"data: {"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#),
            StreamLine::Chunk("Hel".to_string())
        );
        assert_eq!(
            parse_openai_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            StreamLine::Skip
        );
        assert_eq!(parse_openai_line("data: [DONE]"), StreamLine::Done);
        assert_eq!(parse_openai_line(": keep-alive"), StreamLine::Skip);
        assert_eq!(parse_openai_line(""), StreamLine::Skip);
    }

    #[test]
    fn in_band_errors_and_garbage_are_errors() {
        assert_eq!(
            parse_openai_line(r#"data: {"error":{"message":"overloaded"}}"#),
            StreamLine::Error("overloaded".to_string())
        );
        assert!(matches!(parse_openai_line("data: {not json"), StreamLine::Error(_)));
    }

    #[test]
    fn messages_frame_context_between_system_and_user() {
        let prompt = ChatPrompt {
            model: "gpt-4o".into(),
            system_prompt: "sys".into(),
            context: vec![
                ChatTurn { role: Role::User, content: "hi".into() },
                ChatTurn { role: Role::Assistant, content: "hello".into() }
            ],
            user_text: "2+2?".into(),
        };
        let roles: Vec<String> = build_messages(&prompt)
            .into_iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    }

    #[tokio::test]
    async fn missing_key_is_a_single_configuration_error() {
        let client = OpenAIChatClient::new(None, None, 16).unwrap();
        let prompt = ChatPrompt {
            model: "gpt-4o".into(),
            system_prompt: String::new(),
            context: Vec::new(),
            user_text: "hi".into(),
        };
        let items: Vec<_> = client.send(prompt).collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(ProviderError::Configuration { .. })));
    }
}
