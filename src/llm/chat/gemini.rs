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
    ChunkStream,
    ProviderError,
    StreamLine,
};
use crate::llm::{ LlmConfig, ProviderFamily };
use crate::models::chat::Role;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamRequest {
    system_instruction: GeminiContent,
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    max_output_tokens: u32,
}

#[derive(Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GoogleChunk {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
    error: Option<GoogleError>,
}

#[derive(Deserialize)]
struct GoogleCandidate {
    content: Option<GoogleContent>,
}

#[derive(Deserialize)]
struct GoogleContent {
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Deserialize)]
struct GooglePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct GoogleError {
    message: String,
}

fn parse_gemini_line(line: &str) -> StreamLine {
    let Some(data) = sse_data(line) else {
        return StreamLine::Skip;
    };
    if data.is_empty() {
        return StreamLine::Skip;
    }
    match serde_json::from_str::<GoogleChunk>(data) {
        Ok(chunk) => {
            if let Some(err) = chunk.error {
                return StreamLine::Error(err.message);
            }
            let text: String = chunk.candidates
                .first()
                .and_then(|c| c.content.as_ref())
                .map(|content| {
                    content.parts
                        .iter()
                        .filter_map(|p| p.text.as_deref())
                        .collect()
                })
                .unwrap_or_default();
            if text.is_empty() { StreamLine::Skip } else { StreamLine::Chunk(text) }
        }
        Err(e) => StreamLine::Error(format!("unparseable chunk ({}): {}", e, data)),
    }
}

fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

pub struct GeminiChatClient {
    http: HttpClient,
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
}

impl GeminiChatClient {
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

    fn build_request(&self, prompt: &ChatPrompt) -> GeminiStreamRequest {
        let mut contents: Vec<GeminiContent> = prompt.context
            .iter()
            .map(|turn| GeminiContent {
                role: Some(gemini_role(turn.role)),
                parts: vec![GeminiPart { text: turn.content.clone() }],
            })
            .collect();
        contents.push(GeminiContent {
            role: Some("user"),
            parts: vec![GeminiPart { text: prompt.user_text.clone() }],
        });

        GeminiStreamRequest {
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart { text: prompt.system_prompt.clone() }],
            },
            contents,
            generation_config: GeminiGenerationConfig { max_output_tokens: self.max_tokens },
        }
    }
}

impl ChatClient for GeminiChatClient {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Gemini
    }

    fn send(&self, prompt: ChatPrompt) -> ChunkStream {
        let Some(api_key) = self.api_key.as_deref() else {
            return error_stream(ProviderError::Configuration {
                provider: ProviderFamily::Gemini,
                message: "GEMINI_API_KEY is not set".to_string(),
            });
        };

        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            prompt.model
        );
        debug!("Gemini stream → model={} url={}", prompt.model, url);

        let request = self.http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&self.build_request(&prompt));

        // Gemini has no end-of-stream sentinel; a clean close is a complete answer.
        http_stream_generate(ProviderFamily::Gemini, request, parse_gemini_line, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::chat::ChatTurn;

    #[test]
    fn joins_parts_of_first_candidate() {
        let line =
            r#"data: {"candidates":[{"content":{"parts":[{"text":"Hello"},{"text":", world"}],"role":"model"}}]}"#;
        assert_eq!(parse_gemini_line(line), StreamLine::Chunk("Hello, world".to_string()));
    }

    #[test]
    fn finish_only_chunks_are_skipped() {
        let line = r#"data: {"candidates":[{"finishReason":"STOP"}],"usageMetadata":{}}"#;
        assert_eq!(parse_gemini_line(line), StreamLine::Skip);
    }

    #[test]
    fn error_payload_is_an_error() {
        let line = r#"data: {"error":{"code":400,"message":"API key not valid"}}"#;
        assert_eq!(parse_gemini_line(line), StreamLine::Error("API key not valid".to_string()));
    }

    #[test]
    fn request_uses_model_role_for_assistant_turns() {
        let client = GeminiChatClient::new(Some("k".into()), None, 64).unwrap();
        let prompt = ChatPrompt {
            model: "gemini-1.5-pro".into(),
            system_prompt: "sys".into(),
            context: vec![ChatTurn { role: Role::Assistant, content: "earlier".into() }],
            user_text: "now".into(),
        };
        let body = serde_json::to_value(client.build_request(&prompt)).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
        assert!(body["systemInstruction"].get("role").is_none());
        assert_eq!(body["contents"][0]["role"], "model");
        assert_eq!(body["contents"][1]["role"], "user");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 64);
    }
}
