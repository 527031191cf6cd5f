pub mod openai;
pub mod gemini;
pub mod anthropic;

use futures::{ Future, Stream, StreamExt };
use serde_json::Value as JsonValue;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::ProviderFamily;
use crate::models::chat::Role;

/// Lazy, finite, non-restartable sequence of answer chunks. The stream ends
/// cleanly on a completed answer; a failure is delivered as one final `Err`.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{provider} rejected the API credentials: {message}")]
    Authentication {
        provider: ProviderFamily,
        message: String,
    },
    #[error("{provider} rate limit exceeded: {message}")]
    RateLimited {
        provider: ProviderFamily,
        message: String,
    },
    #[error("{provider} returned HTTP {status}: {message}")]
    Upstream {
        provider: ProviderFamily,
        status: u16,
        message: String,
    },
    #[error("transport error talking to {provider}: {message}")]
    Transport {
        provider: ProviderFamily,
        message: String,
    },
    #[error("malformed response from {provider}: {message}")]
    Malformed {
        provider: ProviderFamily,
        message: String,
    },
    #[error("{provider} produced nothing for {elapsed:?}")]
    Timeout {
        provider: ProviderFamily,
        elapsed: Duration,
    },
    #[error("{provider} is not configured: {message}")]
    Configuration {
        provider: ProviderFamily,
        message: String,
    },
}

impl ProviderError {
    pub fn transport(provider: ProviderFamily, err: reqwest::Error) -> Self {
        ProviderError::Transport { provider, message: err.to_string() }
    }

    pub fn malformed(provider: ProviderFamily, message: impl Into<String>) -> Self {
        ProviderError::Malformed { provider, message: message.into() }
    }

    pub fn from_status(provider: ProviderFamily, status: u16, body: &str) -> Self {
        let message = extract_error_summary(body);
        match status {
            401 | 403 => ProviderError::Authentication { provider, message },
            429 => ProviderError::RateLimited { provider, message },
            _ => ProviderError::Upstream { provider, status, message },
        }
    }
}

/// Pulls a readable message out of a provider error body, falling back to the
/// raw text (truncated).
pub fn extract_error_summary(body: &str) -> String {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str::<JsonValue>(trimmed) {
        let summary = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .or_else(|| value.get("error").and_then(|v| v.as_str()))
            .or_else(|| value.get("message").and_then(|v| v.as_str()));
        if let Some(text) = summary {
            return text.split_whitespace().collect::<Vec<_>>().join(" ");
        }
    }
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

/// Everything one provider call needs.
#[derive(Debug, Clone)]
pub struct ChatPrompt {
    pub model: String,
    pub system_prompt: String,
    pub context: Vec<ChatTurn>,
    pub user_text: String,
}

/// One provider family's adapter. Implementations make a single outbound call
/// per `send` and perform no local persistence.
pub trait ChatClient: Send + Sync {
    fn family(&self) -> ProviderFamily;

    fn send(&self, prompt: ChatPrompt) -> ChunkStream;
}

/// Result of interpreting one line of a provider's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLine {
    Chunk(String),
    Done,
    Error(String),
    Skip,
}

/// Payload of an SSE `data:` line, if the line is one.
pub fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

pub fn error_stream(err: ProviderError) -> ChunkStream {
    Box::pin(futures::stream::once(async move { Err(err) }))
}

pub fn create_streaming_response<F, Fut>(response_fn: F) -> ChunkStream
    where
        F: FnOnce(mpsc::Sender<Result<String, ProviderError>>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static
{
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        response_fn(tx).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

/// Sends `request` and relays the response body line by line through
/// `line_parser`. When `requires_terminator` is set, a body that ends without a
/// `StreamLine::Done` is reported as malformed rather than complete.
///
/// The pump stops as soon as the returned stream is dropped.
pub fn http_stream_generate(
    provider: ProviderFamily,
    request: reqwest::RequestBuilder,
    line_parser: fn(&str) -> StreamLine,
    requires_terminator: bool
) -> ChunkStream {
    create_streaming_response(move |tx| async move {
        let resp = tokio::select! {
            _ = tx.closed() => return,
            sent = request.send() => match sent {
                Ok(r) => r,
                Err(e) => {
                    let _ = tx.send(Err(ProviderError::transport(provider, e))).await;
                    return;
                }
            },
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let _ = tx.send(Err(ProviderError::from_status(provider, status.as_u16(), &body))).await;
            return;
        }

        let mut bytes = resp.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let next = tokio::select! {
                _ = tx.closed() => return,
                next = bytes.next() => next,
            };
            match next {
                Some(Ok(buf)) => {
                    buffer.extend_from_slice(&buf);
                    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                        let raw: Vec<u8> = buffer.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&raw);
                        match line_parser(line.trim_end_matches(['\r', '\n'])) {
                            StreamLine::Chunk(text) => {
                                if tx.send(Ok(text)).await.is_err() {
                                    return;
                                }
                            }
                            StreamLine::Done => {
                                return;
                            }
                            StreamLine::Error(message) => {
                                let _ = tx.send(Err(ProviderError::malformed(provider, message))).await;
                                return;
                            }
                            StreamLine::Skip => {}
                        }
                    }
                }
                Some(Err(e)) => {
                    let _ = tx.send(Err(ProviderError::transport(provider, e))).await;
                    return;
                }
                None => {
                    break;
                }
            }
        }

        if !buffer.is_empty() {
            let line = String::from_utf8_lossy(&buffer).to_string();
            match line_parser(line.trim_end_matches('\r')) {
                StreamLine::Chunk(text) => {
                    if tx.send(Ok(text)).await.is_err() {
                        return;
                    }
                }
                StreamLine::Done => {
                    return;
                }
                StreamLine::Error(message) => {
                    let _ = tx.send(Err(ProviderError::malformed(provider, message))).await;
                    return;
                }
                StreamLine::Skip => {}
            }
        }

        if requires_terminator {
            let _ = tx.send(
                Err(ProviderError::malformed(provider, "stream ended before the completion marker"))
            ).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_error_kinds() {
        let auth = ProviderError::from_status(
            ProviderFamily::OpenAI,
            401,
            r#"{"error": {"message": "Incorrect API key   provided"}}"#
        );
        assert_eq!(auth, ProviderError::Authentication {
            provider: ProviderFamily::OpenAI,
            message: "Incorrect API key provided".to_string(),
        });

        let limited = ProviderError::from_status(ProviderFamily::Anthropic, 429, "slow down");
        assert!(matches!(limited, ProviderError::RateLimited { .. }));

        let upstream = ProviderError::from_status(ProviderFamily::Gemini, 500, "");
        assert_eq!(upstream.to_string(), "gemini returned HTTP 500: <empty body>");
    }

    #[test]
    fn sse_data_strips_prefix() {
        assert_eq!(sse_data("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_data("data:[DONE]"), Some("[DONE]"));
        assert_eq!(sse_data("event: ping"), None);
    }

    #[tokio::test]
    async fn error_stream_yields_single_error() {
        let err = ProviderError::Configuration {
            provider: ProviderFamily::Gemini,
            message: "missing key".into(),
        };
        let items: Vec<_> = error_stream(err.clone()).collect().await;
        assert_eq!(items, vec![Err(err)]);
    }

    #[tokio::test]
    async fn streaming_response_relays_in_order() {
        let stream = create_streaming_response(|tx| async move {
            for part in ["a", "b", "c"] {
                let _ = tx.send(Ok(part.to_string())).await;
            }
        });
        let items: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(items, vec!["a", "b", "c"]);
    }

    /// Serves one HTTP response whose body is written in separate pieces,
    /// returning the URL to request.
    async fn serve_in_pieces(status: &'static str, pieces: Vec<&'static [u8]>) -> String {
        use tokio::io::{ AsyncReadExt, AsyncWriteExt };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                head.extend_from_slice(&buf[..n]);
            }
            let response_head = format!(
                "HTTP/1.1 {}\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n",
                status
            );
            socket.write_all(response_head.as_bytes()).await.unwrap();
            for piece in pieces {
                socket.write_all(piece).await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            let _ = socket.shutdown().await;
        });
        format!("http://{}/stream", addr)
    }

    fn data_lines(line: &str) -> StreamLine {
        match sse_data(line) {
            Some("[DONE]") => StreamLine::Done,
            Some(data) if !data.is_empty() => StreamLine::Chunk(data.to_string()),
            _ => StreamLine::Skip,
        }
    }

    async fn pump(url: &str, requires_terminator: bool) -> Vec<Result<String, ProviderError>> {
        let request = reqwest::Client::new().post(url);
        http_stream_generate(ProviderFamily::OpenAI, request, data_lines, requires_terminator)
            .collect().await
    }

    #[tokio::test]
    async fn pump_rejoins_lines_split_inside_a_character() {
        let url = serve_in_pieces("200 OK", vec![
            &b"data: H\xc3"[..],
            &b"\xa9\n\n"[..],
            &b"data: llo\n"[..],
            &b"data: [DONE]\n"[..],
        ]).await;
        assert_eq!(pump(&url, true).await, vec![Ok("H\u{e9}".to_string()), Ok("llo".to_string())]);
    }

    #[tokio::test]
    async fn pump_reports_body_that_ends_without_terminator() {
        let url = serve_in_pieces("200 OK", vec![&b"data: partial"[..], &b" answer\n"[..]]).await;
        assert_eq!(pump(&url, true).await, vec![
            Ok("partial answer".to_string()),
            Err(ProviderError::malformed(ProviderFamily::OpenAI, "stream ended before the completion marker")),
        ]);
    }

    #[tokio::test]
    async fn pump_flushes_trailing_line_when_terminator_is_optional() {
        let url = serve_in_pieces("200 OK", vec![&b"data: one\n"[..], &b"data: two"[..]]).await;
        assert_eq!(pump(&url, false).await, vec![Ok("one".to_string()), Ok("two".to_string())]);
    }

    #[tokio::test]
    async fn pump_maps_error_statuses_before_reading_events() {
        let url = serve_in_pieces("429 Too Many Requests", vec![
            &br#"{"error": {"message": "slow down"}}"#[..],
        ]).await;
        assert_eq!(pump(&url, true).await, vec![
            Err(ProviderError::RateLimited {
                provider: ProviderFamily::OpenAI,
                message: "slow down".to_string(),
            }),
        ]);

        let url = serve_in_pieces("401 Unauthorized", vec![&br#"{"error": "bad key"}"#[..]]).await;
        assert_eq!(pump(&url, true).await, vec![
            Err(ProviderError::Authentication {
                provider: ProviderFamily::OpenAI,
                message: "bad key".to_string(),
            }),
        ]);
    }
}
