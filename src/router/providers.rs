//! Provider-kind dispatch (spec §4.2): native streaming chat (newline-delimited JSON
//! chunks) and OpenAI-compatible streaming chat (SSE). Both funnel into the same
//! `StreamChunk` shape so the Router and Engine don't need to know which wire format
//! backs a given model.

use super::ModelCallError;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;

/// A live, incrementally-produced sequence of chunks from a provider's streaming
/// response. Dropping the stream drops the underlying `reqwest` body and closes the
/// connection, which is how cancellation reaches an in-flight model call.
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum StreamChunk {
    Token(String),
    Thinking(String),
    Usage(TokenUsage),
    Done { finish_reason: Option<String> },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<usize>,
    pub completion_tokens: Option<usize>,
    pub total_tokens: Option<usize>,
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> ModelCallError {
    if status.as_u16() == 429 {
        return ModelCallError::RateLimited { retry_after: None };
    }
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return ModelCallError::AuthFailed(format!("{status}: {body}"));
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return ModelCallError::NotFound(format!("{status}: {body}"));
    }
    let lowered = body.to_lowercase();
    if lowered.contains("quota") || lowered.contains("insufficient_quota") || lowered.contains("billing") {
        return ModelCallError::QuotaExhausted(format!("{status}: {body}"));
    }
    if status.is_server_error() {
        return ModelCallError::Transient(format!("{status}: {body}"));
    }
    ModelCallError::Transient(format!("{status}: {body}"))
}

fn retry_after_from_headers(resp: &reqwest::Response) -> Option<std::time::Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(std::time::Duration::from_secs)
}

/// Native streaming chat provider: posts `{model, messages, stream: true}` and
/// consumes newline-delimited JSON objects carrying token deltas and a terminal
/// `done` object, in the style of Ollama's native chat API.
#[derive(Clone)]
pub struct NativeClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct NativeChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct NativeChatLine {
    #[serde(default)]
    message: Option<NativeMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<usize>,
    #[serde(default)]
    eval_count: Option<usize>,
}

#[derive(Deserialize)]
struct NativeMessage {
    #[serde(default)]
    content: String,
}

impl NativeClient {
    pub fn new(base_url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }

    /// Single-shot call aggregated from the live stream, used by the Router's
    /// retry/fallback bookkeeping and anywhere a caller just wants the final text.
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String, ModelCallError> {
        let mut stream = self.chat_stream(messages).await?;
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            if let StreamChunk::Token(t) = chunk {
                out.push_str(&t);
            }
        }
        Ok(out)
    }

    /// Opens the connection and, once the response headers confirm success, returns
    /// a stream that decodes newline-delimited JSON objects as bytes arrive off the
    /// wire — no buffering of the full body first.
    pub async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<ChunkStream, ModelCallError> {
        let url = format!("{}/api/chat", self.base_url);
        let req = NativeChatRequest {
            model: &self.model,
            messages,
            stream: true,
        };
        let mut rb = self.http.post(url).json(&req);
        if let Some(key) = &self.api_key {
            rb = rb.header("Authorization", format!("Bearer {key}"));
        }
        let resp = rb
            .send()
            .await
            .map_err(|e| ModelCallError::Transient(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let retry_after = retry_after_from_headers(&resp);
            let body = resp.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(ModelCallError::RateLimited { retry_after });
            }
            return Err(classify_status(status, &body));
        }

        let byte_stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
        let reader = StreamReader::new(byte_stream);
        let lines = FramedRead::new(reader, LinesCodec::new());

        let chunks = lines.flat_map(|line_result| {
            let mut out = Vec::new();
            if let Ok(line) = line_result {
                if !line.trim().is_empty() {
                    if let Ok(parsed) = serde_json::from_str::<NativeChatLine>(&line) {
                        if let Some(msg) = parsed.message {
                            if !msg.content.is_empty() {
                                out.push(StreamChunk::Token(msg.content));
                            }
                        }
                        if parsed.done {
                            out.push(StreamChunk::Usage(TokenUsage {
                                prompt_tokens: parsed.prompt_eval_count,
                                completion_tokens: parsed.eval_count,
                                total_tokens: match (parsed.prompt_eval_count, parsed.eval_count) {
                                    (Some(p), Some(c)) => Some(p + c),
                                    _ => None,
                                },
                            }));
                            out.push(StreamChunk::Done { finish_reason: Some("stop".to_string()) });
                        }
                    }
                }
            }
            futures_util::stream::iter(out)
        });

        Ok(Box::pin(chunks))
    }
}

/// OpenAI-compatible streaming chat provider: consumes SSE `data:` lines terminated
/// by `[DONE]`, in the style of OpenAI-compatible chat completion APIs.
#[derive(Clone)]
pub struct OpenAiCompatClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAiChunk {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    delta: OpenAiDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(base_url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }

    /// Single-shot call aggregated from the live stream.
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String, ModelCallError> {
        let mut stream = self.chat_stream(messages).await?;
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            if let StreamChunk::Token(t) = chunk {
                out.push_str(&t);
            }
        }
        Ok(out)
    }

    /// Opens the connection and, once the response headers confirm success, returns
    /// a stream that decodes SSE `data:` lines as bytes arrive off the wire.
    pub async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<ChunkStream, ModelCallError> {
        let url = format!("{}/chat/completions", self.base_url);
        let req = OpenAiChatRequest {
            model: &self.model,
            messages,
            stream: true,
        };
        let mut rb = self.http.post(url).json(&req);
        if let Some(key) = &self.api_key {
            rb = rb.header("Authorization", format!("Bearer {key}"));
        }
        let resp = rb
            .send()
            .await
            .map_err(|e| ModelCallError::Transient(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let retry_after = retry_after_from_headers(&resp);
            let body = resp.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(ModelCallError::RateLimited { retry_after });
            }
            return Err(classify_status(status, &body));
        }

        let byte_stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
        let reader = StreamReader::new(byte_stream);
        let lines = FramedRead::new(reader, LinesCodec::new());

        let chunks = lines.flat_map(|line_result| {
            let mut out = Vec::new();
            if let Ok(line) = line_result {
                if let Some(data) = line.strip_prefix("data:") {
                    let data = data.trim();
                    if data == "[DONE]" {
                        out.push(StreamChunk::Done { finish_reason: Some("stop".to_string()) });
                    } else if let Ok(chunk) = serde_json::from_str::<OpenAiChunk>(data) {
                        for choice in &chunk.choices {
                            if let Some(content) = choice.delta.content.clone() {
                                if !content.is_empty() {
                                    out.push(StreamChunk::Token(content));
                                }
                            }
                        }
                        if let Some(usage) = chunk.usage {
                            out.push(StreamChunk::Usage(usage));
                        }
                    }
                }
            }
            futures_util::stream::iter(out)
        });

        Ok(Box::pin(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_429_as_rate_limited() {
        let err = classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "");
        assert!(matches!(err, ModelCallError::RateLimited { .. }));
    }

    #[test]
    fn classify_401_as_auth_failed() {
        let err = classify_status(reqwest::StatusCode::UNAUTHORIZED, "bad key");
        assert!(matches!(err, ModelCallError::AuthFailed(_)));
    }

    #[test]
    fn classify_quota_body_even_on_403() {
        let err = classify_status(reqwest::StatusCode::FORBIDDEN, "quota exceeded");
        assert!(matches!(err, ModelCallError::AuthFailed(_)));
    }

    #[test]
    fn classify_5xx_as_transient() {
        let err = classify_status(reqwest::StatusCode::BAD_GATEWAY, "oops");
        assert!(matches!(err, ModelCallError::Transient(_)));
    }
}
