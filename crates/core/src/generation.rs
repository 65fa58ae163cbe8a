//! Text generation against an OpenAI-compatible `/chat/completions` endpoint.

use crate::error::RagError;
use crate::models::Prompt;
use crate::openai::{send_with_retries, OpenAiConfig};
use crate::traits::{Generator, TokenStream};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

pub struct OpenAiChatGenerator {
    client: Client,
    streaming_client: Client,
    endpoint: Url,
    config: OpenAiConfig,
    model: String,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiChatGenerator {
    pub fn new(config: OpenAiConfig) -> Result<Self, RagError> {
        Ok(Self {
            client: config.client()?,
            streaming_client: config.streaming_client()?,
            endpoint: config.endpoint("chat/completions")?,
            config,
            model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: 0.0,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn request_body<'a>(&'a self, prompt: &'a Prompt, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: self.temperature,
            stream,
        }
    }
}

#[async_trait]
impl Generator for OpenAiChatGenerator {
    async fn complete(&self, prompt: &Prompt) -> Result<String, RagError> {
        let body = self.request_body(prompt, false);
        let response = send_with_retries("openai chat", self.config.max_retries, self.config.timeout, || {
            self.client
                .post(self.endpoint.clone())
                .bearer_auth(&self.config.api_key)
                .json(&body)
        })
        .await
        .map_err(RagError::Generation)?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|error| RagError::Generation(format!("malformed chat response: {error}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| RagError::Generation("chat response had no content".to_string()))
    }

    async fn stream(&self, prompt: &Prompt) -> Result<TokenStream, RagError> {
        let body = self.request_body(prompt, true);
        // retries cover stream setup only; a broken stream is terminal
        let response = send_with_retries("openai chat stream", self.config.max_retries, self.config.timeout, || {
            self.streaming_client
                .post(self.endpoint.clone())
                .bearer_auth(&self.config.api_key)
                .json(&body)
        })
        .await
        .map_err(RagError::Generation)?;

        debug!(model = %self.model, "generation stream opened");
        Ok(Box::pin(content_deltas(response.bytes_stream(), self.config.timeout)))
    }
}

/// Turns a chat-completions SSE body into content deltas. Gives up when no bytes
/// arrive for `idle`.
fn content_deltas<S, B, E>(body: S, idle: Duration) -> impl Stream<Item = Result<String, RagError>> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    try_stream! {
        let mut body = Box::pin(body);
        let mut parser = SseParser::default();
        let mut pending = Vec::new();
        let mut finished = false;

        while !finished {
            let next = tokio::time::timeout(idle, body.next()).await.map_err(|_| {
                RagError::Generation(format!("generation stream idle for {}s", idle.as_secs()))
            })?;
            match next {
                Some(chunk) => {
                    let chunk = chunk
                        .map_err(|error| RagError::Generation(format!("stream chunk error: {error}")))?;
                    pending.extend(parser.push(chunk.as_ref()));
                }
                None => {
                    pending.extend(parser.finish());
                    finished = true;
                }
            }

            for data in pending.drain(..) {
                match parse_event(&data)? {
                    StreamPayload::Done => {
                        finished = true;
                        break;
                    }
                    StreamPayload::Deltas(deltas) => {
                        for delta in deltas {
                            yield delta;
                        }
                    }
                }
            }
        }
    }
}

enum StreamPayload {
    Done,
    Deltas(Vec<String>),
}

fn parse_event(data: &str) -> Result<StreamPayload, RagError> {
    if data.trim() == "[DONE]" {
        return Ok(StreamPayload::Done);
    }
    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|error| RagError::Generation(format!("stream decode error: {error}")))?;
    Ok(StreamPayload::Deltas(
        chunk
            .choices
            .into_iter()
            .filter_map(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .collect(),
    ))
}

/// Incremental `text/event-stream` decoder returning the `data` of each complete event.
#[derive(Debug, Default)]
struct SseParser {
    buffer: Vec<u8>,
    data: String,
}

impl SseParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(position) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=position).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(std::mem::take(&mut self.data));
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                if !self.data.is_empty() {
                    self.data.push('\n');
                }
                self.data.push_str(value.strip_prefix(' ').unwrap_or(value));
            }
        }

        events
    }

    /// Flushes an event left unterminated at end of body.
    fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            events.extend(self.push(b"\n"));
        }
        if !self.data.is_empty() {
            events.push(std::mem::take(&mut self.data));
        }
        events
    }
}
