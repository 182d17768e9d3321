/*
 * Devify - Agentic Coding Assistant Engine
 * File Path: src/llm.rs
 * Responsibility: Conversation message model and the streaming model-provider interface (Anthropic Messages over SSE).
 */

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

static POOLED_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent(concat!("devify/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    /// Tool output fed back to the model; sent uphill as a user turn.
    ToolResult,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    /// Short stand-in used once the tool output has been consumed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synopsis: Option<String>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: text.into(),
            synopsis: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: text.into(),
            synopsis: None,
        }
    }

    pub fn tool_result(content: impl Into<String>, synopsis: impl Into<String>) -> Self {
        Self {
            role: MessageRole::ToolResult,
            content: content.into(),
            synopsis: Some(synopsis.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    TextDelta(String),
    /// Emitted once, when the provider call completes.
    Usage(Usage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Model request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Model API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Model stream error: {0}")]
    Stream(String),
    #[error("Model provider is not configured: {0}")]
    NotConfigured(String),
}

pub type EventStream = BoxStream<'static, Result<StreamEvent, ProviderError>>;

#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn stream(&self, request: ModelRequest) -> Result<EventStream, ProviderError>;
}

/// Folds tool results into user turns and merges same-role neighbours.
pub fn wire_messages(messages: &[Message]) -> Vec<Value> {
    let mut merged: Vec<(&'static str, String)> = Vec::new();
    for message in messages {
        let role = match message.role {
            MessageRole::Assistant => "assistant",
            MessageRole::User | MessageRole::ToolResult => "user",
        };
        match merged.last_mut() {
            Some((last_role, text)) if *last_role == role => {
                text.push_str("\n\n");
                text.push_str(&message.content);
            }
            _ => merged.push((role, message.content.clone())),
        }
    }
    merged
        .into_iter()
        .map(|(role, content)| json!({ "role": role, "content": content }))
        .collect()
}

#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Model ids available to this key.
    pub async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let response = POOLED_CLIENT
            .get(format!("{}/v1/models", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await?;
            return Err(ProviderError::Api { status, message });
        }

        let body: Value = response.json().await?;
        Ok(body["data"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    async fn stream(&self, request: ModelRequest) -> Result<EventStream, ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured(
                "set provider.api_key in devify.yml or ANTHROPIC_API_KEY".to_string(),
            ));
        }

        let payload = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "system": request.system_prompt,
            "messages": wire_messages(&request.messages),
            "stream": true,
        });

        debug!(model = %self.model, messages = request.messages.len(), "Opening model stream");
        let response = POOLED_CLIENT
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await?;
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
                .unwrap_or(body);
            return Err(ProviderError::Api { status, message });
        }

        let bytes = response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec())).boxed();
        Ok(decode_sse_stream(bytes))
    }
}

fn decode_sse_stream(bytes: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>) -> EventStream {
    struct State {
        bytes: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
        decoder: SseDecoder,
        pending: VecDeque<Result<StreamEvent, ProviderError>>,
        exhausted: bool,
    }

    let state = State {
        bytes,
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        exhausted: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.exhausted || state.decoder.is_finished() {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => state.pending.extend(state.decoder.push(&chunk)),
                Some(Err(e)) => {
                    state.exhausted = true;
                    state.pending.push_back(Err(ProviderError::Transport(e)));
                }
                None => {
                    state.exhausted = true;
                    state.pending.extend(state.decoder.finish());
                }
            }
        }
    })
    .boxed()
}

fn find_sse_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a <= b { (a, 2) } else { (b, 4) }),
        (Some(a), None) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

fn extract_sse_data(event: &str) -> Option<String> {
    let mut data: Option<String> = None;
    for line in event.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(rest) = line.strip_prefix("data:") {
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(rest);
                }
                None => data = Some(rest.to_string()),
            }
        }
    }
    data
}

/// Incremental decoder for the Anthropic Messages event stream.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    usage: Usage,
    finished: bool,
}

impl SseDecoder {
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<StreamEvent, ProviderError>> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while !self.finished {
            let Some((pos, delim_len)) = find_sse_event_boundary(&self.buffer) else {
                break;
            };
            let raw: Vec<u8> = self.buffer.drain(..pos + delim_len).take(pos).collect();
            self.handle_event(&String::from_utf8_lossy(&raw), &mut events);
        }
        events
    }

    /// Flushes a trailing event; reports usage if the stream ended without `message_stop`.
    pub fn finish(&mut self) -> Vec<Result<StreamEvent, ProviderError>> {
        let mut events = Vec::new();
        if !self.finished && !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            self.handle_event(&String::from_utf8_lossy(&raw), &mut events);
        }
        if !self.finished {
            self.finished = true;
            events.push(Ok(StreamEvent::Usage(self.usage)));
        }
        events
    }

    fn handle_event(&mut self, raw: &str, events: &mut Vec<Result<StreamEvent, ProviderError>>) {
        let Some(data) = extract_sse_data(raw) else {
            return;
        };
        if data.trim() == "[DONE]" {
            return;
        }
        let json: Value = match serde_json::from_str(&data) {
            Ok(json) => json,
            Err(e) => {
                warn!(%e, "Failed to parse SSE event");
                return;
            }
        };

        match json["type"].as_str().unwrap_or_default() {
            "message_start" => {
                let usage = &json["message"]["usage"];
                self.usage.input_tokens = usage["input_tokens"].as_u64().unwrap_or(0);
                self.usage.output_tokens = usage["output_tokens"].as_u64().unwrap_or(0);
            }
            "content_block_delta" => {
                if json["delta"]["type"] == "text_delta" {
                    if let Some(text) = json["delta"]["text"].as_str() {
                        events.push(Ok(StreamEvent::TextDelta(text.to_string())));
                    }
                }
            }
            "message_delta" => {
                if let Some(output) = json["usage"]["output_tokens"].as_u64() {
                    self.usage.output_tokens = output;
                }
                if let Some(input) = json["usage"]["input_tokens"].as_u64() {
                    self.usage.input_tokens = input;
                }
            }
            "message_stop" => {
                self.finished = true;
                events.push(Ok(StreamEvent::Usage(self.usage)));
            }
            "error" => {
                self.finished = true;
                let message = json["error"]["message"].as_str().unwrap_or("unknown error").to_string();
                events.push(Err(ProviderError::Stream(message)));
            }
            _ => {}
        }
    }
}

/// Replays canned assistant turns in order. Records every request it receives.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ModelRequest>>,
    chunk_chars: usize,
}

impl ScriptedProvider {
    pub fn new<I, S>(turns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            turns: Mutex::new(turns.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
            chunk_chars: 16,
        }
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.turns.lock().map(|t| t.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn stream(&self, request: ModelRequest) -> Result<EventStream, ProviderError> {
        let input_tokens = request.messages.iter().map(|m| m.content.len() as u64 / 4).sum();
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let turn = self
            .turns
            .lock()
            .ok()
            .and_then(|mut turns| turns.pop_front())
            .ok_or_else(|| ProviderError::Stream("script exhausted".to_string()))?;

        let chars: Vec<char> = turn.chars().collect();
        let mut events: Vec<Result<StreamEvent, ProviderError>> = chars
            .chunks(self.chunk_chars.max(1))
            .map(|chunk| Ok(StreamEvent::TextDelta(chunk.iter().collect())))
            .collect();
        events.push(Ok(StreamEvent::Usage(Usage {
            input_tokens,
            output_tokens: chars.len() as u64 / 4,
        })));
        Ok(futures_util::stream::iter(events).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse(events: &[Value]) -> String {
        events
            .iter()
            .map(|e| format!("event: {}\ndata: {}\n\n", e["type"].as_str().unwrap(), e))
            .collect()
    }

    #[test]
    fn test_decoder_emits_text_and_usage_across_chunk_boundaries() {
        let body = sse(&[
            json!({"type": "message_start", "message": {"usage": {"input_tokens": 42, "output_tokens": 1}}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hel"}}),
            json!({"type": "ping"}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "lo"}}),
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 7}}),
            json!({"type": "message_stop"}),
        ]);

        let mut decoder = SseDecoder::default();
        let mut events = Vec::new();
        for chunk in body.as_bytes().chunks(13) {
            events.extend(decoder.push(chunk).into_iter().map(|e| e.unwrap()));
        }
        assert!(decoder.is_finished());
        assert!(decoder.finish().is_empty());
        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta("Hel".into()),
                StreamEvent::TextDelta("lo".into()),
                StreamEvent::Usage(Usage { input_tokens: 42, output_tokens: 7 }),
            ]
        );
    }

    #[test]
    fn test_decoder_surfaces_error_events() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(
            sse(&[json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}})]).as_bytes(),
        );
        assert!(matches!(&events[0], Err(ProviderError::Stream(m)) if m == "Overloaded"));
    }

    #[test]
    fn test_decoder_finish_reports_usage_without_stop() {
        let mut decoder = SseDecoder::default();
        decoder.push(b"data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"x\"}}");
        let events: Vec<StreamEvent> = decoder.finish().into_iter().map(|e| e.unwrap()).collect();
        assert_eq!(
            events,
            vec![StreamEvent::TextDelta("x".into()), StreamEvent::Usage(Usage::default())]
        );
    }

    #[test]
    fn test_wire_messages_merge_tool_results_into_user_turns() {
        let wire = wire_messages(&[
            Message::user("build it"),
            Message::assistant("<tool_call>...</tool_call>"),
            Message::tool_result("<tool_result>\nok\n</tool_result>", "[ok]"),
            Message::user("continue"),
        ]);
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[2]["role"], "user");
        assert_eq!(wire[2]["content"], "<tool_result>\nok\n</tool_result>\n\ncontinue");
    }

    #[tokio::test]
    async fn test_scripted_provider_replays_turns() {
        let provider = ScriptedProvider::new(["first turn", "second"]);
        let request = ModelRequest {
            system_prompt: String::new(),
            messages: vec![Message::user("hi")],
            max_tokens: 100,
        };
        let events: Vec<_> = provider.stream(request.clone()).await.unwrap().collect().await;
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                Ok(StreamEvent::TextDelta(t)) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "first turn");
        assert!(matches!(events.last(), Some(Ok(StreamEvent::Usage(_)))));
        assert_eq!(provider.remaining(), 1);
        assert_eq!(provider.requests(), vec![request]);
    }
}
