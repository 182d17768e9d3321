/*
 * Devify - Agentic Coding Assistant Engine
 * File Path: src/agent_loop.rs
 * Responsibility: Stream a model turn, run its tool calls, feed results back, until done or bounded out.
 */

use crate::executor::ToolExecutor;
use crate::history::HistoryCompactor;
use crate::llm::{Message, ModelProvider, ModelRequest, ProviderError, StreamEvent, Usage};
use crate::parser::parse_response;
use crate::tools::{ToolCall, ToolResult, format_tool_results};
use futures_util::StreamExt;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Streaming { turn: usize },
    ParsingToolCalls { turn: usize },
    ExecutingTools { turn: usize, calls: usize },
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Idle => write!(f, "idle"),
            LoopState::Streaming { turn } => write!(f, "streaming(turn {})", turn),
            LoopState::ParsingToolCalls { turn } => write!(f, "parsing(turn {})", turn),
            LoopState::ExecutingTools { turn, calls } => write!(f, "executing(turn {}, {} calls)", turn, calls),
        }
    }
}

/// Why a loop stopped. Only a failing provider call surfaces as an `Err` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEnd {
    /// The model answered without tool calls.
    Done,
    Cancelled,
    /// Resumable: the conversation is intact and a new loop can continue it.
    IterationCapReached,
    /// Tool calls arrived but no project is open to run them against.
    NoProject,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub end: LoopEnd,
    pub iterations: usize,
    pub usage: Usage,
    pub tool_results: Vec<ToolResult>,
}

/// Live progress hooks for a front end. Every method defaults to a no-op.
pub trait LoopObserver: Send {
    fn on_text(&mut self, _delta: &str) {}
    fn on_tool_start(&mut self, _call: &ToolCall) {}
    fn on_tool_result(&mut self, _result: &ToolResult) {}
    fn on_usage(&mut self, _usage: Usage) {}
}

pub struct NoopObserver;

impl LoopObserver for NoopObserver {}

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub max_iterations: usize,
    pub max_tokens: u32,
    pub history_pairs: usize,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_tokens: 8192,
            history_pairs: 20,
        }
    }
}

pub struct ConversationOrchestrator {
    provider: Arc<dyn ModelProvider>,
    compactor: HistoryCompactor,
    settings: LoopSettings,
}

impl ConversationOrchestrator {
    pub fn new(provider: Arc<dyn ModelProvider>, settings: LoopSettings) -> Self {
        Self {
            provider,
            compactor: HistoryCompactor::new(settings.history_pairs),
            settings: LoopSettings {
                max_iterations: settings.max_iterations.max(1),
                ..settings
            },
        }
    }

    pub fn settings(&self) -> LoopSettings {
        self.settings
    }

    /// Runs one bounded loop, appending every assistant and tool-result turn to `messages`.
    /// Tool calls within a turn run strictly in order.
    pub async fn run(
        &self,
        messages: &mut Vec<Message>,
        system_prompt: &str,
        mut executor: Option<&mut ToolExecutor>,
        cancel: &CancellationToken,
        observer: &mut dyn LoopObserver,
    ) -> Result<LoopOutcome, ProviderError> {
        let mut outcome = LoopOutcome {
            end: LoopEnd::IterationCapReached,
            iterations: 0,
            usage: Usage::default(),
            tool_results: Vec::new(),
        };
        let mut state = LoopState::Idle;

        for turn in 1..=self.settings.max_iterations {
            if cancel.is_cancelled() {
                outcome.end = LoopEnd::Cancelled;
                break;
            }
            outcome.iterations = turn;
            state = transition(state, LoopState::Streaming { turn });

            let request = ModelRequest {
                system_prompt: system_prompt.to_string(),
                messages: self.compactor.compact(messages),
                max_tokens: self.settings.max_tokens,
            };
            let (text, usage, cancelled) = self.stream_turn(request, cancel, observer).await?;

            if let Some(usage) = usage {
                outcome.usage.add(usage);
                observer.on_usage(usage);
            }
            if cancelled {
                if !text.is_empty() {
                    messages.push(Message::assistant(text));
                }
                outcome.end = LoopEnd::Cancelled;
                break;
            }
            messages.push(Message::assistant(text.clone()));

            state = transition(state, LoopState::ParsingToolCalls { turn });
            let parsed = parse_response(&text);
            if !parsed.has_tool_calls {
                outcome.end = LoopEnd::Done;
                break;
            }
            let Some(executor) = executor.as_deref_mut() else {
                warn!(calls = parsed.tool_calls.len(), "Tool calls requested with no project open");
                outcome.end = LoopEnd::NoProject;
                break;
            };

            state = transition(
                state,
                LoopState::ExecutingTools {
                    turn,
                    calls: parsed.tool_calls.len(),
                },
            );
            let mut results = Vec::with_capacity(parsed.tool_calls.len());
            let mut interrupted = false;
            for call in &parsed.tool_calls {
                if cancel.is_cancelled() {
                    interrupted = true;
                    break;
                }
                observer.on_tool_start(call);
                let result = executor.execute(call).await;
                observer.on_tool_result(&result);
                results.push(result);
            }

            if !results.is_empty() {
                let synopsis = results
                    .iter()
                    .map(ToolResult::synopsis)
                    .collect::<Vec<_>>()
                    .join("\n");
                messages.push(Message::tool_result(format_tool_results(&results), synopsis));
                outcome.tool_results.extend(results);
            }
            if interrupted {
                outcome.end = LoopEnd::Cancelled;
                break;
            }
        }

        if outcome.end == LoopEnd::IterationCapReached {
            info!(iterations = outcome.iterations, "Iteration cap reached; conversation can be continued");
        }
        debug!(from = %state, end = ?outcome.end, "Loop finished");
        Ok(outcome)
    }

    /// Collects one streamed reply. The flag is set when cancellation cut the stream short.
    async fn stream_turn(
        &self,
        request: ModelRequest,
        cancel: &CancellationToken,
        observer: &mut dyn LoopObserver,
    ) -> Result<(String, Option<Usage>, bool), ProviderError> {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok((String::new(), None, true)),
            stream = self.provider.stream(request) => stream?,
        };
        let mut text = String::new();
        let mut usage = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok((text, usage, true)),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(StreamEvent::TextDelta(delta))) => {
                    observer.on_text(&delta);
                    text.push_str(&delta);
                }
                Some(Ok(StreamEvent::Usage(reported))) => usage = Some(reported),
                Some(Err(e)) => return Err(e),
                None => return Ok((text, usage, false)),
            }
        }
    }
}

fn transition(from: LoopState, to: LoopState) -> LoopState {
    debug!(from = %from, to = %to, "Loop transition");
    to
}
