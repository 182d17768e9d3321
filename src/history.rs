/*
 * Devify - Agentic Coding Assistant Engine
 * File Path: src/history.rs
 * Responsibility: Bound the prompt sent uphill by collapsing consumed tool output and dropping old turns.
 */

use crate::llm::{Message, MessageRole};

#[derive(Debug, Clone, Copy)]
pub struct HistoryCompactor {
    max_pairs: usize,
}

impl HistoryCompactor {
    pub fn new(max_pairs: usize) -> Self {
        Self {
            max_pairs: max_pairs.max(1),
        }
    }

    /// Both passes are order-preserving and idempotent.
    pub fn compact(&self, messages: &[Message]) -> Vec<Message> {
        let collapsed = collapse_consumed_results(messages);
        cap_recent_pairs(collapsed, self.max_pairs)
    }
}

/// Tool-result turns already answered by a later assistant turn shrink to their synopsis.
pub fn collapse_consumed_results(messages: &[Message]) -> Vec<Message> {
    let last_assistant = messages
        .iter()
        .rposition(|message| message.role == MessageRole::Assistant);

    messages
        .iter()
        .enumerate()
        .map(|(idx, message)| {
            let consumed = last_assistant.is_some_and(|last| idx < last);
            match (&message.role, &message.synopsis) {
                (MessageRole::ToolResult, Some(synopsis)) if consumed && message.content != *synopsis => Message {
                    role: MessageRole::ToolResult,
                    content: synopsis.clone(),
                    synopsis: Some(synopsis.clone()),
                },
                _ => message.clone(),
            }
        })
        .collect()
}

/// Keeps the newest `max_pairs` user/assistant exchanges; never starts on an assistant turn.
pub fn cap_recent_pairs(mut messages: Vec<Message>, max_pairs: usize) -> Vec<Message> {
    let keep = max_pairs.saturating_mul(2);
    if messages.len() > keep {
        messages.drain(..messages.len() - keep);
    }
    let leading_assistants = messages
        .iter()
        .take_while(|message| message.role == MessageRole::Assistant)
        .count();
    messages.drain(..leading_assistants);
    messages
}
