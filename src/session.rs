/*
 * Devify - Agentic Coding Assistant Engine
 * File Path: src/session.rs
 * Responsibility: One chat: its history, its project, its prompt, and the single loop running against them.
 */

use crate::agent_loop::{ConversationOrchestrator, LoopEnd, LoopObserver, LoopOutcome};
use crate::executor::ToolExecutor;
use crate::llm::{Message, ProviderError, Usage};
use crate::tools::{ToolCall, ToolResult, tool_instructions};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const MANIFEST_PROMPT_ENTRIES: usize = 200;
/// Synthetic user turn that resumes after the iteration cap.
pub const CONTINUE_MESSAGE: &str = "continue";

/// `&mut self` on every turn keeps a chat to one active loop.
pub struct ChatSession {
    orchestrator: ConversationOrchestrator,
    executor: Option<ToolExecutor>,
    base_prompt: String,
    messages: Vec<Message>,
    usage: Usage,
    resumable: bool,
}

impl ChatSession {
    pub fn new(orchestrator: ConversationOrchestrator, base_prompt: impl Into<String>) -> Self {
        Self {
            orchestrator,
            executor: None,
            base_prompt: base_prompt.into(),
            messages: Vec::new(),
            usage: Usage::default(),
            resumable: false,
        }
    }

    pub fn with_project(mut self, executor: ToolExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn executor(&self) -> Option<&ToolExecutor> {
        self.executor.as_ref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Token totals across every loop this session has run.
    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// `true` after a loop hit the iteration cap.
    pub fn can_resume(&self) -> bool {
        self.resumable
    }

    /// Base prompt, tool instructions, then the open project's manifest and notes.
    pub async fn system_prompt(&self) -> String {
        let mut prompt = self.base_prompt.trim_end().to_string();
        prompt.push_str("\n\n");
        prompt.push_str(&tool_instructions());

        let Some(executor) = &self.executor else {
            prompt.push_str("\n\nNo project is open. Answer without tools.");
            return prompt;
        };
        prompt.push_str(&format!("\n\n### Project Root\n{}\n\n", executor.root().display()));
        prompt.push_str(&executor.manifest().summary(MANIFEST_PROMPT_ENTRIES));
        match executor.context_store().load().await {
            Ok(context) => {
                if let Some(rendered) = context.render_prompt() {
                    prompt.push('\n');
                    prompt.push_str(&rendered);
                }
            }
            Err(e) => warn!("Failed to load project context: {:#}", e),
        }
        prompt
    }

    pub async fn send(
        &mut self,
        text: &str,
        cancel: &CancellationToken,
        observer: &mut dyn LoopObserver,
    ) -> Result<LoopOutcome, ProviderError> {
        self.messages.push(Message::user(text));
        self.run_loop(cancel, observer).await
    }

    /// Starts a fresh bounded loop on the same conversation.
    pub async fn resume(
        &mut self,
        cancel: &CancellationToken,
        observer: &mut dyn LoopObserver,
    ) -> Result<LoopOutcome, ProviderError> {
        info!("Resuming after iteration cap");
        self.send(CONTINUE_MESSAGE, cancel, observer).await
    }

    async fn run_loop(
        &mut self,
        cancel: &CancellationToken,
        observer: &mut dyn LoopObserver,
    ) -> Result<LoopOutcome, ProviderError> {
        let system_prompt = self.system_prompt().await;
        let mut tally = UsageTally {
            inner: observer,
            usage: Usage::default(),
        };
        let result = self
            .orchestrator
            .run(
                &mut self.messages,
                &system_prompt,
                self.executor.as_mut(),
                cancel,
                &mut tally,
            )
            .await;
        self.usage.add(tally.usage);
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.resumable = false;
                warn!(
                    input_tokens = self.usage.input_tokens,
                    output_tokens = self.usage.output_tokens,
                    "Turn failed: {}",
                    e
                );
                return Err(e);
            }
        };
        self.resumable = outcome.end == LoopEnd::IterationCapReached;
        info!(
            end = ?outcome.end,
            iterations = outcome.iterations,
            input_tokens = self.usage.input_tokens,
            output_tokens = self.usage.output_tokens,
            "Turn finished"
        );
        Ok(outcome)
    }
}

/// Forwards every event and sums usage per completed provider call, including calls made before a failure.
struct UsageTally<'a> {
    inner: &'a mut dyn LoopObserver,
    usage: Usage,
}

impl LoopObserver for UsageTally<'_> {
    fn on_text(&mut self, delta: &str) {
        self.inner.on_text(delta);
    }

    fn on_tool_start(&mut self, call: &ToolCall) {
        self.inner.on_tool_start(call);
    }

    fn on_tool_result(&mut self, result: &ToolResult) {
        self.inner.on_tool_result(result);
    }

    fn on_usage(&mut self, usage: Usage) {
        self.usage.add(usage);
        self.inner.on_usage(usage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_loop::{LoopSettings, NoopObserver};
    use crate::approval::AutoApprove;
    use crate::llm::{MessageRole, ScriptedProvider};
    use std::sync::Arc;

    fn session(provider: Arc<ScriptedProvider>, max_iterations: usize) -> ChatSession {
        let orchestrator = ConversationOrchestrator::new(
            provider,
            LoopSettings {
                max_iterations,
                ..LoopSettings::default()
            },
        );
        ChatSession::new(orchestrator, "You are a test assistant.")
    }

    #[tokio::test]
    async fn test_system_prompt_includes_manifest_and_context() {
        let dir = tempfile::tempdir().unwrap();
        let mut executor = ToolExecutor::new(dir.path()).with_approval(Arc::new(AutoApprove));
        let mut args = crate::tools::Arguments::new();
        args.insert("section".into(), "decisions".into());
        args.insert("entries".into(), "Use pnpm".into());
        assert!(executor.execute_named("write_context", args).await.success);

        let chat = session(Arc::new(ScriptedProvider::new(Vec::<String>::new())), 3).with_project(executor);
        let prompt = chat.system_prompt().await;
        assert!(prompt.starts_with("You are a test assistant."));
        assert!(prompt.contains("Project files (0 total)"));
        assert!(prompt.contains("Decisions:\n- Use pnpm"));
    }

    #[tokio::test]
    async fn test_usage_survives_a_failing_later_call() {
        let dir = tempfile::tempdir().unwrap();
        let call = r#"<tool_call>{"name": "list_directory", "arguments": {"path": "."}}</tool_call>"#;
        let provider = Arc::new(ScriptedProvider::new([call]));
        let mut chat = session(provider.clone(), 5).with_project(ToolExecutor::new(dir.path()));

        let result = chat.send("explore", &CancellationToken::new(), &mut NoopObserver).await;
        assert!(result.is_err());
        assert_eq!(provider.requests().len(), 2);
        assert_eq!(chat.usage().output_tokens, call.chars().count() as u64 / 4);
        assert!(chat.usage().input_tokens > 0);
        assert!(!chat.can_resume());
    }

    #[tokio::test]
    async fn test_resume_after_cap_appends_continue() {
        let dir = tempfile::tempdir().unwrap();
        let call = r#"<tool_call>{"name": "list_directory", "arguments": {"path": "."}}</tool_call>"#;
        let provider = Arc::new(ScriptedProvider::new([call, call, "Finished."]));
        let executor = ToolExecutor::new(dir.path());
        let mut chat = session(provider.clone(), 2).with_project(executor);
        let cancel = CancellationToken::new();

        let first = chat.send("explore", &cancel, &mut NoopObserver).await.unwrap();
        assert_eq!(first.end, LoopEnd::IterationCapReached);
        assert!(chat.can_resume());

        let second = chat.resume(&cancel, &mut NoopObserver).await.unwrap();
        assert_eq!(second.end, LoopEnd::Done);
        assert!(!chat.can_resume());

        let continues: Vec<&Message> = chat
            .messages()
            .iter()
            .filter(|m| m.role == MessageRole::User && m.content == CONTINUE_MESSAGE)
            .collect();
        assert_eq!(continues.len(), 1);
        assert_eq!(chat.usage().total(), first.usage.total() + second.usage.total());
        assert_eq!(provider.requests().len(), 3);
    }
}
