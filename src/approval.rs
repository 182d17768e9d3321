/*
 * Devify - Agentic Coding Assistant Engine
 * File Path: src/approval.rs
 * Responsibility: Before/after descriptions of proposed mutations and the approve/reject collaborator.
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use similar::TextDiff;
use std::io::{BufRead, Write};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffAction {
    Create,
    Rewrite,
    Edit,
    Delete,
}

impl DiffAction {
    pub fn verb(self) -> &'static str {
        match self {
            DiffAction::Create => "create",
            DiffAction::Rewrite => "overwrite",
            DiffAction::Edit => "edit",
            DiffAction::Delete => "delete",
        }
    }
}

/// Lives only between proposal and decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDiff {
    pub id: String,
    pub action: DiffAction,
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replace_text: Option<String>,
}

impl PendingDiff {
    pub fn new(action: DiffAction, file_path: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action,
            file_path: file_path.into(),
            old_content: None,
            new_content: None,
            search_text: None,
            replace_text: None,
        }
    }

    pub fn with_contents(mut self, old: Option<String>, new: Option<String>) -> Self {
        self.old_content = old;
        self.new_content = new;
        self
    }

    pub fn with_edit(mut self, search: impl Into<String>, replace: impl Into<String>) -> Self {
        self.search_text = Some(search.into());
        self.replace_text = Some(replace.into());
        self
    }

    /// Unified diff of the proposal, 3 lines of context.
    pub fn render(&self) -> String {
        let old = self.old_content.as_deref().unwrap_or("");
        let new = self.new_content.as_deref().unwrap_or("");
        let old_header = match self.action {
            DiffAction::Create => "/dev/null".to_string(),
            _ => format!("a/{}", self.file_path),
        };
        let new_header = match self.action {
            DiffAction::Delete => "/dev/null".to_string(),
            _ => format!("b/{}", self.file_path),
        };
        TextDiff::from_lines(old, new)
            .unified_diff()
            .context_radius(3)
            .header(&old_header, &new_header)
            .to_string()
    }
}

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// `true` applies the mutation; `false` must leave the project untouched.
    async fn review(&self, diff: &PendingDiff) -> bool;
}

/// Approves everything. Used for non-interactive runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn review(&self, _diff: &PendingDiff) -> bool {
        true
    }
}

/// Rejects everything. Used when confirmation is required but nobody can answer.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

#[async_trait]
impl ApprovalGate for DenyAll {
    async fn review(&self, diff: &PendingDiff) -> bool {
        warn!(path = %diff.file_path, "No terminal to confirm on; rejecting change");
        false
    }
}

/// Prints the diff to stderr and asks on the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalApproval;

#[async_trait]
impl ApprovalGate for TerminalApproval {
    async fn review(&self, diff: &PendingDiff) -> bool {
        let prompt = format!(
            "\n{}\nAllow {} of {}? [y/N] ",
            diff.render(),
            diff.action.verb(),
            diff.file_path
        );
        let answer = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = stderr.write_all(prompt.as_bytes());
            let _ = stderr.flush();
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => matches!(line.trim().to_lowercase().as_str(), "y" | "yes"),
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to read approval answer; rejecting");
                false
            }
            Err(e) => {
                warn!(error = %e, "Approval prompt task failed; rejecting");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_shows_changed_lines() {
        let diff = PendingDiff::new(DiffAction::Edit, "src/app.ts")
            .with_contents(Some("a\nb\nc\n".into()), Some("a\nB\nc\n".into()))
            .with_edit("b", "B");
        let rendered = diff.render();
        assert!(rendered.contains("--- a/src/app.ts"));
        assert!(rendered.contains("+++ b/src/app.ts"));
        assert!(rendered.contains("-b\n"));
        assert!(rendered.contains("+B\n"));
    }

    #[test]
    fn test_create_and_delete_headers() {
        let create = PendingDiff::new(DiffAction::Create, "new.txt").with_contents(None, Some("hi\n".into()));
        assert!(create.render().contains("--- /dev/null"));
        let delete = PendingDiff::new(DiffAction::Delete, "old.txt").with_contents(Some("bye\n".into()), None);
        assert!(delete.render().contains("+++ /dev/null"));
        assert!(delete.render().contains("-bye"));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = PendingDiff::new(DiffAction::Create, "a");
        let b = PendingDiff::new(DiffAction::Create, "a");
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_auto_approve() {
        let diff = PendingDiff::new(DiffAction::Delete, "a");
        assert!(AutoApprove.review(&diff).await);
        assert!(!DenyAll.review(&diff).await);
    }
}
