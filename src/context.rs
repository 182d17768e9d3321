/*
 * Devify - Agentic Coding Assistant Engine
 * File Path: src/context.rs
 * Responsibility: Persisted project notes, their store, and system prompt loading.
 */

use crate::manifest::STATE_DIR;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const CONTEXT_FILE: &str = "context.json";
pub const MAX_RECENT_CHANGES: usize = 20;

const DEFAULT_SYSTEM_PROMPT: &str = "You are Devify, a coding assistant working inside the user's project. \
Make focused, working changes. Read files before editing them, prefer edit_file for small changes, \
and explain briefly what you changed when you are done.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSection {
    TechStack,
    Preferences,
    Decisions,
    RecentChanges,
}

impl ContextSection {
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "techstack" | "stack" | "tech" => Some(ContextSection::TechStack),
            "preferences" | "preference" | "prefs" => Some(ContextSection::Preferences),
            "decisions" | "decision" => Some(ContextSection::Decisions),
            "recentchanges" | "changes" | "recentchange" => Some(ContextSection::RecentChanges),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContextSection::TechStack => "tech_stack",
            ContextSection::Preferences => "preferences",
            ContextSection::Decisions => "decisions",
            ContextSection::RecentChanges => "recent_changes",
        }
    }
}

/// Small note set injected into future prompts. Mutated only through `write_context`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectContext {
    #[serde(alias = "tech_stack")]
    pub tech_stack: Vec<String>,
    pub preferences: Vec<String>,
    pub decisions: Vec<String>,
    #[serde(alias = "recent_changes")]
    pub recent_changes: Vec<String>,
}

impl ProjectContext {
    fn section_mut(&mut self, section: ContextSection) -> &mut Vec<String> {
        match section {
            ContextSection::TechStack => &mut self.tech_stack,
            ContextSection::Preferences => &mut self.preferences,
            ContextSection::Decisions => &mut self.decisions,
            ContextSection::RecentChanges => &mut self.recent_changes,
        }
    }

    /// Appends entries not already present. Returns how many were added.
    pub fn apply(&mut self, section: ContextSection, entries: &[String]) -> usize {
        let list = self.section_mut(section);
        let mut added = 0;
        for entry in entries.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
            if !list.iter().any(|existing| existing.eq_ignore_ascii_case(entry)) {
                list.push(entry.to_string());
                added += 1;
            }
        }
        if section == ContextSection::RecentChanges && list.len() > MAX_RECENT_CHANGES {
            let overflow = list.len() - MAX_RECENT_CHANGES;
            list.drain(..overflow);
        }
        added
    }

    pub fn is_empty(&self) -> bool {
        self.tech_stack.is_empty()
            && self.preferences.is_empty()
            && self.decisions.is_empty()
            && self.recent_changes.is_empty()
    }

    /// Prompt block, `None` when there is nothing to say.
    pub fn render_prompt(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut out = String::from("### Project Context\n");
        for (title, items) in [
            ("Tech stack", &self.tech_stack),
            ("Preferences", &self.preferences),
            ("Decisions", &self.decisions),
            ("Recent changes", &self.recent_changes),
        ] {
            if items.is_empty() {
                continue;
            }
            out.push_str(&format!("{}:\n", title));
            for item in items {
                out.push_str(&format!("- {}\n", item));
            }
        }
        Some(out)
    }
}

#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn load(&self) -> Result<ProjectContext>;
    async fn save(&self, context: &ProjectContext) -> Result<()>;
}

/// `<project>/.devify/context.json`
#[derive(Debug, Clone)]
pub struct FileContextStore {
    path: PathBuf,
}

impl FileContextStore {
    pub fn for_project(root: &Path) -> Self {
        Self {
            path: root.join(STATE_DIR).join(CONTEXT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ContextStore for FileContextStore {
    async fn load(&self) -> Result<ProjectContext> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ProjectContext::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    async fn save(&self, context: &ProjectContext) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_string_pretty(context)?)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

/// Base prompt: `<home>/prompts/SYSTEM.md` plus an optional project-level `DEVIFY.md`.
pub fn load_system_prompt(home: &Path, project: Option<&Path>) -> String {
    let mut system_prompt = fs::read_to_string(home.join("prompts").join("SYSTEM.md"))
        .unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.to_string());

    if let Some(project) = project {
        let project_prompt = project.join("DEVIFY.md");
        if let Ok(extra) = fs::read_to_string(&project_prompt) {
            debug!(path = %project_prompt.display(), "Loading project-specific instructions");
            system_prompt.push_str("\n\n### Project Instructions:\n");
            system_prompt.push_str(extra.trim());
        }
    }

    system_prompt
}
