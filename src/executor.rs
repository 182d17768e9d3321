/*
 * Devify - Agentic Coding Assistant Engine
 * File Path: src/executor.rs
 * Responsibility: Validate, screen, gate and perform one tool call against the open project.
 */

use crate::approval::{ApprovalGate, DiffAction, PendingDiff};
use crate::args;
use crate::context::{ContextSection, ContextStore, FileContextStore};
use crate::guard::{CommandGuard, CommandPlan};
use crate::manifest::ProjectManifest;
use crate::rate_limit::RateLimiter;
use crate::sandbox::{PathSandbox, ResolvedPath, is_blocklisted_directory, is_noisy_file, is_sensitive_file};
use crate::scheduler::{FailureAction, StepAction, TaskDraft, TaskScheduler, TaskStep};
use crate::services::{
    CommandRunner, Connector, DirEntry, FileService, LocalFileService, SearchProvider, ShellCommandRunner,
};
use crate::tools::{Arguments, ToolCall, ToolName, ToolResult, truncate_output};
use futures_util::future::join_all;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAX_LISTED_ENTRIES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorLimits {
    pub max_read_bytes: u64,
    pub max_write_bytes: usize,
    pub list_depth: usize,
    /// Applies to command, search and connector output. File reads are never truncated.
    pub max_output_bytes: usize,
}

impl Default for ExecutorLimits {
    fn default() -> Self {
        Self {
            max_read_bytes: 512_000,
            max_write_bytes: 1_000_000,
            list_depth: 3,
            max_output_bytes: 30_000,
        }
    }
}

/// Performs tool calls for one open project. Every outcome, including rejections, is a `ToolResult`.
pub struct ToolExecutor {
    sandbox: PathSandbox,
    guard: CommandGuard,
    files: Arc<dyn FileService>,
    commands: Arc<dyn CommandRunner>,
    limiter: Arc<RateLimiter>,
    approval: Option<Arc<dyn ApprovalGate>>,
    context_store: Arc<dyn ContextStore>,
    search: Option<Arc<dyn SearchProvider>>,
    connector: Option<Arc<dyn Connector>>,
    scheduler: Option<Arc<dyn TaskScheduler>>,
    manifest: ProjectManifest,
    limits: ExecutorLimits,
}

impl ToolExecutor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            guard: CommandGuard::default(),
            files: Arc::new(LocalFileService),
            commands: Arc::new(ShellCommandRunner::default()),
            limiter: Arc::new(RateLimiter::default()),
            approval: None,
            context_store: Arc::new(FileContextStore::for_project(&root)),
            search: None,
            connector: None,
            scheduler: None,
            manifest: ProjectManifest::empty(&root),
            limits: ExecutorLimits::default(),
            sandbox: PathSandbox::new(root),
        }
    }

    pub fn with_files(mut self, files: Arc<dyn FileService>) -> Self {
        self.files = files;
        self
    }

    pub fn with_commands(mut self, commands: Arc<dyn CommandRunner>) -> Self {
        self.commands = commands;
        self
    }

    /// Share one limiter between executors to keep a single process-wide budget.
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_guard(mut self, guard: CommandGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_approval(mut self, approval: Arc<dyn ApprovalGate>) -> Self {
        self.approval = Some(approval);
        self
    }

    pub fn with_context_store(mut self, store: Arc<dyn ContextStore>) -> Self {
        self.context_store = store;
        self
    }

    pub fn with_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_manifest(mut self, manifest: ProjectManifest) -> Self {
        self.manifest = manifest;
        self
    }

    pub fn with_limits(mut self, limits: ExecutorLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn root(&self) -> &Path {
        self.sandbox.root()
    }

    pub fn manifest(&self) -> &ProjectManifest {
        &self.manifest
    }

    pub fn files(&self) -> Arc<dyn FileService> {
        self.files.clone()
    }

    pub fn context_store(&self) -> Arc<dyn ContextStore> {
        self.context_store.clone()
    }

    pub async fn execute(&mut self, call: &ToolCall) -> ToolResult {
        if call.name.is_read_only() {
            debug!(tool = %call.name, "Executing tool");
        } else {
            info!(tool = %call.name, "Executing tool");
        }
        let args = &call.arguments;
        let result = match call.name {
            ToolName::ReadFile => self.read_file(args).await,
            ToolName::ReadMultipleFiles => self.read_multiple_files(args).await,
            ToolName::WriteFile => self.write_file(args).await,
            ToolName::EditFile => self.edit_file(args).await,
            ToolName::ListDirectory => self.list_directory(args).await,
            ToolName::CreateDirectory => self.create_directory(args).await,
            ToolName::DeleteFile => self.delete_file(args).await,
            ToolName::RunCommand => self.run_command(args).await,
            ToolName::WebSearch => self.web_search(args).await,
            ToolName::Connection => self.connection(args).await,
            ToolName::WriteContext => self.write_context(args).await,
            ToolName::CreateScheduledTask => self.create_scheduled_task(args).await,
        };
        if result.success {
            debug!(tool = %call.name, "Tool succeeded");
        } else {
            warn!(
                tool = %call.name,
                "Tool failed: {}",
                result.message.lines().next().unwrap_or_default()
            );
        }
        result
    }

    /// Entry point for raw names straight from the model.
    pub async fn execute_named(&mut self, name: &str, arguments: Arguments) -> ToolResult {
        match ToolName::resolve(name) {
            Some(tool) => self.execute(&ToolCall::new(tool, arguments)).await,
            None => {
                warn!(tool = %name, "Unknown tool requested");
                ToolResult::error(
                    name,
                    format!("Unknown tool `{}`. Valid tools: {}", name, ToolName::valid_names()),
                )
            }
        }
    }

    fn admit(&self, tool: ToolName) -> Result<(), ToolResult> {
        self.limiter.check(tool).map_err(|limited| {
            warn!(tool = %tool, "Rate limited");
            ToolResult::error(tool, limited.to_string())
        })
    }

    async fn approve(&self, tool: ToolName, diff: PendingDiff) -> Result<(), ToolResult> {
        let Some(gate) = &self.approval else {
            return Ok(());
        };
        if gate.review(&diff).await {
            return Ok(());
        }
        info!(tool = %tool, path = %diff.file_path, "Change rejected by user");
        Err(ToolResult::error(
            tool,
            format!(
                "User rejected the {} of {}; nothing was written.",
                diff.action.verb(),
                diff.file_path
            ),
        ))
    }

    fn resolve(&self, tool: ToolName, raw: &str) -> Result<ResolvedPath, ToolResult> {
        self.sandbox.resolve_for_access(raw).map_err(|e| {
            warn!(tool = %tool, path = %raw, "Sandbox rejected path: {}", e);
            ToolResult::error(tool, e.to_string())
        })
    }

    async fn persist_manifest(&self) {
        if let Err(e) = self.manifest.save(self.sandbox.root()).await {
            warn!("Failed to save project manifest: {:#}", e);
        }
    }

    async fn existing_text(&self, path: &Path) -> Option<String> {
        match self.files.metadata(path).await {
            Ok(Some(meta)) if !meta.is_dir => self.files.read_to_string(path).await.ok(),
            _ => None,
        }
    }

    async fn read_one(&self, raw: &str) -> Result<(String, String), String> {
        let target = self.sandbox.resolve_for_access(raw).map_err(|e| e.to_string())?;
        let rel = target.display_name().to_string();
        match self.files.metadata(&target.absolute).await {
            Ok(Some(meta)) if meta.is_dir => {
                return Err(format!("{} is a directory. Use list_directory to see its contents.", rel));
            }
            Ok(Some(meta)) if meta.size > self.limits.max_read_bytes => {
                return Err(format!(
                    "{} is {} bytes, above the {} byte read limit. Use run_command with head or grep to inspect part of it.",
                    rel, meta.size, self.limits.max_read_bytes
                ));
            }
            Ok(Some(_)) => {}
            Ok(None) => return Err(format!("File not found: {}", rel)),
            Err(e) => return Err(format!("{:#}", e)),
        }
        let content = self
            .files
            .read_to_string(&target.absolute)
            .await
            .map_err(|e| format!("{:#}", e))?;
        Ok((rel, content))
    }

    async fn read_file(&self, args: &Arguments) -> ToolResult {
        let tool = ToolName::ReadFile;
        let Some(raw) = args::path(args) else {
            return missing(tool, r#"{"path": "src/main.ts"}"#);
        };
        match self.read_one(&raw).await {
            Ok((rel, content)) => {
                let lines = content.lines().count();
                ToolResult::success(tool, fence(&rel, &content))
                    .with_synopsis(format!("[read {}: {} lines]", rel, lines))
            }
            Err(e) => ToolResult::error(tool, e),
        }
    }

    async fn read_multiple_files(&self, args: &Arguments) -> ToolResult {
        let tool = ToolName::ReadMultipleFiles;
        let paths = args::paths(args);
        if paths.is_empty() {
            return missing(tool, r#"{"paths": ["src/a.ts", "src/b.ts"]}"#);
        }

        let reads = join_all(paths.iter().map(|raw| self.read_one(raw))).await;
        let succeeded = reads.iter().filter(|read| read.is_ok()).count();
        let sections: Vec<String> = paths
            .iter()
            .zip(reads)
            .map(|(raw, read)| match read {
                Ok((rel, content)) => fence(&rel, &content),
                Err(e) => format!("Error reading {}: {}", raw, e),
            })
            .collect();

        let synopsis = format!("[read {} of {} files]", succeeded, paths.len());
        let message = sections.join("\n\n");
        let result = if succeeded > 0 {
            ToolResult::success(tool, message)
        } else {
            ToolResult::error(tool, message)
        };
        result.with_synopsis(synopsis)
    }

    async fn write_file(&mut self, args: &Arguments) -> ToolResult {
        let tool = ToolName::WriteFile;
        let (Some(raw), Some(content)) = (args::path(args), content_or_empty(args)) else {
            return missing(tool, r#"{"path": "index.html", "content": "<full file content>"}"#);
        };
        let target = match self.resolve(tool, &raw) {
            Ok(target) => target,
            Err(result) => return result,
        };
        let rel = target.display_name().to_string();
        if content.len() > self.limits.max_write_bytes {
            return ToolResult::error(
                tool,
                format!(
                    "Content for {} is {} bytes, above the {} byte write limit. Split it into smaller files.",
                    rel,
                    content.len(),
                    self.limits.max_write_bytes
                ),
            );
        }
        let content = if is_html(&rel) { sanitize_html_content(&content) } else { content };

        if let Ok(Some(meta)) = self.files.metadata(&target.absolute).await {
            if meta.is_dir {
                return ToolResult::error(tool, format!("{} is a directory, not a file", rel));
            }
        }
        if let Err(result) = self.admit(tool) {
            return result;
        }

        let old = self.existing_text(&target.absolute).await;
        let action = if old.is_some() { DiffAction::Rewrite } else { DiffAction::Create };
        let diff = PendingDiff::new(action, rel.clone()).with_contents(old, Some(content.clone()));
        if let Err(result) = self.approve(tool, diff).await {
            return result;
        }

        if let Err(e) = self.files.write(&target.absolute, &content).await {
            return ToolResult::error(tool, format!("{:#}", e));
        }
        self.manifest.upsert(&target.relative, &content);
        self.persist_manifest().await;

        let lines = content.lines().count();
        let verb = if action == DiffAction::Create { "Created" } else { "Updated" };
        ToolResult::success(tool, format!("{} {} ({} lines)", verb, rel, lines))
            .with_files(vec![rel.clone()])
            .with_synopsis(format!("[wrote {}: {} lines]", rel, lines))
    }

    async fn edit_file(&mut self, args: &Arguments) -> ToolResult {
        let tool = ToolName::EditFile;
        let (Some(raw), Some(search), Some(replace)) = (args::path(args), args::search(args), args::replace(args))
        else {
            return missing(
                tool,
                r#"{"path": "src/app.ts", "search": "<exact existing text>", "replace": "<new text>"}"#,
            );
        };
        let target = match self.resolve(tool, &raw) {
            Ok(target) => target,
            Err(result) => return result,
        };
        let rel = target.display_name().to_string();
        let current = match self.files.read_to_string(&target.absolute).await {
            Ok(current) => current,
            Err(_) => {
                return ToolResult::error(tool, format!("File not found: {}. Use write_file to create it.", rel));
            }
        };

        let (search, replace, occurrences) = match_occurrences(&current, search, replace);
        match occurrences {
            0 => {
                return ToolResult::error(
                    tool,
                    format!(
                        "Search text not found in {}. Read the file again and copy the exact text, including whitespace.",
                        rel
                    ),
                );
            }
            1 => {}
            n => {
                return ToolResult::error(
                    tool,
                    format!(
                        "Search text is not unique in {} (found {} occurrences). Include more surrounding lines so it matches exactly once.",
                        rel, n
                    ),
                );
            }
        }

        let updated = current.replacen(&search, &replace, 1);
        if updated.len() > self.limits.max_write_bytes {
            return ToolResult::error(tool, format!("Edited {} would exceed the write limit", rel));
        }
        if let Err(result) = self.admit(tool) {
            return result;
        }
        let diff = PendingDiff::new(DiffAction::Edit, rel.clone())
            .with_contents(Some(current), Some(updated.clone()))
            .with_edit(search, replace);
        if let Err(result) = self.approve(tool, diff).await {
            return result;
        }

        if let Err(e) = self.files.write(&target.absolute, &updated).await {
            return ToolResult::error(tool, format!("{:#}", e));
        }
        self.manifest.upsert(&target.relative, &updated);
        self.persist_manifest().await;

        ToolResult::success(tool, format!("Edited {}", rel))
            .with_files(vec![rel.clone()])
            .with_synopsis(format!("[edited {}]", rel))
    }

    async fn list_directory(&self, args: &Arguments) -> ToolResult {
        let tool = ToolName::ListDirectory;
        let raw = args::path(args).unwrap_or_else(|| ".".to_string());
        let target = match self.resolve(tool, &raw) {
            Ok(target) => target,
            Err(result) => return result,
        };
        let display = target.display_name().to_string();
        match self.files.metadata(&target.absolute).await {
            Ok(Some(meta)) if meta.is_dir => {}
            Ok(Some(_)) => return ToolResult::error(tool, format!("{} is a file. Use read_file instead.", display)),
            Ok(None) => return ToolResult::error(tool, format!("Directory not found: {}", display)),
            Err(e) => return ToolResult::error(tool, format!("{:#}", e)),
        }

        let root_entries = match self.files.list(&target.absolute).await {
            Ok(entries) => entries,
            Err(e) => return ToolResult::error(tool, format!("{:#}", e)),
        };

        let mut lines = Vec::new();
        let mut truncated = false;
        let mut pending: Vec<(PathBuf, String, DirEntry, usize)> = Vec::new();
        push_children(&mut pending, &target.absolute, &target.relative, root_entries, 0);

        while let Some((parent, parent_rel, entry, depth)) = pending.pop() {
            if lines.len() >= MAX_LISTED_ENTRIES {
                truncated = true;
                break;
            }
            let indent = "  ".repeat(depth);
            if !entry.is_dir {
                lines.push(format!("{}{}", indent, entry.name));
                continue;
            }
            lines.push(format!("{}{}/", indent, entry.name));
            if depth + 1 >= self.limits.list_depth {
                continue;
            }
            let path = parent.join(&entry.name);
            let rel = join_relative(&parent_rel, &entry.name);
            match self.files.list(&path).await {
                Ok(children) => push_children(&mut pending, &path, &rel, children, depth + 1),
                Err(e) => debug!(path = %rel, "Skipping unreadable directory: {:#}", e),
            }
        }

        let count = lines.len();
        let mut message = format!("{}/\n", display);
        if lines.is_empty() {
            message.push_str("(empty directory)");
        } else {
            message.push_str(&lines.join("\n"));
        }
        if truncated {
            message.push_str(&format!("\n... (listing stopped at {} entries)", MAX_LISTED_ENTRIES));
        }
        ToolResult::success(tool, message).with_synopsis(format!("[listed {}: {} entries]", display, count))
    }

    async fn create_directory(&mut self, args: &Arguments) -> ToolResult {
        let tool = ToolName::CreateDirectory;
        let Some(raw) = args::path(args) else {
            return missing(tool, r#"{"path": "src/components"}"#);
        };
        let target = match self.resolve(tool, &raw) {
            Ok(target) => target,
            Err(result) => return result,
        };
        let rel = target.display_name().to_string();

        if has_file_extension(&target.relative) && args::content(args).is_some() {
            info!(path = %rel, "create_directory given a file path and content; writing the file instead");
            let mut result = self.write_file(args).await;
            if result.success {
                result.tool = tool.to_string();
                result.message = format!("{} (create_directory was given file content, so the file was written)", result.message);
            }
            return result;
        }

        match self.files.metadata(&target.absolute).await {
            Ok(Some(meta)) if meta.is_dir => {
                return ToolResult::success(tool, format!("Directory {} already exists", rel));
            }
            Ok(Some(_)) => return ToolResult::error(tool, format!("{} already exists as a file", rel)),
            _ => {}
        }
        if let Err(result) = self.admit(tool) {
            return result;
        }
        match self.files.create_dir_all(&target.absolute).await {
            Ok(()) => ToolResult::success(tool, format!("Created directory {}", rel)).with_files(vec![rel]),
            Err(e) => ToolResult::error(tool, format!("{:#}", e)),
        }
    }

    async fn delete_file(&mut self, args: &Arguments) -> ToolResult {
        let tool = ToolName::DeleteFile;
        let Some(raw) = args::path(args) else {
            return missing(tool, r#"{"path": "src/old.ts"}"#);
        };
        let target = match self.resolve(tool, &raw) {
            Ok(target) => target,
            Err(result) => return result,
        };
        if target.relative.is_empty() {
            return ToolResult::error(tool, "Refusing to delete the project root");
        }
        let rel = target.display_name().to_string();
        let is_dir = match self.files.metadata(&target.absolute).await {
            Ok(Some(meta)) => meta.is_dir,
            Ok(None) => return ToolResult::error(tool, format!("File not found: {}", rel)),
            Err(e) => return ToolResult::error(tool, format!("{:#}", e)),
        };
        if is_dir {
            match self.sensitive_descendant(&target).await {
                Ok(None) => {}
                Ok(Some(found)) => {
                    warn!(path = %rel, sensitive = %found, "Directory delete blocked");
                    return ToolResult::error(
                        tool,
                        format!("Refusing to delete {}: it contains a protected file ({})", rel, found),
                    );
                }
                Err(e) => return ToolResult::error(tool, format!("{:#}", e)),
            }
        }
        if let Err(result) = self.admit(tool) {
            return result;
        }

        let old = self.existing_text(&target.absolute).await;
        let diff = PendingDiff::new(DiffAction::Delete, rel.clone()).with_contents(old, None);
        if let Err(result) = self.approve(tool, diff).await {
            return result;
        }

        if let Err(e) = self.files.remove(&target.absolute).await {
            return ToolResult::error(tool, format!("{:#}", e));
        }
        self.manifest.remove(&target.relative);
        self.persist_manifest().await;
        ToolResult::success(tool, format!("Deleted {}", rel)).with_files(vec![rel])
    }

    /// First credential-like file anywhere under `dir`, root-relative.
    async fn sensitive_descendant(&self, dir: &ResolvedPath) -> anyhow::Result<Option<String>> {
        let mut pending = vec![(dir.absolute.clone(), dir.relative.clone())];
        while let Some((path, rel)) = pending.pop() {
            for entry in self.files.list(&path).await? {
                let entry_rel = join_relative(&rel, &entry.name);
                if is_sensitive_file(&entry_rel) {
                    return Ok(Some(entry_rel));
                }
                if entry.is_dir {
                    pending.push((path.join(&entry.name), entry_rel));
                }
            }
        }
        Ok(None)
    }

    async fn run_command(&self, args: &Arguments) -> ToolResult {
        let tool = ToolName::RunCommand;
        let Some(command) = args::command(args) else {
            return missing(tool, r#"{"command": "npm run build"}"#);
        };

        let (command, cwd, cwd_relative) = match self.guard.plan(&command, &self.sandbox) {
            Ok(CommandPlan::Run {
                command,
                cwd,
                cwd_relative,
            }) => (command, cwd, cwd_relative),
            Ok(CommandPlan::NoOpCd { target }) => {
                return ToolResult::success(
                    tool,
                    format!(
                        "`cd {}` on its own has no effect: every command starts in the project root. Chain it instead, e.g. `cd {} && npm install`.",
                        target, target
                    ),
                );
            }
            Err(e) => {
                warn!(command = %command, "Command blocked: {}", e);
                return ToolResult::error(tool, e.to_string());
            }
        };
        if let Err(result) = self.admit(tool) {
            return result;
        }

        debug!(command = %command, cwd = %cwd.display(), "Running command");
        match self.commands.run(&command, &cwd).await {
            Ok(output) => {
                let message = truncate_output(output.render(), self.limits.max_output_bytes);
                let location = if cwd_relative.is_empty() { String::new() } else { format!(" in {}", cwd_relative) };
                let status = if output.success() { "ok" } else { "failed" };
                let synopsis = format!("[ran `{}`{}: {}]", short(&command, 60), location, status);
                let result = if output.success() {
                    ToolResult::success(tool, message)
                } else {
                    ToolResult::error(tool, message)
                };
                result.with_synopsis(synopsis)
            }
            Err(e) => ToolResult::error(tool, format!("Failed to run command: {:#}", e)),
        }
    }

    async fn web_search(&self, args: &Arguments) -> ToolResult {
        let tool = ToolName::WebSearch;
        let Some(query) = args::query(args) else {
            return missing(tool, r#"{"query": "vite react tailwind setup"}"#);
        };
        let Some(search) = &self.search else {
            return ToolResult::error(tool, "Web search is not configured");
        };
        if let Err(result) = self.admit(tool) {
            return result;
        }
        match search.search(&query).await {
            Ok(hits) if hits.is_empty() => ToolResult::success(tool, format!("No results for \"{}\"", query)),
            Ok(hits) => {
                let listing = hits
                    .iter()
                    .enumerate()
                    .map(|(idx, hit)| {
                        if hit.snippet.is_empty() {
                            format!("{}. {}\n   {}", idx + 1, hit.title, hit.url)
                        } else {
                            format!("{}. {}\n   {}\n   {}", idx + 1, hit.title, hit.url, hit.snippet)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                ToolResult::success(tool, truncate_output(listing, self.limits.max_output_bytes))
                    .with_synopsis(format!("[searched \"{}\": {} results]", short(&query, 60), hits.len()))
            }
            Err(e) => ToolResult::error(tool, format!("Search failed: {:#}", e)),
        }
    }

    async fn connection(&self, args: &Arguments) -> ToolResult {
        let tool = ToolName::Connection;
        let (Some(provider), Some(action)) = (args::provider(args), args::action(args)) else {
            return missing(tool, r#"{"provider": "github", "action": "list_repos", "params": {}}"#);
        };
        let Some(connector) = &self.connector else {
            return ToolResult::error(tool, "No third-party connections are configured");
        };
        if let Err(result) = self.admit(tool) {
            return result;
        }
        let params = args::params(args);
        match connector.call(&provider, &action, &params).await {
            Ok(value) => {
                let body = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
                ToolResult::success(tool, truncate_output(body, self.limits.max_output_bytes))
                    .with_synopsis(format!("[{} {} ok]", provider, action))
            }
            Err(e) => ToolResult::error(tool, format!("{} {} failed: {:#}", provider, action, e)),
        }
    }

    async fn write_context(&self, args: &Arguments) -> ToolResult {
        let tool = ToolName::WriteContext;
        let (Some(raw_section), entries) = (args::section(args), args::entries(args)) else {
            return missing(tool, r#"{"section": "tech_stack", "entries": ["React 18", "Vite"]}"#);
        };
        let Some(section) = ContextSection::parse(&raw_section) else {
            return ToolResult::error(
                tool,
                format!(
                    "Unknown context section '{}'. Use one of: tech_stack, preferences, decisions, recent_changes",
                    raw_section
                ),
            );
        };
        if entries.is_empty() {
            return missing(tool, r#"{"section": "tech_stack", "entries": ["React 18", "Vite"]}"#);
        }

        let mut context = match self.context_store.load().await {
            Ok(context) => context,
            Err(e) => return ToolResult::error(tool, format!("Failed to load project context: {:#}", e)),
        };
        let added = context.apply(section, &entries);
        if added == 0 {
            return ToolResult::success(tool, format!("Nothing new for {}; entries already recorded", section.as_str()));
        }
        match self.context_store.save(&context).await {
            Ok(()) => ToolResult::success(tool, format!("Added {} entries to {}", added, section.as_str())),
            Err(e) => ToolResult::error(tool, format!("Failed to save project context: {:#}", e)),
        }
    }

    async fn create_scheduled_task(&self, args: &Arguments) -> ToolResult {
        let tool = ToolName::CreateScheduledTask;
        let shape = r#"{"name": "Nightly build", "cron_expression": "0 2 * * *", "steps": ["npm run build"]}"#;
        let Some(name) = args::task_name(args) else {
            return missing(tool, shape);
        };
        let Some(scheduler) = &self.scheduler else {
            return ToolResult::error(tool, "Task scheduling is not available");
        };
        let schedule = args::schedule(args);
        let Some(cron_expression) =
            args::cron_expression(args).or_else(|| schedule.clone().filter(|s| looks_like_cron(s)))
        else {
            return missing(tool, shape);
        };

        let mut steps: Vec<TaskStep> = args::steps(args).iter().filter_map(step_from_value).collect();
        if steps.is_empty() {
            if let Some(command) = args::command(args) {
                steps.push(command_step(&command));
            }
        }
        if steps.is_empty() {
            return missing(tool, shape);
        }
        for step in &steps {
            if let StepAction::RunCommand { command, .. } = &step.action {
                if let Some(reason) = self.guard.is_blocked(command) {
                    warn!(command = %command, "Scheduled command blocked: {}", reason);
                    return ToolResult::error(tool, format!("Step `{}` is blocked ({})", command, reason));
                }
            }
        }
        let on_failure = args
            .get("on_failure")
            .or_else(|| args.get("onFailure"))
            .and_then(parse_failure_action)
            .unwrap_or_default();

        if let Err(result) = self.admit(tool) {
            return result;
        }
        let draft = TaskDraft {
            name,
            description: args::description(args).unwrap_or_default(),
            schedule: schedule.unwrap_or_else(|| cron_expression.clone()),
            cron_expression,
            project_path: Some(self.sandbox.root().to_string_lossy().to_string()),
            steps,
            on_failure,
        };
        match scheduler.create_task(draft).await {
            Ok(task) => ToolResult::success(
                tool,
                format!(
                    "Scheduled '{}' ({}) with {} step(s). Task id: {}",
                    task.name,
                    task.cron_expression,
                    task.steps.len(),
                    task.id
                ),
            ),
            Err(e) => ToolResult::error(tool, format!("Failed to schedule task: {:#}", e)),
        }
    }
}

fn missing(tool: ToolName, shape: &str) -> ToolResult {
    ToolResult::error(
        tool,
        format!("Missing or invalid arguments for {}. Expected: {}", tool, shape),
    )
}

fn fence(rel: &str, content: &str) -> String {
    format!("```{}\n{}\n```", rel, content)
}

fn short(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}

/// An explicitly empty `content` is a valid (empty) file.
fn content_or_empty(args: &Arguments) -> Option<String> {
    args::content(args).or_else(|| {
        args::CONTENT_KEYS
            .iter()
            .filter_map(|key| args.get(*key))
            .find_map(|value| value.as_str().map(str::to_string))
    })
}

/// Counts `search` in `content`, retrying with CRLF line endings when the file uses them.
fn match_occurrences(content: &str, search: String, replace: String) -> (String, String, usize) {
    let count = content.matches(search.as_str()).count();
    if count == 0 && content.contains("\r\n") && search.contains('\n') && !search.contains("\r\n") {
        let crlf_search = search.replace('\n', "\r\n");
        let crlf_count = content.matches(crlf_search.as_str()).count();
        if crlf_count > 0 {
            return (crlf_search, replace.replace('\n', "\r\n"), crlf_count);
        }
    }
    (search, replace, count)
}

fn join_relative(parent: &str, name: &str) -> String {
    if parent.is_empty() { name.to_string() } else { format!("{}/{}", parent, name) }
}

/// Queues visible children so they pop directories first, then case-insensitive name order.
fn push_children(
    pending: &mut Vec<(PathBuf, String, DirEntry, usize)>,
    parent: &Path,
    parent_rel: &str,
    entries: Vec<DirEntry>,
    depth: usize,
) {
    let mut visible: Vec<DirEntry> = entries
        .into_iter()
        .filter(|entry| {
            if entry.is_dir {
                !is_blocklisted_directory(&entry.name)
            } else {
                !is_noisy_file(&entry.name) && !is_sensitive_file(&join_relative(parent_rel, &entry.name))
            }
        })
        .collect();
    visible.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
    for entry in visible.into_iter().rev() {
        pending.push((parent.to_path_buf(), parent_rel.to_string(), entry, depth));
    }
}

fn is_html(path: &str) -> bool {
    let lower = path.to_lowercase();
    lower.ends_with(".html") || lower.ends_with(".htm")
}

fn has_file_extension(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) => {
            !stem.is_empty() && (1..=6).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}

/// Undoes escaping the tag-style wire format tends to leave in HTML payloads.
fn sanitize_html_content(content: &str) -> String {
    let mut text = content.to_string();
    if !text.contains('<') && text.contains("&lt;") {
        text = text
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&apos;", "'")
            .replace("&amp;", "&");
    }
    text = text.replace("\\\"", "\"").replace("\\'", "'").replace("\\/", "/");
    if !text.contains('\n') && text.contains("\\n") {
        text = text.replace("\\r\\n", "\n").replace("\\n", "\n").replace("\\t", "\t");
    }
    text
}

fn looks_like_cron(schedule: &str) -> bool {
    let fields: Vec<&str> = schedule.split_whitespace().collect();
    (5..=6).contains(&fields.len())
        && fields
            .iter()
            .all(|field| field.chars().all(|c| c.is_ascii_digit() || "*/,-?LW#".contains(c)))
}

fn command_step(command: &str) -> TaskStep {
    TaskStep::new(
        short(command, 40),
        StepAction::RunCommand {
            command: command.to_string(),
            cwd: None,
        },
    )
}

/// Accepts a bare command string, a full step, a bare action, or `{command, cwd?}`.
fn step_from_value(value: &Value) -> Option<TaskStep> {
    match value {
        Value::String(command) if !command.trim().is_empty() => Some(command_step(command.trim())),
        Value::Object(map) => {
            if let Ok(step) = serde_json::from_value::<TaskStep>(value.clone()) {
                return Some(step);
            }
            if let Ok(action) = serde_json::from_value::<StepAction>(value.clone()) {
                let name = map.get("name").and_then(Value::as_str).unwrap_or("step");
                return Some(TaskStep::new(name, action));
            }
            let command = map.get("command").and_then(Value::as_str)?;
            let mut step = command_step(command);
            if let Some(name) = map.get("name").and_then(Value::as_str) {
                step.name = name.to_string();
            }
            if let StepAction::RunCommand { cwd, .. } = &mut step.action {
                *cwd = map.get("cwd").and_then(Value::as_str).map(str::to_string);
            }
            step.depends_on_previous = map
                .get("depends_on_previous")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Some(step)
        }
        _ => None,
    }
}

fn parse_failure_action(value: &Value) -> Option<FailureAction> {
    match value {
        Value::String(raw) => match raw.trim().to_lowercase().replace('-', "_").as_str() {
            "stop" => Some(FailureAction::Stop),
            "skip" | "skip_and_continue" | "continue" => Some(FailureAction::SkipAndContinue),
            "retry" => Some(FailureAction::Retry { max_attempts: 3 }),
            _ => None,
        },
        other => serde_json::from_value(other.clone()).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::AutoApprove;
    use crate::rate_limit::RateLimit;
    use crate::services::{CommandOutput, FileMeta};
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::fs;
    use std::sync::Mutex;

    fn call(name: ToolName, args: Value) -> ToolCall {
        let Value::Object(map) = args else { panic!("object expected") };
        ToolCall::new(name, map)
    }

    fn executor(root: &Path) -> ToolExecutor {
        ToolExecutor::new(root).with_approval(Arc::new(AutoApprove))
    }

    #[derive(Default)]
    struct RecordingFiles {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingFiles {
        fn record(&self, op: &str, path: &Path) {
            self.calls.lock().unwrap().push(format!("{} {}", op, path.display()));
        }
    }

    #[async_trait]
    impl FileService for RecordingFiles {
        async fn read_to_string(&self, path: &Path) -> Result<String> {
            self.record("read", path);
            Err(anyhow!("not found"))
        }
        async fn write(&self, path: &Path, _content: &str) -> Result<()> {
            self.record("write", path);
            Ok(())
        }
        async fn create_dir_all(&self, path: &Path) -> Result<()> {
            self.record("mkdir", path);
            Ok(())
        }
        async fn remove(&self, path: &Path) -> Result<()> {
            self.record("remove", path);
            Ok(())
        }
        async fn list(&self, path: &Path) -> Result<Vec<DirEntry>> {
            self.record("list", path);
            Ok(Vec::new())
        }
        async fn metadata(&self, path: &Path) -> Result<Option<FileMeta>> {
            self.record("stat", path);
            Ok(None)
        }
    }

    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<(String, PathBuf)>>,
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, command: &str, cwd: &Path) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push((command.to_string(), cwd.to_path_buf()));
            Ok(CommandOutput {
                stdout: "built".to_string(),
                stderr: String::new(),
                exit_code: Some(0),
                timed_out: false,
            })
        }
    }

    struct Reject;

    #[async_trait]
    impl ApprovalGate for Reject {
        async fn review(&self, _diff: &PendingDiff) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_write_outside_root_is_rejected_before_any_io() {
        let files = Arc::new(RecordingFiles::default());
        let mut exec = ToolExecutor::new("/work/app").with_files(files.clone());
        let result = exec
            .execute(&call(ToolName::WriteFile, json!({"path": "../../etc/passwd", "content": "x"})))
            .await;
        assert!(!result.success);
        assert!(result.message.contains("outside the project"));
        assert!(files.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_then_read_and_manifest_tracks_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut exec = executor(dir.path());

        let written = exec
            .execute(&call(ToolName::WriteFile, json!({"path": "src/app.ts", "content": "a\nb\n"})))
            .await;
        assert!(written.success, "{}", written.message);
        assert_eq!(written.files_changed, vec!["src/app.ts"]);
        assert_eq!(exec.manifest().get("src/app.ts").unwrap().lines, 2);
        assert!(crate::manifest::manifest_path(dir.path()).exists());

        let read = exec.execute(&call(ToolName::ReadFile, json!({"path": "./src/app.ts"}))).await;
        assert!(read.success);
        assert_eq!(read.message, "```src/app.ts\na\nb\n\n```");
        assert_eq!(read.synopsis(), "[read src/app.ts: 2 lines]");
    }

    #[tokio::test]
    async fn test_read_over_limit_reports_size_instead_of_truncating() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("big.txt"), "x".repeat(200)).unwrap();
        let mut exec = executor(dir.path()).with_limits(ExecutorLimits {
            max_read_bytes: 100,
            ..ExecutorLimits::default()
        });
        let result = exec.execute(&call(ToolName::ReadFile, json!({"path": "big.txt"}))).await;
        assert!(!result.success);
        assert!(result.message.contains("200 bytes"));
    }

    #[tokio::test]
    async fn test_read_multiple_keeps_order_and_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "A").unwrap();
        fs::write(dir.path().join("c.txt"), "C").unwrap();
        let mut exec = executor(dir.path());
        let result = exec
            .execute(&call(ToolName::ReadMultipleFiles, json!({"paths": ["a.txt", "b.txt", "c.txt"]})))
            .await;
        assert!(result.success);
        let a = result.message.find("```a.txt").unwrap();
        let b = result.message.find("Error reading b.txt").unwrap();
        let c = result.message.find("```c.txt").unwrap();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn test_edit_requires_exactly_one_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("page.html");
        let original = "<p>hi</p>\n<p>hi</p>\n";
        fs::write(&file, original).unwrap();
        let mut exec = executor(dir.path());

        let ambiguous = exec
            .execute(&call(
                ToolName::EditFile,
                json!({"path": "page.html", "search": "<p>hi</p>", "replace": "<p>bye</p>"}),
            ))
            .await;
        assert!(!ambiguous.success);
        assert!(ambiguous.message.contains("found 2 occurrences"));
        assert_eq!(fs::read(&file).unwrap(), original.as_bytes());

        let absent = exec
            .execute(&call(ToolName::EditFile, json!({"path": "page.html", "search": "nope", "replace": ""})))
            .await;
        assert!(!absent.success);
        assert_eq!(fs::read(&file).unwrap(), original.as_bytes());

        let unique = exec
            .execute(&call(
                ToolName::EditFile,
                json!({"path": "page.html", "search": "<p>hi</p>\n<p>hi</p>\n", "replace": "<p>one</p>\n"}),
            ))
            .await;
        assert!(unique.success, "{}", unique.message);
        assert_eq!(fs::read_to_string(&file).unwrap(), "<p>one</p>\n");
    }

    #[tokio::test]
    async fn test_edit_matches_crlf_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "one\r\ntwo\r\nthree\r\n").unwrap();
        let mut exec = executor(dir.path());
        let result = exec
            .execute(&call(ToolName::EditFile, json!({"path": "a.txt", "search": "one\ntwo", "replace": "1\n2"})))
            .await;
        assert!(result.success, "{}", result.message);
        assert_eq!(fs::read_to_string(&file).unwrap(), "1\r\n2\r\nthree\r\n");
    }

    #[tokio::test]
    async fn test_rejected_approval_leaves_disk_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut exec = ToolExecutor::new(dir.path()).with_approval(Arc::new(Reject));
        let result = exec
            .execute(&call(ToolName::WriteFile, json!({"path": "new.txt", "content": "x"})))
            .await;
        assert!(!result.success);
        assert!(result.message.contains("rejected the create of new.txt"));
        assert!(!dir.path().join("new.txt").exists());
        assert!(exec.manifest().get("new.txt").is_none());
    }

    #[tokio::test]
    async fn test_cd_prefix_runs_remaining_command_in_subdirectory() {
        let runner = Arc::new(RecordingRunner::default());
        let mut exec = ToolExecutor::new("/work/app").with_commands(runner.clone());
        let result = exec
            .execute(&call(ToolName::RunCommand, json!({"command": "cd src && npm run build"})))
            .await;
        assert!(result.success, "{}", result.message);
        assert_eq!(result.message, "built\n[exit code: 0]");
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[("npm run build".to_string(), PathBuf::from("/work/app/src"))]);
    }

    #[tokio::test]
    async fn test_blocked_command_never_reaches_the_runner() {
        let runner = Arc::new(RecordingRunner::default());
        let mut exec = ToolExecutor::new("/work/app").with_commands(runner.clone());
        let result = exec.execute(&call(ToolName::RunCommand, json!({"command": "rm -rf /"}))).await;
        assert!(!result.success);
        assert!(runner.calls.lock().unwrap().is_empty());

        let bare = exec.execute(&call(ToolName::RunCommand, json!({"command": "cd src"}))).await;
        assert!(bare.success);
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let limiter = Arc::new(RateLimiter::new(HashMap::from([(
            ToolName::WriteFile,
            RateLimit { max: 2, window_ms: 60_000 },
        )])));
        let mut exec = executor(dir.path()).with_limiter(limiter);
        for i in 0..2 {
            let ok = exec
                .execute(&call(ToolName::WriteFile, json!({"path": format!("f{}.txt", i), "content": "x"})))
                .await;
            assert!(ok.success);
        }
        let limited = exec
            .execute(&call(ToolName::WriteFile, json!({"path": "f2.txt", "content": "x"})))
            .await;
        assert!(!limited.success);
        assert!(limited.message.starts_with("Rate limit reached for write_file"));
        assert!(!dir.path().join("f2.txt").exists());
    }

    #[tokio::test]
    async fn test_create_directory_with_file_path_and_content_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut exec = executor(dir.path());
        let result = exec
            .execute(&call(ToolName::CreateDirectory, json!({"path": "src/main.js", "content": "run()"})))
            .await;
        assert!(result.success);
        assert!(dir.path().join("src/main.js").is_file());
        assert_eq!(fs::read_to_string(dir.path().join("src/main.js")).unwrap(), "run()");

        let plain = exec.execute(&call(ToolName::CreateDirectory, json!({"path": "assets/img"}))).await;
        assert!(plain.success);
        assert!(dir.path().join("assets/img").is_dir());
    }

    #[tokio::test]
    async fn test_list_directory_renders_filtered_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/components")).unwrap();
        fs::create_dir_all(root.join("node_modules/react")).unwrap();
        fs::write(root.join("src/components/Button.tsx"), "").unwrap();
        fs::write(root.join("src/main.ts"), "").unwrap();
        fs::write(root.join("README.md"), "").unwrap();
        fs::write(root.join(".env"), "").unwrap();

        let mut exec = executor(root);
        let result = exec.execute(&call(ToolName::ListDirectory, json!({}))).await;
        assert!(result.success);
        assert_eq!(
            result.message,
            "./\nsrc/\n  components/\n    Button.tsx\n  main.ts\nREADME.md"
        );
        assert_eq!(result.synopsis(), "[listed .: 5 entries]");
    }

    #[tokio::test]
    async fn test_delete_removes_file_and_manifest_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut exec = executor(dir.path());
        exec.execute(&call(ToolName::WriteFile, json!({"path": "old.txt", "content": "x"})))
            .await;
        let result = exec.execute(&call(ToolName::DeleteFile, json!({"path": "old.txt"}))).await;
        assert!(result.success);
        assert!(!dir.path().join("old.txt").exists());
        assert!(exec.manifest().get("old.txt").is_none());

        let root = exec.execute(&call(ToolName::DeleteFile, json!({"path": "."}))).await;
        assert!(!root.success);
    }

    #[tokio::test]
    async fn test_directory_delete_refuses_nested_secrets() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("config/prod")).unwrap();
        fs::write(dir.path().join("config/app.json"), "{}").unwrap();
        fs::write(dir.path().join("config/prod/.env"), "TOKEN=x").unwrap();
        let mut exec = executor(dir.path());

        let result = exec.execute(&call(ToolName::DeleteFile, json!({"path": "config"}))).await;
        assert!(!result.success);
        assert!(result.message.contains("config/prod/.env"), "{}", result.message);
        assert!(dir.path().join("config/prod/.env").exists());

        fs::remove_file(dir.path().join("config/prod/.env")).unwrap();
        let result = exec.execute(&call(ToolName::DeleteFile, json!({"path": "config"}))).await;
        assert!(result.success, "{}", result.message);
        assert!(!dir.path().join("config").exists());
    }

    #[tokio::test]
    async fn test_sensitive_and_state_paths_are_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let mut exec = executor(dir.path());
        let env = exec.execute(&call(ToolName::ReadFile, json!({"path": ".env"}))).await;
        assert!(!env.success);
        let state = exec
            .execute(&call(ToolName::WriteFile, json!({"path": ".devify/manifest.json", "content": "{}"})))
            .await;
        assert!(!state.success);
    }

    #[tokio::test]
    async fn test_write_context_persists_sections() {
        let dir = tempfile::tempdir().unwrap();
        let mut exec = executor(dir.path());
        let result = exec
            .execute(&call(ToolName::WriteContext, json!({"section": "techStack", "entries": ["React", "Vite"]})))
            .await;
        assert!(result.success);
        let context = exec.context_store().load().await.unwrap();
        assert_eq!(context.tech_stack, vec!["React", "Vite"]);

        let bad = exec
            .execute(&call(ToolName::WriteContext, json!({"section": "mood", "entries": ["happy"]})))
            .await;
        assert!(!bad.success);
    }

    #[tokio::test]
    async fn test_missing_arguments_name_the_expected_shape() {
        let dir = tempfile::tempdir().unwrap();
        let mut exec = executor(dir.path());
        let result = exec.execute(&call(ToolName::EditFile, json!({"path": "a.txt"}))).await;
        assert!(!result.success);
        assert!(result.message.contains(r#""search""#));
    }

    #[tokio::test]
    async fn test_unknown_tool_lists_valid_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut exec = executor(dir.path());
        let result = exec.execute_named("teleport", Arguments::new()).await;
        assert!(!result.success);
        assert!(result.message.contains("read_file, write_file"));
    }

    #[tokio::test]
    async fn test_unconfigured_collaborators_fail_softly() {
        let dir = tempfile::tempdir().unwrap();
        let mut exec = executor(dir.path());
        let search = exec.execute(&call(ToolName::WebSearch, json!({"query": "rust"}))).await;
        assert!(!search.success);
        let task = exec
            .execute(&call(
                ToolName::CreateScheduledTask,
                json!({"name": "n", "cron_expression": "0 2 * * *", "command": "npm test"}),
            ))
            .await;
        assert!(!task.success);
    }

    #[tokio::test]
    async fn test_scheduled_task_created_from_command_and_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        let store = Arc::new(crate::scheduler::TaskStore::open(home.path()).unwrap());
        let mut exec = executor(dir.path()).with_scheduler(store.clone());
        let result = exec
            .execute(&call(
                ToolName::CreateScheduledTask,
                json!({"name": "Nightly", "schedule": "0 2 * * *", "steps": ["npm run build", {"command": "npm test", "depends_on_previous": true}]}),
            ))
            .await;
        assert!(result.success, "{}", result.message);
        let tasks = store.list().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].cron_expression, "0 0 2 * * *");
        assert_eq!(tasks[0].steps.len(), 2);
        assert!(tasks[0].steps[1].depends_on_previous);

        let blocked = exec
            .execute(&call(
                ToolName::CreateScheduledTask,
                json!({"name": "Wipe", "cron_expression": "0 2 * * *", "command": "rm -rf ~"}),
            ))
            .await;
        assert!(!blocked.success);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_sanitize_html_unescapes_wire_artifacts() {
        assert_eq!(sanitize_html_content("&lt;h1&gt;Hi&lt;/h1&gt;"), "<h1>Hi</h1>");
        assert_eq!(sanitize_html_content("<p>a &lt; b</p>"), "<p>a &lt; b</p>");
        assert_eq!(sanitize_html_content(r#"<a href=\"x\">y<\/a>"#), r#"<a href="x">y</a>"#);
        assert_eq!(sanitize_html_content(r"<p>a</p>\n<p>b</p>"), "<p>a</p>\n<p>b</p>");
    }

    #[test]
    fn test_has_file_extension() {
        assert!(has_file_extension("src/main.js"));
        assert!(has_file_extension("index.html"));
        assert!(!has_file_extension("src/components"));
        assert!(!has_file_extension(".github"));
    }
}
