/*
 * Devify - Agentic Coding Assistant Engine
 * File Path: src/tools.rs
 * Responsibility: Canonical tool set, alias table, call/result types and the tool-result wire format.
 */

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;

/// Loosely-typed argument map exactly as the model produced it.
pub type Arguments = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    ReadFile,
    WriteFile,
    EditFile,
    ListDirectory,
    CreateDirectory,
    DeleteFile,
    ReadMultipleFiles,
    RunCommand,
    WebSearch,
    Connection,
    WriteContext,
    CreateScheduledTask,
}

impl ToolName {
    pub const ALL: [ToolName; 12] = [
        ToolName::ReadFile,
        ToolName::WriteFile,
        ToolName::EditFile,
        ToolName::ListDirectory,
        ToolName::CreateDirectory,
        ToolName::DeleteFile,
        ToolName::ReadMultipleFiles,
        ToolName::RunCommand,
        ToolName::WebSearch,
        ToolName::Connection,
        ToolName::WriteContext,
        ToolName::CreateScheduledTask,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::ReadFile => "read_file",
            ToolName::WriteFile => "write_file",
            ToolName::EditFile => "edit_file",
            ToolName::ListDirectory => "list_directory",
            ToolName::CreateDirectory => "create_directory",
            ToolName::DeleteFile => "delete_file",
            ToolName::ReadMultipleFiles => "read_multiple_files",
            ToolName::RunCommand => "run_command",
            ToolName::WebSearch => "web_search",
            ToolName::Connection => "connection",
            ToolName::WriteContext => "write_context",
            ToolName::CreateScheduledTask => "create_scheduled_task",
        }
    }

    /// Maps a canonical id or any known synonym to its canonical tool.
    pub fn resolve(raw: &str) -> Option<Self> {
        let normalized = normalize_tool_name(raw);
        if normalized.is_empty() {
            return None;
        }
        if let Some(tool) = Self::ALL.iter().find(|tool| tool.as_str() == normalized) {
            return Some(*tool);
        }
        TOOL_ALIASES
            .iter()
            .find(|(alias, _)| *alias == normalized)
            .map(|(_, tool)| *tool)
    }

    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            ToolName::ReadFile | ToolName::ReadMultipleFiles | ToolName::ListDirectory
        )
    }

    pub fn valid_names() -> String {
        Self::ALL
            .iter()
            .map(|tool| tool.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const TOOL_ALIASES: &[(&str, ToolName)] = &[
    // read_file
    ("read", ToolName::ReadFile),
    ("cat", ToolName::ReadFile),
    ("view", ToolName::ReadFile),
    ("view_file", ToolName::ReadFile),
    ("open_file", ToolName::ReadFile),
    ("get_file", ToolName::ReadFile),
    ("show_file", ToolName::ReadFile),
    ("file_read", ToolName::ReadFile),
    ("read_file_content", ToolName::ReadFile),
    // write_file
    ("write", ToolName::WriteFile),
    ("create_file", ToolName::WriteFile),
    ("save_file", ToolName::WriteFile),
    ("write_to_file", ToolName::WriteFile),
    ("file_write", ToolName::WriteFile),
    ("new_file", ToolName::WriteFile),
    ("put_file", ToolName::WriteFile),
    ("overwrite_file", ToolName::WriteFile),
    ("rewrite_file", ToolName::WriteFile),
    // edit_file
    ("edit", ToolName::EditFile),
    ("modify_file", ToolName::EditFile),
    ("update_file", ToolName::EditFile),
    ("patch_file", ToolName::EditFile),
    ("replace_in_file", ToolName::EditFile),
    ("str_replace", ToolName::EditFile),
    ("search_replace", ToolName::EditFile),
    ("search_and_replace", ToolName::EditFile),
    ("apply_edit", ToolName::EditFile),
    // list_directory
    ("ls", ToolName::ListDirectory),
    ("list", ToolName::ListDirectory),
    ("dir", ToolName::ListDirectory),
    ("tree", ToolName::ListDirectory),
    ("list_dir", ToolName::ListDirectory),
    ("list_files", ToolName::ListDirectory),
    ("list_folder", ToolName::ListDirectory),
    ("readdir", ToolName::ListDirectory),
    // create_directory
    ("mkdir", ToolName::CreateDirectory),
    ("make_directory", ToolName::CreateDirectory),
    ("make_dir", ToolName::CreateDirectory),
    ("create_dir", ToolName::CreateDirectory),
    ("create_folder", ToolName::CreateDirectory),
    ("new_folder", ToolName::CreateDirectory),
    // delete_file
    ("rm", ToolName::DeleteFile),
    ("del", ToolName::DeleteFile),
    ("delete", ToolName::DeleteFile),
    ("remove", ToolName::DeleteFile),
    ("remove_file", ToolName::DeleteFile),
    ("unlink", ToolName::DeleteFile),
    ("delete_path", ToolName::DeleteFile),
    ("delete_directory", ToolName::DeleteFile),
    // read_multiple_files
    ("read_files", ToolName::ReadMultipleFiles),
    ("read_many_files", ToolName::ReadMultipleFiles),
    ("cat_files", ToolName::ReadMultipleFiles),
    ("batch_read", ToolName::ReadMultipleFiles),
    ("read_multiple", ToolName::ReadMultipleFiles),
    // run_command
    ("exec", ToolName::RunCommand),
    ("execute", ToolName::RunCommand),
    ("execute_command", ToolName::RunCommand),
    ("run", ToolName::RunCommand),
    ("run_shell", ToolName::RunCommand),
    ("shell", ToolName::RunCommand),
    ("bash", ToolName::RunCommand),
    ("sh", ToolName::RunCommand),
    ("cmd", ToolName::RunCommand),
    ("terminal", ToolName::RunCommand),
    ("run_terminal_command", ToolName::RunCommand),
    // web_search
    ("search", ToolName::WebSearch),
    ("search_web", ToolName::WebSearch),
    ("websearch", ToolName::WebSearch),
    ("internet_search", ToolName::WebSearch),
    ("google", ToolName::WebSearch),
    // connection
    ("connect", ToolName::Connection),
    ("connector", ToolName::Connection),
    ("integration", ToolName::Connection),
    ("use_connection", ToolName::Connection),
    // write_context
    ("update_context", ToolName::WriteContext),
    ("save_context", ToolName::WriteContext),
    ("context_write", ToolName::WriteContext),
    ("remember", ToolName::WriteContext),
    // create_scheduled_task
    ("schedule", ToolName::CreateScheduledTask),
    ("schedule_task", ToolName::CreateScheduledTask),
    ("create_task", ToolName::CreateScheduledTask),
    ("scheduled_task", ToolName::CreateScheduledTask),
    ("cron", ToolName::CreateScheduledTask),
];

fn normalize_tool_name(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`');
    // "functions.read_file" / "tools.read_file"
    let last = trimmed.rsplit('.').next().unwrap_or(trimmed);
    last.to_lowercase().replace(['-', ' '], "_")
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: ToolName,
    pub arguments: Arguments,
}

impl ToolCall {
    pub fn new(name: ToolName, arguments: Arguments) -> Self {
        Self { name, arguments }
    }
}

/// One model turn split into narration and structured calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponse {
    pub text_before: String,
    pub tool_calls: Vec<ToolCall>,
    pub text_after: String,
    pub has_tool_calls: bool,
}

impl ParsedResponse {
    pub fn narration(text: &str) -> Self {
        Self {
            text_before: text.trim().to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub tool: String,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files_changed: Vec<String>,
    /// Short form used once the result has been consumed by the model.
    #[serde(skip)]
    pub synopsis: Option<String>,
}

impl ToolResult {
    pub fn success(tool: impl fmt::Display, message: impl Into<String>) -> Self {
        Self {
            tool: tool.to_string(),
            success: true,
            message: message.into(),
            files_changed: Vec::new(),
            synopsis: None,
        }
    }

    pub fn error(tool: impl fmt::Display, message: impl Into<String>) -> Self {
        Self {
            tool: tool.to_string(),
            success: false,
            message: message.into(),
            files_changed: Vec::new(),
            synopsis: None,
        }
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files_changed = files;
        self
    }

    pub fn with_synopsis(mut self, synopsis: impl Into<String>) -> Self {
        self.synopsis = Some(synopsis.into());
        self
    }

    pub fn synopsis(&self) -> String {
        if let Some(synopsis) = &self.synopsis {
            return synopsis.clone();
        }
        if self.success {
            format!("[{} ok]", self.tool)
        } else {
            let first_line = self.message.lines().next().unwrap_or_default();
            format!("[{} failed: {}]", self.tool, first_line)
        }
    }
}

/// Renders results as the delimited blocks fed back to the model.
pub fn format_tool_results(results: &[ToolResult]) -> String {
    match results {
        [] => String::new(),
        [single] => format!("<tool_result>\n{}\n</tool_result>", single.message),
        many => many
            .iter()
            .map(|result| format!("<tool_result>\n[{}] {}\n</tool_result>", result.tool, result.message))
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}

pub(crate) fn truncate_output(output: String, limit: usize) -> String {
    if limit == 0 {
        return output;
    }

    if output.len() > limit {
        let mut prefix_end = limit / 2;
        while prefix_end > 0 && !output.is_char_boundary(prefix_end) {
            prefix_end -= 1;
        }

        let mut suffix_start = output.len().saturating_sub(limit / 2);
        while suffix_start < output.len() && !output.is_char_boundary(suffix_start) {
            suffix_start += 1;
        }

        let prefix = &output[..prefix_end];
        let suffix = &output[suffix_start..];

        format!(
            "{} ... [TRUNCATED {} bytes] ... {}\n\nHint: output is too large for the conversation. Narrow the command or read a smaller file.",
            prefix,
            suffix_start - prefix_end,
            suffix
        )
    } else {
        output
    }
}

pub fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "read_file",
            "description": "Read a file from the project.",
            "parameters": { "path": "Path relative to the project root" },
            "required": ["path"]
        }),
        json!({
            "name": "write_file",
            "description": "Create or overwrite a file. Parent directories are created automatically.",
            "parameters": { "path": "Path relative to the project root", "content": "Full file content" },
            "required": ["path", "content"]
        }),
        json!({
            "name": "edit_file",
            "description": "Replace an exact snippet. `search` must occur exactly once in the file.",
            "parameters": { "path": "File to edit", "search": "Exact text to find", "replace": "Replacement text" },
            "required": ["path", "search", "replace"]
        }),
        json!({
            "name": "list_directory",
            "description": "List a directory as an indented tree.",
            "parameters": { "path": "Directory relative to the project root, '.' for the root" },
            "required": ["path"]
        }),
        json!({
            "name": "create_directory",
            "description": "Create a directory (and missing parents).",
            "parameters": { "path": "Directory to create" },
            "required": ["path"]
        }),
        json!({
            "name": "delete_file",
            "description": "Delete a file or directory.",
            "parameters": { "path": "Path to delete" },
            "required": ["path"]
        }),
        json!({
            "name": "read_multiple_files",
            "description": "Read several files at once.",
            "parameters": { "paths": "Array of paths relative to the project root" },
            "required": ["paths"]
        }),
        json!({
            "name": "run_command",
            "description": "Run a shell command in the project directory. Use `cd dir && cmd` to run inside a subdirectory.",
            "parameters": { "command": "Shell command" },
            "required": ["command"]
        }),
        json!({
            "name": "web_search",
            "description": "Search the web.",
            "parameters": { "query": "Search query" },
            "required": ["query"]
        }),
        json!({
            "name": "connection",
            "description": "Call a connected third-party service.",
            "parameters": { "provider": "Service name", "action": "Action to perform", "params": "Object with action parameters" },
            "required": ["provider", "action"]
        }),
        json!({
            "name": "write_context",
            "description": "Record durable project notes.",
            "parameters": { "section": "tech_stack | preferences | decisions | recent_changes", "entries": "Array of short notes" },
            "required": ["section", "entries"]
        }),
        json!({
            "name": "create_scheduled_task",
            "description": "Schedule a recurring task.",
            "parameters": {
                "name": "Task name",
                "cron_expression": "Cron expression, e.g. '0 8 * * 1'",
                "schedule": "Human readable schedule",
                "steps": "Array of steps ({ \"command\": \"...\" })",
                "command": "Single command when there is only one step"
            },
            "required": ["name", "cron_expression"]
        }),
    ]
}

/// Tool section of the system prompt.
pub fn tool_instructions() -> String {
    let mut out = String::from("## Tools\n\n");
    out.push_str("To use a tool, wrap one JSON object per call in <tool_call></tool_call> tags:\n\n");
    out.push_str("<tool_call>\n{\"name\": \"read_file\", \"arguments\": {\"path\": \"src/main.ts\"}}\n</tool_call>\n\n");
    out.push_str("Calls in one reply run in order. Results come back in <tool_result> blocks.\n\n");
    out.push_str("### Available tools\n\n");
    for definition in tool_definitions() {
        let name = definition["name"].as_str().unwrap_or_default();
        let description = definition["description"].as_str().unwrap_or_default();
        out.push_str(&format!("- `{}`: {}\n", name, description));
        if let Some(parameters) = definition["parameters"].as_object() {
            for (param, info) in parameters {
                out.push_str(&format!("  - `{}`: {}\n", param, info.as_str().unwrap_or_default()));
            }
        }
    }
    out
}
