/*
 * Devify - Agentic Coding Assistant Engine
 * File Path: src/args.rs
 * Responsibility: Alias-tolerant extraction of logical fields from a loosely-typed argument map.
 */

use crate::tools::Arguments;
use serde_json::Value;

pub const PATH_KEYS: &[&str] = &[
    "path",
    "file_path",
    "filePath",
    "filepath",
    "file",
    "filename",
    "file_name",
    "target_file",
    "target",
    "directory",
    "dir",
    "dir_path",
    "folder",
    "location",
];
pub const CONTENT_KEYS: &[&str] = &[
    "content",
    "contents",
    "file_content",
    "fileContent",
    "new_content",
    "text",
    "body",
    "code",
    "data",
];
pub const COMMAND_KEYS: &[&str] = &["command", "cmd", "shell_command", "commandLine", "script", "run"];
pub const SEARCH_KEYS: &[&str] = &[
    "search",
    "old_text",
    "oldText",
    "old_string",
    "old_str",
    "search_text",
    "find",
    "original",
    "old",
];
pub const REPLACE_KEYS: &[&str] = &[
    "replace",
    "new_text",
    "newText",
    "new_string",
    "new_str",
    "replace_text",
    "replacement",
    "new",
];
pub const QUERY_KEYS: &[&str] = &["query", "q", "search_query", "keywords", "term", "search"];
pub const PATHS_KEYS: &[&str] = &["paths", "files", "file_paths", "filePaths", "filenames"];
pub const SECTION_KEYS: &[&str] = &["section", "category", "key"];
pub const ENTRIES_KEYS: &[&str] = &["entries", "entry", "items", "notes", "values", "value"];
pub const PROVIDER_KEYS: &[&str] = &["provider", "service", "connector", "integration"];
pub const ACTION_KEYS: &[&str] = &["action", "operation", "method"];
pub const PARAMS_KEYS: &[&str] = &["params", "parameters", "args", "input", "payload"];
pub const TASK_NAME_KEYS: &[&str] = &["name", "task_name", "taskName", "title"];
pub const SCHEDULE_KEYS: &[&str] = &["schedule", "when", "frequency"];
pub const CRON_KEYS: &[&str] = &["cron_expression", "cronExpression", "cron"];
pub const STEPS_KEYS: &[&str] = &["steps", "actions"];
pub const DESCRIPTION_KEYS: &[&str] = &["description", "desc", "summary"];

/// Prefixes models invent in front of project-relative paths.
const INVENTED_PREFIXES: &[&str] = &[
    "$(root)/",
    "${root}/",
    "$root/",
    "<root>/",
    "{root}/",
    "{{root}}/",
    "[root]/",
    "$(project)/",
    "${project}/",
    "<project>/",
    "project_root/",
    "$PROJECT_ROOT/",
];

/// Fields whose values are multi-line payloads rather than identifiers.
pub fn is_payload_key(key: &str) -> bool {
    CONTENT_KEYS.contains(&key) || SEARCH_KEYS.contains(&key) || REPLACE_KEYS.contains(&key)
}

/// Every spelling any resolver accepts.
pub fn is_known_key(key: &str) -> bool {
    [
        PATH_KEYS,
        CONTENT_KEYS,
        COMMAND_KEYS,
        SEARCH_KEYS,
        REPLACE_KEYS,
        QUERY_KEYS,
        PATHS_KEYS,
        SECTION_KEYS,
        ENTRIES_KEYS,
        PROVIDER_KEYS,
        ACTION_KEYS,
        PARAMS_KEYS,
        TASK_NAME_KEYS,
        SCHEDULE_KEYS,
        CRON_KEYS,
        STEPS_KEYS,
        DESCRIPTION_KEYS,
    ]
    .iter()
    .any(|keys| keys.contains(&key))
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// First present, non-empty value among `keys`, in order.
pub fn lookup<'a>(args: &'a Arguments, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|key| args.get(*key)).find(|value| is_present(value))
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        other => other.to_string(),
    }
}

pub fn string_field(args: &Arguments, keys: &[&str]) -> Option<String> {
    lookup(args, keys).map(value_to_string)
}

fn trimmed_field(args: &Arguments, keys: &[&str]) -> Option<String> {
    string_field(args, keys)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Normalizes a model-supplied path: separators, quotes, invented prefixes, leading "./".
pub fn clean_path(raw: &str) -> String {
    let mut path = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .replace('\\', "/");

    loop {
        let before = path.len();
        for prefix in INVENTED_PREFIXES {
            if let Some(rest) = path.strip_prefix(prefix) {
                path = rest.to_string();
            }
        }
        while let Some(rest) = path.strip_prefix("./") {
            path = rest.to_string();
        }
        if path.len() == before {
            break;
        }
    }

    path
}

pub fn path(args: &Arguments) -> Option<String> {
    trimmed_field(args, PATH_KEYS)
        .map(|raw| clean_path(&raw))
        .filter(|path| !path.is_empty())
}

/// File content is kept verbatim; structured values are pretty-printed.
pub fn content(args: &Arguments) -> Option<String> {
    string_field(args, CONTENT_KEYS)
}

pub fn command(args: &Arguments) -> Option<String> {
    trimmed_field(args, COMMAND_KEYS)
}

pub fn search(args: &Arguments) -> Option<String> {
    string_field(args, SEARCH_KEYS)
}

/// Like the other resolvers, but an explicitly empty replacement is a valid deletion.
pub fn replace(args: &Arguments) -> Option<String> {
    string_field(args, REPLACE_KEYS).or_else(|| {
        REPLACE_KEYS
            .iter()
            .filter_map(|key| args.get(*key))
            .find_map(|value| value.as_str().map(str::to_string))
    })
}

pub fn query(args: &Arguments) -> Option<String> {
    trimmed_field(args, QUERY_KEYS)
}

/// A list field given either as an array or as a newline/comma separated string.
fn list_field(args: &Arguments, keys: &[&str]) -> Vec<String> {
    match lookup(args, keys) {
        Some(Value::Array(items)) => items
            .iter()
            .map(value_to_string)
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect(),
        Some(value) => split_list(&value_to_string(value)),
        None => Vec::new(),
    }
}

pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(['\n', ','])
        .map(|item| item.trim().trim_start_matches("- ").trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn paths(args: &Arguments) -> Vec<String> {
    list_field(args, PATHS_KEYS)
        .into_iter()
        .map(|raw| clean_path(&raw))
        .filter(|path| !path.is_empty())
        .collect()
}

pub fn section(args: &Arguments) -> Option<String> {
    trimmed_field(args, SECTION_KEYS)
}

/// Entries are one note per line; commas are allowed inside a note.
pub fn entries(args: &Arguments) -> Vec<String> {
    match lookup(args, ENTRIES_KEYS) {
        Some(Value::Array(items)) => items
            .iter()
            .map(value_to_string)
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect(),
        Some(value) => value_to_string(value)
            .lines()
            .map(|line| line.trim().trim_start_matches("- ").trim().to_string())
            .filter(|line| !line.is_empty())
            .collect(),
        None => Vec::new(),
    }
}

pub fn provider(args: &Arguments) -> Option<String> {
    trimmed_field(args, PROVIDER_KEYS)
}

pub fn action(args: &Arguments) -> Option<String> {
    trimmed_field(args, ACTION_KEYS)
}

/// Parameters as an object; a JSON string is decoded, anything else is wrapped.
pub fn params(args: &Arguments) -> Value {
    match lookup(args, PARAMS_KEYS) {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(Value::String(raw)) => serde_json::from_str::<Value>(raw)
            .ok()
            .filter(Value::is_object)
            .unwrap_or_else(|| serde_json::json!({ "value": raw })),
        Some(other) => serde_json::json!({ "value": other }),
        None => Value::Object(Arguments::new()),
    }
}

pub fn task_name(args: &Arguments) -> Option<String> {
    trimmed_field(args, TASK_NAME_KEYS)
}

pub fn schedule(args: &Arguments) -> Option<String> {
    trimmed_field(args, SCHEDULE_KEYS)
}

pub fn cron_expression(args: &Arguments) -> Option<String> {
    trimmed_field(args, CRON_KEYS)
}

pub fn description(args: &Arguments) -> Option<String> {
    trimmed_field(args, DESCRIPTION_KEYS)
}

/// Steps as JSON values; a JSON-encoded string is decoded.
pub fn steps(args: &Arguments) -> Vec<Value> {
    match lookup(args, STEPS_KEYS) {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(items)) => items,
            _ => raw
                .lines()
                .map(|line| line.trim())
                .filter(|line| !line.is_empty())
                .map(|line| Value::String(line.to_string()))
                .collect(),
        },
        Some(other) => vec![other.clone()],
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_path_uses_first_present_alias_and_strips_prefixes() {
        let args = map(json!({ "path": "", "file_path": "$(root)/./src/app.ts" }));
        assert_eq!(path(&args).as_deref(), Some("src/app.ts"));

        let args = map(json!({ "filename": ".\\src\\lib.rs" }));
        assert_eq!(path(&args).as_deref(), Some("src/lib.rs"));

        let args = map(json!({ "content": "x" }));
        assert_eq!(path(&args), None);
    }

    #[test]
    fn test_content_is_verbatim_and_structured_values_are_serialized() {
        let args = map(json!({ "content": "  indented\n" }));
        assert_eq!(content(&args).as_deref(), Some("  indented\n"));

        let args = map(json!({ "content": { "name": "demo" } }));
        let rendered = content(&args).unwrap();
        assert!(rendered.contains("\"name\": \"demo\""));
    }

    #[test]
    fn test_replace_accepts_explicit_empty_string() {
        let args = map(json!({ "search": "x", "replace": "" }));
        assert_eq!(replace(&args).as_deref(), Some(""));
        assert_eq!(search(&args).as_deref(), Some("x"));

        let args = map(json!({ "search": "x" }));
        assert_eq!(replace(&args), None);
    }

    #[test]
    fn test_paths_accepts_arrays_and_delimited_strings() {
        let args = map(json!({ "paths": ["a.txt", " ./b.txt "] }));
        assert_eq!(paths(&args), vec!["a.txt", "b.txt"]);

        let args = map(json!({ "files": "a.txt, b.txt\nc.txt" }));
        assert_eq!(paths(&args), vec!["a.txt", "b.txt", "c.txt"]);
    }

    #[test]
    fn test_params_decodes_json_strings() {
        let args = map(json!({ "params": "{\"repo\": \"demo\"}" }));
        assert_eq!(params(&args), json!({ "repo": "demo" }));
        assert_eq!(params(&Arguments::new()), json!({}));
    }

    #[test]
    fn test_entries_split_on_lines_only() {
        let args = map(json!({ "entries": "- Uses React, Vite\n- Tailwind" }));
        assert_eq!(entries(&args), vec!["Uses React, Vite", "Tailwind"]);
    }

    #[test]
    fn test_numbers_are_stringified() {
        let args = map(json!({ "command": 42 }));
        assert_eq!(command(&args).as_deref(), Some("42"));
    }
}
