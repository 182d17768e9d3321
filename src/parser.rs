/*
 * Devify - Agentic Coding Assistant Engine
 * File Path: src/parser.rs
 * Responsibility: Turn one turn of raw model text into structured tool calls using layered fallbacks.
 */

use crate::args;
use crate::tools::{Arguments, ParsedResponse, ToolCall, ToolName};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use tracing::{debug, warn};

const BLOCK_TAGS: &[(&str, &str)] = &[
    ("<tool_call>", "</tool_call>"),
    ("<toolcall>", "</toolcall>"),
    ("<tool-call>", "</tool-call>"),
];

const NAME_KEYS: &[&str] = &["name", "tool", "tool_name", "toolName", "function"];
const ARGUMENT_KEYS: &[&str] = &["arguments", "args", "parameters", "input"];
const STRUCTURED_CHILD_KEYS: &[&str] = &["steps", "params", "parameters", "arguments", "args"];

static TRIPLE_QUOTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)(?:"""(.*?)"""|'''(.*?)''')"#).unwrap());
static BACKTICK_VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)(:\s*)`(.*?)`(\s*[,}\]])").unwrap());
static SINGLE_QUOTED_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([{,]\s*)'([^'\n]+)'(\s*:)").unwrap());
static SINGLE_QUOTED_VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)(:\s*)'((?:[^'\\]|\\.)*)'(\s*[,}\]])").unwrap());
static QUOTED_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"["'](?:name|tool|tool_name|toolName|function)["']\s*:\s*["'`]([A-Za-z_][\w.\-]*)["'`]"#)
        .unwrap()
});
static FIELD_START_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["']([A-Za-z_][\w]*)["']\s*:\s*(["'`])"#).unwrap());
static SIMPLE_FIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["']([A-Za-z_][\w]*)["']\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());
static LIST_FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)["'](paths|files|file_paths|filePaths)["']\s*:\s*\[(.*?)\]"#).unwrap()
});
static QUOTED_ITEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""((?:[^"\\]|\\.)*)"|'([^']*)'"#).unwrap());
static NEXT_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*,\s*["'][A-Za-z_][\w]*["']\s*:"#).unwrap());
static KEY_VALUE_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*["']?([A-Za-z_][\w]*)["']?\s*[:=]\s?(.*)$"#).unwrap());

#[derive(Debug)]
struct RawCall {
    name: String,
    arguments: Arguments,
}

/// Parses one turn. Never fails: unusable candidates are logged and dropped.
pub fn parse_response(text: &str) -> ParsedResponse {
    if let Some(blocks) = split_delimited_blocks(text) {
        let tool_calls: Vec<ToolCall> = blocks
            .bodies
            .iter()
            .filter_map(|body| parse_candidate(body))
            .collect();
        debug!(
            blocks = blocks.bodies.len(),
            calls = tool_calls.len(),
            "Parsed delimited tool blocks"
        );
        return ParsedResponse {
            text_before: blocks.text_before,
            has_tool_calls: !tool_calls.is_empty(),
            tool_calls,
            text_after: blocks.text_after,
        };
    }

    if let Some(blocks) = split_tag_blocks(text) {
        let tool_calls: Vec<ToolCall> = blocks
            .bodies
            .iter()
            .map(|(tool, body)| ToolCall::new(*tool, parse_tool_tag_body(*tool, body)))
            .collect();
        debug!(calls = tool_calls.len(), "Parsed tag-style tool blocks");
        return ParsedResponse {
            text_before: blocks.text_before,
            has_tool_calls: !tool_calls.is_empty(),
            tool_calls,
            text_after: blocks.text_after,
        };
    }

    ParsedResponse::narration(text)
}

struct Blocks<T> {
    text_before: String,
    bodies: Vec<T>,
    text_after: String,
}

fn join_narration(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn split_delimited_blocks(text: &str) -> Option<Blocks<&str>> {
    let mut text_before: Option<&str> = None;
    let mut narration_after = Vec::new();
    let mut bodies = Vec::new();
    let mut rest = text;

    while let Some((start, open, close)) = BLOCK_TAGS
        .iter()
        .filter_map(|(open, close)| rest.find(open).map(|idx| (idx, *open, *close)))
        .min_by_key(|(idx, _, _)| *idx)
    {
        let narration = &rest[..start];
        if text_before.is_none() {
            text_before = Some(narration);
        } else {
            narration_after.push(narration);
        }

        let body_start = start + open.len();
        match rest[body_start..].find(close) {
            Some(end) => {
                bodies.push(&rest[body_start..body_start + end]);
                rest = &rest[body_start + end + close.len()..];
            }
            None => {
                // Unterminated final block: the stream ended before the closing tag.
                bodies.push(&rest[body_start..]);
                rest = "";
                break;
            }
        }
    }

    if bodies.is_empty() {
        return None;
    }
    narration_after.push(rest);

    Some(Blocks {
        text_before: text_before.unwrap_or_default().trim().to_string(),
        bodies,
        text_after: join_narration(&narration_after),
    })
}

/// Reads `<ident>` at the start of `input`, returning the identifier and the tag length.
fn read_open_tag(input: &str) -> Option<(&str, usize)> {
    let rest = input.strip_prefix('<')?;
    let ident_len = rest
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        .map(|(idx, _)| idx)
        .unwrap_or(rest.len());
    if ident_len == 0 {
        return None;
    }
    let ident = &rest[..ident_len];
    if !ident.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        return None;
    }
    let after = &rest[ident_len..];
    let trimmed = after.trim_start_matches([' ', '\t']);
    if !trimmed.starts_with('>') {
        return None;
    }
    Some((ident, 1 + ident_len + (after.len() - trimmed.len()) + 1))
}

fn split_tag_blocks(text: &str) -> Option<Blocks<(ToolName, &str)>> {
    let mut narration = Vec::new();
    let mut bodies = Vec::new();
    let mut cursor = 0;
    let mut segment_start = 0;

    while let Some(rel) = text[cursor..].find('<') {
        let open_at = cursor + rel;
        let Some((ident, open_len)) = read_open_tag(&text[open_at..]) else {
            cursor = open_at + 1;
            continue;
        };
        let Some(tool) = ToolName::resolve(ident) else {
            cursor = open_at + 1;
            continue;
        };
        let close = format!("</{}>", ident);
        let body_start = open_at + open_len;
        let Some(end) = text[body_start..].find(&close) else {
            cursor = open_at + 1;
            continue;
        };

        narration.push(&text[segment_start..open_at]);
        bodies.push((tool, &text[body_start..body_start + end]));
        cursor = body_start + end + close.len();
        segment_start = cursor;
    }

    if bodies.is_empty() {
        return None;
    }
    narration.push(&text[segment_start..]);

    let text_before = narration.first().map(|s| s.trim().to_string()).unwrap_or_default();
    Some(Blocks {
        text_before,
        bodies,
        text_after: join_narration(&narration[1..]),
    })
}

/// Child tags become named parameters; a body without children feeds the tool's primary field.
fn parse_tool_tag_body(tool: ToolName, body: &str) -> Arguments {
    let mut arguments = parse_child_tags(body);
    if arguments.is_empty() {
        let bare = body.trim();
        if !bare.is_empty() {
            match tool {
                ToolName::ReadFile
                | ToolName::ListDirectory
                | ToolName::CreateDirectory
                | ToolName::DeleteFile => {
                    arguments.insert("path".to_string(), Value::String(bare.to_string()));
                }
                ToolName::ReadMultipleFiles => {
                    arguments.insert("paths".to_string(), string_list(bare));
                }
                ToolName::RunCommand => {
                    arguments.insert("command".to_string(), Value::String(bare.to_string()));
                }
                ToolName::WebSearch => {
                    arguments.insert("query".to_string(), Value::String(bare.to_string()));
                }
                _ => {}
            }
        }
    }
    arguments
}

fn string_list(raw: &str) -> Value {
    Value::Array(args::split_list(raw).into_iter().map(Value::String).collect())
}

fn parse_child_tags(body: &str) -> Arguments {
    let mut arguments = Arguments::new();
    let mut cursor = 0;

    while let Some(rel) = body[cursor..].find('<') {
        let open_at = cursor + rel;
        let Some((ident, open_len)) = read_open_tag(&body[open_at..]) else {
            cursor = open_at + 1;
            continue;
        };
        let close = format!("</{}>", ident);
        let value_start = open_at + open_len;
        let Some(end) = body[value_start..].find(&close) else {
            cursor = open_at + 1;
            continue;
        };

        let raw = &body[value_start..value_start + end];
        arguments.insert(ident.to_string(), child_value(ident, raw));
        cursor = value_start + end + close.len();
    }

    arguments
}

fn child_value(key: &str, raw: &str) -> Value {
    if args::PATHS_KEYS.contains(&key) {
        return string_list(raw);
    }
    if args::is_payload_key(key) {
        let value = raw
            .strip_prefix("\r\n")
            .or_else(|| raw.strip_prefix('\n'))
            .unwrap_or(raw);
        let value = value
            .strip_suffix("\r\n")
            .or_else(|| value.strip_suffix('\n'))
            .unwrap_or(value);
        return Value::String(value.to_string());
    }
    let trimmed = raw.trim();
    if STRUCTURED_CHILD_KEYS.contains(&key) && (trimmed.starts_with('{') || trimmed.starts_with('[')) {
        if let Some(value) = parse_json_lenient(trimmed) {
            return value;
        }
    }
    Value::String(trimmed.to_string())
}

fn parse_candidate(body: &str) -> Option<ToolCall> {
    let body = strip_code_fence(body);
    let raw = parse_strict(body)
        .or_else(|| parse_manual(body))
        .or_else(|| parse_nested(body))
        .or_else(|| parse_key_value_lines(body));

    let Some(raw) = raw else {
        warn!(
            preview = %preview(body),
            "Dropping tool block: no parsing strategy produced a call"
        );
        return None;
    };

    match ToolName::resolve(&raw.name) {
        Some(name) => Some(ToolCall::new(name, raw.arguments)),
        None => {
            warn!(tool = %raw.name, "Dropping tool block: unknown tool name");
            None
        }
    }
}

fn preview(body: &str) -> String {
    body.chars().take(80).collect::<String>().replace('\n', " ")
}

fn strip_code_fence(body: &str) -> &str {
    let trimmed = body.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn json_span(body: &str) -> &str {
    match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => body,
    }
}

// (a) strict parse, first as-is, then after repairing known defects.
fn parse_strict(body: &str) -> Option<RawCall> {
    let value = parse_json_lenient(json_span(body))?;
    call_from_value(&value)
}

fn parse_json_lenient(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text)
        .ok()
        .or_else(|| serde_json::from_str::<Value>(&normalize_json(text)).ok())
}

fn call_from_value(value: &Value) -> Option<RawCall> {
    let object = value.as_object()?;

    // {"function": {"name": ..., "arguments": ...}}
    if let Some(inner @ Value::Object(_)) = object.get("function") {
        if let Some(call) = call_from_value(inner) {
            return Some(call);
        }
    }

    let named: Vec<(&str, &str)> = NAME_KEYS
        .iter()
        .filter_map(|key| object.get(*key).and_then(Value::as_str).map(|name| (*key, name)))
        .collect();
    let (name_key, name) = named
        .iter()
        .find(|(_, name)| ToolName::resolve(name).is_some())
        .or_else(|| named.first())
        .copied()?;

    let arguments = match ARGUMENT_KEYS.iter().find_map(|key| object.get(*key)) {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(raw)) => parse_json_lenient(raw)
            .and_then(|value| value.as_object().cloned())
            .unwrap_or_default(),
        _ => object
            .iter()
            .filter(|(key, _)| key.as_str() != name_key)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
    };

    Some(RawCall {
        name: name.trim().to_string(),
        arguments,
    })
}

/// Repairs triple/back-quoted strings, single quotes, raw control characters and trailing commas.
pub(crate) fn normalize_json(input: &str) -> String {
    let text = TRIPLE_QUOTED_RE.replace_all(input, |caps: &Captures| {
        let inner = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()).unwrap_or_default();
        json_string(inner)
    });
    let text = BACKTICK_VALUE_RE.replace_all(&text, |caps: &Captures| {
        format!("{}{}{}", &caps[1], json_string(&caps[2]), &caps[3])
    });
    let text = SINGLE_QUOTED_KEY_RE.replace_all(&text, "$1\"$2\"$3");
    let text = SINGLE_QUOTED_VALUE_RE.replace_all(&text, |caps: &Captures| {
        format!("{}{}{}", &caps[1], requote_single(&caps[2]), &caps[3])
    });
    repair_string_state(&text)
}

fn json_string(raw: &str) -> String {
    serde_json::to_string(raw).unwrap_or_else(|_| format!("\"{}\"", raw))
}

/// Body of a single-quoted literal as a double-quoted one, keeping its escapes.
fn requote_single(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len() + 2);
    out.push('"');
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('\'') => out.push('\''),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push_str("\\\\"),
            },
            '"' => out.push_str("\\\""),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// Escapes raw control characters inside strings and drops trailing commas outside them.
fn repair_string_state(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                out.push(c);
                escaped = false;
                continue;
            }
            match c {
                '\\' => {
                    out.push(c);
                    escaped = true;
                }
                '"' => {
                    out.push(c);
                    in_string = false;
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                other => out.push(other),
            }
        } else {
            match c {
                '"' => {
                    in_string = true;
                    out.push(c);
                }
                ',' => {
                    let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                    if !matches!(next, Some('}') | Some(']')) {
                        out.push(c);
                    }
                }
                other => out.push(other),
            }
        }
    }

    out
}

// (b) regex field extraction that survives broken quoting.
fn parse_manual(body: &str) -> Option<RawCall> {
    let name = QUOTED_NAME_RE
        .captures_iter(body)
        .map(|caps| caps[1].to_string())
        .find(|name| ToolName::resolve(name).is_some())
        .or_else(|| QUOTED_NAME_RE.captures(body).map(|caps| caps[1].to_string()))?;

    let mut arguments = Arguments::new();
    let mut payload_spans: Vec<(usize, usize)> = Vec::new();

    for caps in FIELD_START_RE.captures_iter(body) {
        let Some(whole) = caps.get(0) else { continue };
        if payload_spans.iter().any(|(start, end)| whole.start() >= *start && whole.start() < *end) {
            continue;
        }
        let key = &caps[1];
        if !args::is_payload_key(key) {
            continue;
        }
        let quote = caps[2].chars().next().unwrap_or('"');
        let (value, consumed) = walk_string_value(&body[whole.end()..], quote);
        payload_spans.push((whole.start(), whole.end() + consumed));
        arguments.insert(key.to_string(), Value::String(value));
    }

    for caps in SIMPLE_FIELD_RE.captures_iter(body) {
        let Some(whole) = caps.get(0) else { continue };
        let key = &caps[1];
        if NAME_KEYS.contains(&key) || arguments.contains_key(key) {
            continue;
        }
        if payload_spans.iter().any(|(start, end)| whole.start() >= *start && whole.start() < *end) {
            continue;
        }
        let raw = &caps[2];
        let value = serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| raw.to_string());
        arguments.insert(key.to_string(), Value::String(value));
    }

    for caps in LIST_FIELD_RE.captures_iter(body) {
        let items: Vec<Value> = QUOTED_ITEM_RE
            .captures_iter(&caps[2])
            .filter_map(|item| item.get(1).or_else(|| item.get(2)))
            .map(|m| Value::String(m.as_str().to_string()))
            .collect();
        arguments.insert(caps[1].to_string(), Value::Array(items));
    }

    Some(RawCall { name, arguments })
}

/// Character walk over a string value. A closing quote only counts when the value
/// can plausibly end there (next key, closing braces, or end of block).
fn walk_string_value(input: &str, quote: char) -> (String, usize) {
    let mut out = String::new();
    let mut chars = input.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, 'u')) => {
                    let hex: String = (0..4).filter_map(|_| chars.next().map(|(_, h)| h)).collect();
                    match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                        Some(decoded) => out.push(decoded),
                        None => {
                            out.push_str("\\u");
                            out.push_str(&hex);
                        }
                    }
                }
                Some((_, escaped @ ('"' | '\'' | '`' | '\\' | '/'))) => out.push(escaped),
                Some((_, other)) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            c if c == quote => {
                let rest = &input[idx + c.len_utf8()..];
                if closes_value(rest) {
                    return (out, idx + c.len_utf8());
                }
                out.push(c);
            }
            other => out.push(other),
        }
    }

    (out, input.len())
}

fn closes_value(rest: &str) -> bool {
    if NEXT_KEY_RE.is_match(rest) {
        return true;
    }
    rest.trim_start_matches(|c: char| c == '}' || c == ']' || c.is_whitespace())
        .is_empty()
}

// (c) name and arguments wrapper nested inside the block without an outer object.
fn parse_nested(body: &str) -> Option<RawCall> {
    let trimmed = body.trim().trim_end_matches(',');
    if !trimmed.starts_with('{') {
        if let Some(call) = parse_json_lenient(&format!("{{{}}}", trimmed))
            .as_ref()
            .and_then(call_from_value)
        {
            return Some(call);
        }
    }

    let children = parse_child_tags(body);
    let name = NAME_KEYS
        .iter()
        .find_map(|key| children.get(*key).and_then(Value::as_str))?
        .trim()
        .to_string();

    let arguments = ARGUMENT_KEYS
        .iter()
        .find_map(|key| children.get(*key))
        .map(|wrapper| match wrapper {
            Value::Object(map) => map.clone(),
            Value::String(inner) => parse_json_lenient(json_span(inner.trim()))
                .and_then(|value| value.as_object().cloned())
                .unwrap_or_else(|| parse_child_tags(inner)),
            _ => Arguments::new(),
        })
        .unwrap_or_default();

    Some(RawCall { name, arguments })
}

// (d) `key: value` lines; payload fields may continue over following lines.
fn parse_key_value_lines(body: &str) -> Option<RawCall> {
    let mut name: Option<String> = None;
    let mut arguments = Arguments::new();
    let mut open_payload: Option<(String, Vec<String>)> = None;

    let flush = |open: &mut Option<(String, Vec<String>)>, arguments: &mut Arguments| {
        if let Some((key, lines)) = open.take() {
            let value = lines.join("\n");
            let value = value.trim_matches('\n').trim_end_matches(',');
            arguments.insert(key, Value::String(strip_quotes(value).to_string()));
        }
    };

    for line in body.lines() {
        let captured = KEY_VALUE_LINE_RE.captures(line).and_then(|caps| {
            let key = caps.get(1)?.as_str();
            let recognized = NAME_KEYS.contains(&key) || args::is_known_key(key);
            recognized.then(|| (key.to_string(), caps.get(2).map(|m| m.as_str()).unwrap_or("").to_string()))
        });

        match captured {
            Some((key, value)) => {
                flush(&mut open_payload, &mut arguments);
                let value = value.trim();
                if NAME_KEYS.contains(&key.as_str()) && name.is_none() {
                    name = Some(strip_quotes(value.trim_end_matches(',')).to_string());
                } else if args::is_payload_key(&key) {
                    let first = value.trim_start_matches('|').trim();
                    let lines = if first.is_empty() { Vec::new() } else { vec![first.to_string()] };
                    open_payload = Some((key, lines));
                } else if !value.is_empty() {
                    arguments.insert(
                        key,
                        Value::String(strip_quotes(value.trim_end_matches(',')).to_string()),
                    );
                }
            }
            None => {
                if let Some((_, lines)) = open_payload.as_mut() {
                    lines.push(line.to_string());
                }
            }
        }
    }
    flush(&mut open_payload, &mut arguments);

    let name = name.filter(|name| !name.is_empty())?;
    Some(RawCall { name, arguments })
}

fn strip_quotes(value: &str) -> &str {
    let value = value.trim();
    for quote in ['"', '\'', '`'] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args_of(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parses_delimited_json_block() {
        let parsed = parse_response(
            r#"<tool_call>{"name":"write_file","arguments":{"path":"index.html","content":"<h1>Hi</h1>"}}</tool_call>"#,
        );
        assert!(parsed.has_tool_calls);
        assert_eq!(
            parsed.tool_calls,
            vec![ToolCall::new(
                ToolName::WriteFile,
                args_of(json!({ "path": "index.html", "content": "<h1>Hi</h1>" }))
            )]
        );
    }

    #[test]
    fn test_parses_tag_style_block() {
        let parsed = parse_response("<read_file><path>a.txt</path></read_file>");
        assert_eq!(
            parsed.tool_calls,
            vec![ToolCall::new(ToolName::ReadFile, args_of(json!({ "path": "a.txt" })))]
        );
    }

    #[test]
    fn test_keeps_narration_around_blocks() {
        let parsed = parse_response(
            "Let me look.\n<tool_call>{\"name\":\"read_file\",\"arguments\":{\"path\":\"a\"}}</tool_call>\nThen \
             <tool_call>{\"name\":\"read_file\",\"arguments\":{\"path\":\"b\"}}</tool_call>\nDone.",
        );
        assert_eq!(parsed.text_before, "Let me look.");
        assert_eq!(parsed.text_after, "Then\n\nDone.");
        assert_eq!(parsed.tool_calls.len(), 2);
    }

    #[test]
    fn test_plain_text_has_no_calls() {
        let parsed = parse_response("All done, nothing else to change.");
        assert!(!parsed.has_tool_calls);
        assert!(parsed.tool_calls.is_empty());
        assert_eq!(parsed.text_before, "All done, nothing else to change.");
    }

    #[test]
    fn test_malformed_blocks_match_well_formed_equivalent() {
        let expected = parse_response(
            r#"<tool_call>{"name": "write_file", "arguments": {"path": "a.py", "content": "x = 1\nprint(\"hi\")"}}</tool_call>"#,
        );
        assert_eq!(expected.tool_calls.len(), 1);

        let triple = parse_response(
            "<tool_call>{\"name\": \"write_file\", \"arguments\": {\"path\": \"a.py\", \"content\": \"\"\"x = 1\nprint(\"hi\")\"\"\"}}</tool_call>",
        );
        assert_eq!(triple.tool_calls, expected.tool_calls);

        let single = parse_response(
            r#"<tool_call>{'name': 'write_file', 'arguments': {'path': 'a.py', 'content': 'x = 1\nprint("hi")'}}</tool_call>"#,
        );
        assert_eq!(single.tool_calls, expected.tool_calls);

        let trailing = parse_response(
            r#"<tool_call>{"name": "write_file", "arguments": {"path": "a.py", "content": "x = 1\nprint(\"hi\")",},}</tool_call>"#,
        );
        assert_eq!(trailing.tool_calls, expected.tool_calls);

        let raw_newline = parse_response(
            "<tool_call>{\"name\": \"write_file\", \"arguments\": {\"path\": \"a.py\", \"content\": \"x = 1\nprint(\\\"hi\\\")\"}}</tool_call>",
        );
        assert_eq!(raw_newline.tool_calls, expected.tool_calls);
    }

    #[test]
    fn test_backquoted_value_is_normalized() {
        let parsed = parse_response(
            "<tool_call>{\"name\": \"write_file\", \"arguments\": {\"path\": \"a.js\", \"content\": `const a = \"x\";\nexport default a;`}}</tool_call>",
        );
        assert_eq!(
            parsed.tool_calls[0].arguments["content"],
            json!("const a = \"x\";\nexport default a;")
        );
    }

    #[test]
    fn test_manual_extraction_survives_unescaped_quotes() {
        let parsed = parse_response(
            r#"<tool_call>{"name": "write_file", "arguments": {"path": "index.html", "content": "<div class="hero">Hi</div>"}}</tool_call>"#,
        );
        assert_eq!(parsed.tool_calls.len(), 1);
        let arguments = &parsed.tool_calls[0].arguments;
        assert_eq!(arguments["path"], json!("index.html"));
        assert_eq!(arguments["content"], json!(r#"<div class="hero">Hi</div>"#));
    }

    #[test]
    fn test_manual_extraction_handles_search_and_replace() {
        let parsed = parse_response(
            r#"<tool_call>{"name": "edit_file", "arguments": {"path": "a.js", "search": "say("hi")", "replace": "say("bye")\n"}}</tool_call>"#,
        );
        let arguments = &parsed.tool_calls[0].arguments;
        assert_eq!(parsed.tool_calls[0].name, ToolName::EditFile);
        assert_eq!(arguments["search"], json!(r#"say("hi")"#));
        assert_eq!(arguments["replace"], json!("say(\"bye\")\n"));
    }

    #[test]
    fn test_nested_name_and_arguments_tags() {
        let parsed = parse_response(
            "<tool_call>\n<name>read_file</name>\n<arguments>{\"path\": \"src/main.rs\"}</arguments>\n</tool_call>",
        );
        assert_eq!(
            parsed.tool_calls,
            vec![ToolCall::new(ToolName::ReadFile, args_of(json!({ "path": "src/main.rs" })))]
        );
    }

    #[test]
    fn test_key_value_line_fallback() {
        let parsed = parse_response(
            "<tool_call>\nname: write_file\npath: notes.md\ncontent: |\n# Notes\n- first\n</tool_call>",
        );
        assert_eq!(parsed.tool_calls.len(), 1);
        let call = &parsed.tool_calls[0];
        assert_eq!(call.name, ToolName::WriteFile);
        assert_eq!(call.arguments["path"], json!("notes.md"));
        assert_eq!(call.arguments["content"], json!("# Notes\n- first"));
    }

    #[test]
    fn test_aliases_resolve_and_unknown_names_drop() {
        let parsed = parse_response(
            "<tool_call>{\"name\": \"mkdir\", \"arguments\": {\"path\": \"src\"}}</tool_call>\
             <tool_call>{\"name\": \"teleport\", \"arguments\": {}}</tool_call>",
        );
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, ToolName::CreateDirectory);
    }

    #[test]
    fn test_primary_strategy_wins_over_tag_style() {
        let parsed = parse_response(
            "<tool_call>{\"name\": \"read_file\", \"arguments\": {\"path\": \"a.txt\"}}</tool_call>\n\
             <delete_file><path>b.txt</path></delete_file>",
        );
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, ToolName::ReadFile);
    }

    #[test]
    fn test_tag_style_aliases_lists_and_bare_bodies() {
        let parsed = parse_response(
            "Reading both.\n<read_multiple_files><paths>a.txt, b.txt\nc.txt</paths></read_multiple_files>\n<exec>npm test</exec>",
        );
        assert_eq!(parsed.text_before, "Reading both.");
        assert_eq!(parsed.tool_calls.len(), 2);
        assert_eq!(parsed.tool_calls[0].arguments["paths"], json!(["a.txt", "b.txt", "c.txt"]));
        assert_eq!(parsed.tool_calls[1].name, ToolName::RunCommand);
        assert_eq!(parsed.tool_calls[1].arguments["command"], json!("npm test"));
    }

    #[test]
    fn test_tag_style_content_keeps_markup() {
        let parsed = parse_response(
            "<write_file>\n<path>index.html</path>\n<content>\n<h1>Hi</h1>\n</content>\n</write_file>",
        );
        assert_eq!(parsed.tool_calls[0].arguments["content"], json!("<h1>Hi</h1>"));
    }

    #[test]
    fn test_arguments_as_json_string_and_function_wrapper() {
        let parsed = parse_response(
            r#"<tool_call>{"function": {"name": "run_command", "arguments": "{\"command\": \"ls\"}"}}</tool_call>"#,
        );
        assert_eq!(
            parsed.tool_calls,
            vec![ToolCall::new(ToolName::RunCommand, args_of(json!({ "command": "ls" })))]
        );
    }

    #[test]
    fn test_unterminated_final_block_is_still_parsed() {
        let parsed = parse_response("Ok.\n<tool_call>{\"name\": \"list_directory\", \"arguments\": {\"path\": \".\"}}");
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.text_before, "Ok.");
    }

    #[test]
    fn test_flat_arguments_keep_task_name() {
        let parsed = parse_response(
            r#"<tool_call>{"name": "Nightly backup", "tool": "create_scheduled_task", "cron_expression": "0 2 * * *"}</tool_call>"#,
        );
        let call = &parsed.tool_calls[0];
        assert_eq!(call.name, ToolName::CreateScheduledTask);
        assert_eq!(call.arguments["name"], json!("Nightly backup"));
    }

    #[test]
    fn test_normalize_json_leaves_commas_inside_strings() {
        let repaired = normalize_json("{\"a\": \"x,}\", \"b\": [1, 2,],}");
        assert_eq!(serde_json::from_str::<Value>(&repaired).unwrap(), json!({ "a": "x,}", "b": [1, 2] }));
    }
}
