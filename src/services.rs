/*
 * Devify - Agentic Coding Assistant Engine
 * File Path: src/services.rs
 * Responsibility: Collaborator interfaces (files, commands, search, connectors) and their local implementations.
 */

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub is_dir: bool,
    pub size: u64,
}

/// Path-addressed file access. Callers pass paths already confined by the sandbox.
#[async_trait]
pub trait FileService: Send + Sync {
    async fn read_to_string(&self, path: &Path) -> Result<String>;
    /// Creates missing parent directories.
    async fn write(&self, path: &Path, content: &str) -> Result<()>;
    async fn create_dir_all(&self, path: &Path) -> Result<()>;
    async fn remove(&self, path: &Path) -> Result<()>;
    async fn list(&self, path: &Path) -> Result<Vec<DirEntry>>;
    /// `None` when nothing exists at `path`.
    async fn metadata(&self, path: &Path) -> Result<Option<FileMeta>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileService;

#[async_trait]
impl FileService for LocalFileService {
    async fn read_to_string(&self, path: &Path) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    async fn write(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("Failed to create {}", path.display()))
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        let meta = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        let removed = if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };
        removed.with_context(|| format!("Failed to delete {}", path.display()))
    }

    async fn list(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let mut reader = tokio::fs::read_dir(path)
            .await
            .with_context(|| format!("Failed to list {}", path.display()))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let meta = entry.metadata().await?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_dir: meta.is_dir(),
                size: meta.len(),
            });
        }
        Ok(entries)
    }

    async fn metadata(&self, path: &Path) -> Result<Option<FileMeta>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(Some(FileMeta {
                is_dir: meta.is_dir(),
                size: meta.len(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to stat {}", path.display())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal or the timeout.
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }

    /// `stdout`, `[stderr]` and exit code in one block.
    pub fn render(&self) -> String {
        let mut combined = String::new();
        if !self.stdout.trim().is_empty() {
            combined.push_str(self.stdout.trim_end());
        }
        if !self.stderr.trim().is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str("[stderr]\n");
            combined.push_str(self.stderr.trim_end());
        }
        if combined.is_empty() {
            combined.push_str("(no output)");
        }
        let code = match (self.timed_out, self.exit_code) {
            (true, _) => "timed out".to_string(),
            (false, Some(code)) => code.to_string(),
            (false, None) => "terminated by signal".to_string(),
        };
        format!("{}\n[exit code: {}]", combined, code)
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str, cwd: &Path) -> Result<CommandOutput>;
}

/// Runs each command in a fresh platform shell, killed when the timeout elapses.
#[derive(Debug, Clone)]
pub struct ShellCommandRunner {
    timeout: Duration,
}

impl ShellCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ShellCommandRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd.exe");
        cmd.args(["/D", "/S", "/C", command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(&self, command: &str, cwd: &Path) -> Result<CommandOutput> {
        debug!(command, cwd = %cwd.display(), "Spawning shell command");
        let child = shell_command(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn `{}`", command))?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output.with_context(|| format!("Failed to wait for `{}`", command))?;
                Ok(CommandOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    exit_code: output.status.code(),
                    timed_out: false,
                })
            }
            Err(_) => Ok(CommandOutput {
                stdout: String::new(),
                stderr: format!("Command timed out after {}s and was killed", self.timeout.as_secs()),
                exit_code: None,
                timed_out: true,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>>;
}

/// Third-party integrations addressed by provider and action name.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn call(&self, provider: &str, action: &str, params: &Value) -> Result<Value>;
}

/// JSON search endpoint answering `{"results": [{title, url, snippet|content}]}`.
#[derive(Debug, Clone)]
pub struct HttpSearchProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpSearchProvider {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let mut request = self.client.post(&self.endpoint).json(&json!({ "query": query, "max_results": 5 }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.context("Search request failed")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Search endpoint returned {}: {}", status, body));
        }
        let body: Value = response.json().await.context("Search response was not JSON")?;
        Ok(parse_search_hits(&body))
    }
}

fn parse_search_hits(body: &Value) -> Vec<SearchHit> {
    body["results"]
        .as_array()
        .map(|results| {
            results
                .iter()
                .filter_map(|item| {
                    let url = item["url"].as_str()?.to_string();
                    Some(SearchHit {
                        title: item["title"].as_str().unwrap_or(&url).to_string(),
                        snippet: item["snippet"]
                            .as_str()
                            .or_else(|| item["content"].as_str())
                            .unwrap_or_default()
                            .to_string(),
                        url,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Forwards `{provider, action, params}` to a gateway that owns the third-party credentials.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpConnector {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            token,
        }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn call(&self, provider: &str, action: &str, params: &Value) -> Result<Value> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "provider": provider, "action": action, "params": params }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.context("Connector request failed")?;
        let status = response.status();
        let body = response.text().await.context("Failed to read connector response")?;
        if !status.is_success() {
            return Err(anyhow!("{} {} failed ({}): {}", provider, action, status, body));
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_file_service_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let files = LocalFileService;
        let path = dir.path().join("nested/deeper/a.txt");

        files.write(&path, "hello").await.unwrap();
        assert_eq!(files.read_to_string(&path).await.unwrap(), "hello");
        assert_eq!(
            files.metadata(&path).await.unwrap(),
            Some(FileMeta { is_dir: false, size: 5 })
        );

        let listed = files.list(&dir.path().join("nested")).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_dir);

        files.remove(&dir.path().join("nested")).await.unwrap();
        assert_eq!(files.metadata(&path).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_shell_runner_captures_streams_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellCommandRunner::default();
        let output = runner.run("echo out && echo err 1>&2 && exit 3", dir.path()).await.unwrap();
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert!(output.render().ends_with("[exit code: 3]"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_runner_uses_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let output = ShellCommandRunner::default()
            .run("pwd", &dir.path().join("sub"))
            .await
            .unwrap();
        assert!(output.stdout.trim().ends_with("sub"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_runner_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let output = ShellCommandRunner::new(Duration::from_millis(200))
            .run("sleep 5", dir.path())
            .await
            .unwrap();
        assert!(output.timed_out);
        assert_eq!(output.exit_code, None);
    }

    #[test]
    fn test_render_empty_output() {
        let output = CommandOutput {
            exit_code: Some(0),
            ..Default::default()
        };
        assert_eq!(output.render(), "(no output)\n[exit code: 0]");
    }

    #[test]
    fn test_parse_search_hits_accepts_content_field() {
        let hits = parse_search_hits(&json!({
            "results": [
                { "title": "Rust", "url": "https://rust-lang.org", "content": "A language" },
                { "title": "no url" }
            ]
        }));
        assert_eq!(
            hits,
            vec![SearchHit {
                title: "Rust".into(),
                url: "https://rust-lang.org".into(),
                snippet: "A language".into()
            }]
        );
    }
}
