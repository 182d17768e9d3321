/*
 * Devify - Agentic Coding Assistant Engine
 * File Path: src/manifest.rs
 * Responsibility: Lightweight per-project file index kept in sync with every mutation.
 */

use crate::sandbox::{is_blocklisted_directory, is_noisy_file, is_sensitive_file};
use crate::services::FileService;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Project-local state directory; blocklisted for every file tool.
pub const STATE_DIR: &str = ".devify";
const MANIFEST_FILE: &str = "manifest.json";
const MAX_INDEXED_FILES: usize = 5_000;
const MAX_COUNTED_BYTES: u64 = 2 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub size: u64,
    pub lines: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectManifest {
    pub project_path: String,
    pub generated_at: String,
    pub total_files: usize,
    pub entries: Vec<ManifestEntry>,
}

pub fn manifest_path(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join(MANIFEST_FILE)
}

impl ProjectManifest {
    pub fn empty(root: &Path) -> Self {
        Self {
            project_path: root.to_string_lossy().to_string(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            total_files: 0,
            entries: Vec::new(),
        }
    }

    /// Walks the project with the blocklist applied; sensitive files are never indexed.
    pub async fn generate(root: &Path, files: &dyn FileService) -> Result<Self> {
        let mut manifest = Self::empty(root);
        let mut pending: Vec<(PathBuf, String)> = vec![(root.to_path_buf(), String::new())];

        while let Some((dir, relative)) = pending.pop() {
            let entries = files
                .list(&dir)
                .await
                .with_context(|| format!("Failed to index {}", dir.display()))?;
            for entry in entries {
                let child_relative = if relative.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{}/{}", relative, entry.name)
                };
                if entry.is_dir {
                    if !is_blocklisted_directory(&entry.name) {
                        pending.push((dir.join(&entry.name), child_relative));
                    }
                    continue;
                }
                if is_noisy_file(&entry.name) || is_sensitive_file(&child_relative) {
                    continue;
                }
                if manifest.entries.len() >= MAX_INDEXED_FILES {
                    break;
                }
                let lines = if entry.size <= MAX_COUNTED_BYTES {
                    files
                        .read_to_string(&dir.join(&entry.name))
                        .await
                        .map(|content| count_lines(&content))
                        .unwrap_or(0)
                } else {
                    0
                };
                manifest.entries.push(ManifestEntry {
                    description: describe(&child_relative),
                    path: child_relative,
                    size: entry.size,
                    lines,
                });
            }
        }

        manifest.entries.sort_by(|a, b| a.path.cmp(&b.path));
        manifest.total_files = manifest.entries.len();
        info!(root = %root.display(), files = manifest.total_files, "Generated project manifest");
        Ok(manifest)
    }

    pub async fn load(root: &Path) -> Result<Option<Self>> {
        let path = manifest_path(root);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let manifest = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse {}", path.display()))?;
                Ok(Some(manifest))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub async fn save(&self, root: &Path) -> Result<()> {
        let path = manifest_path(root);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Reloads the stored manifest, or generates and persists a fresh one.
    pub async fn open(root: &Path, files: &dyn FileService) -> Result<Self> {
        if let Some(manifest) = Self::load(root).await? {
            debug!(files = manifest.total_files, "Loaded project manifest");
            return Ok(manifest);
        }
        let manifest = Self::generate(root, files).await?;
        manifest.save(root).await?;
        Ok(manifest)
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|entry| entry.path == path)
    }

    /// Records a write; entries stay sorted by path.
    pub fn upsert(&mut self, path: &str, content: &str) {
        let size = content.len() as u64;
        let lines = count_lines(content);
        match self.entries.binary_search_by(|entry| entry.path.as_str().cmp(path)) {
            Ok(idx) => {
                self.entries[idx].size = size;
                self.entries[idx].lines = lines;
            }
            Err(idx) => self.entries.insert(
                idx,
                ManifestEntry {
                    path: path.to_string(),
                    size,
                    lines,
                    description: describe(path),
                },
            ),
        }
        self.total_files = self.entries.len();
    }

    /// Drops `path` and, for directories, everything beneath it.
    pub fn remove(&mut self, path: &str) -> usize {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let before = self.entries.len();
        self.entries
            .retain(|entry| entry.path != path && !entry.path.starts_with(&prefix));
        self.total_files = self.entries.len();
        before - self.entries.len()
    }

    /// Compact listing for the system prompt.
    pub fn summary(&self, max_entries: usize) -> String {
        let mut out = format!("Project files ({} total):\n", self.total_files);
        for entry in self.entries.iter().take(max_entries) {
            match &entry.description {
                Some(description) => {
                    out.push_str(&format!("- {} ({} lines) {}\n", entry.path, entry.lines, description))
                }
                None => out.push_str(&format!("- {} ({} lines)\n", entry.path, entry.lines)),
            }
        }
        if self.entries.len() > max_entries {
            out.push_str(&format!("- ... {} more\n", self.entries.len() - max_entries));
        }
        out
    }
}

fn count_lines(content: &str) -> usize {
    content.lines().count()
}

fn describe(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path).to_lowercase();
    let description = match name.as_str() {
        "package.json" => "npm manifest",
        "cargo.toml" => "Rust crate manifest",
        "pyproject.toml" | "requirements.txt" => "Python dependencies",
        "readme.md" => "project readme",
        "index.html" => "HTML entry point",
        "vite.config.ts" | "vite.config.js" => "Vite config",
        "tsconfig.json" => "TypeScript config",
        "dockerfile" => "container build",
        _ => return None,
    };
    Some(format!("[{}]", description))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::LocalFileService;
    use std::fs;

    #[tokio::test]
    async fn test_generate_skips_blocklisted_and_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("node_modules/x")).unwrap();
        fs::write(root.join("src/main.ts"), "a\nb\nc\n").unwrap();
        fs::write(root.join("package.json"), "{}").unwrap();
        fs::write(root.join("node_modules/x/index.js"), "x").unwrap();
        fs::write(root.join(".env"), "SECRET=1").unwrap();
        fs::write(root.join("yarn.lock"), "lock").unwrap();

        let manifest = ProjectManifest::generate(root, &LocalFileService).await.unwrap();
        let paths: Vec<&str> = manifest.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["package.json", "src/main.ts"]);
        assert_eq!(manifest.total_files, 2);
        assert_eq!(manifest.get("src/main.ts").unwrap().lines, 3);
        assert_eq!(manifest.get("package.json").unwrap().description.as_deref(), Some("[npm manifest]"));
    }

    #[tokio::test]
    async fn test_open_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "one").unwrap();

        let mut first = ProjectManifest::open(dir.path(), &LocalFileService).await.unwrap();
        assert!(manifest_path(dir.path()).exists());

        first.upsert("b.txt", "1\n2");
        first.save(dir.path()).await.unwrap();
        fs::write(dir.path().join("c.txt"), "not indexed until regenerated").unwrap();

        let reloaded = ProjectManifest::open(dir.path(), &LocalFileService).await.unwrap();
        assert_eq!(reloaded, first);
        assert!(reloaded.get("c.txt").is_none());
    }

    #[test]
    fn test_upsert_and_remove() {
        let mut manifest = ProjectManifest::empty(Path::new("/p"));
        manifest.upsert("src/b.ts", "x");
        manifest.upsert("src/a.ts", "x\ny");
        manifest.upsert("src/b.ts", "x\ny\nz");
        assert_eq!(manifest.total_files, 2);
        assert_eq!(manifest.entries[0].path, "src/a.ts");
        assert_eq!(manifest.get("src/b.ts").unwrap().lines, 3);

        manifest.upsert("srcx.ts", "");
        assert_eq!(manifest.remove("src"), 2);
        assert_eq!(manifest.total_files, 1);
        assert_eq!(manifest.entries[0].path, "srcx.ts");
    }

    #[test]
    fn test_summary_is_bounded() {
        let mut manifest = ProjectManifest::empty(Path::new("/p"));
        for i in 0..5 {
            manifest.upsert(&format!("f{}.txt", i), "x");
        }
        let summary = manifest.summary(2);
        assert!(summary.starts_with("Project files (5 total):"));
        assert!(summary.contains("- f1.txt (1 lines)"));
        assert!(!summary.contains("f2.txt"));
        assert!(summary.contains("... 3 more"));
    }
}
