/*
 * Devify - Agentic Coding Assistant Engine
 * File Path: src/sandbox.rs
 * Responsibility: Confine model-supplied paths to the project root and screen sensitive or generated targets.
 */

use crate::args::clean_path;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directories that are generated, vendored or private to tooling.
pub const BLOCKLISTED_DIRECTORIES: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    "target",
    ".next",
    ".nuxt",
    ".svelte-kit",
    "__pycache__",
    ".venv",
    "venv",
    ".cache",
    "coverage",
    ".turbo",
    ".devify",
];

const NOISY_FILES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "cargo.lock",
    "composer.lock",
    "poetry.lock",
    ".ds_store",
    "thumbs.db",
];

const NOISY_EXTENSIONS: &[&str] = &["lock", "log", "map"];

const SENSITIVE_NAMES: &[&str] = &[
    "id_rsa",
    "id_dsa",
    "id_ecdsa",
    "id_ed25519",
    "credentials",
    "credentials.json",
    ".npmrc",
    ".pypirc",
    ".netrc",
    ".git-credentials",
    ".htpasswd",
    ".gitconfig",
    "known_hosts",
    "authorized_keys",
];

const SENSITIVE_EXTENSIONS: &[&str] = &["pem", "key", "p12", "pfx", "jks", "keystore", "der"];

const SENSITIVE_SEGMENTS: &[&str] = &[".git", ".ssh", ".aws", ".gnupg", ".azure"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("No path was provided")]
    EmptyPath,
    #[error("Path '{0}' resolves outside the project directory")]
    OutsideRoot(String),
    #[error("Access to '{0}' is blocked: it looks like a credential or key file")]
    Sensitive(String),
    #[error("Access to '{0}' is blocked: dependency, build or tool-private path")]
    Blocklisted(String),
}

/// A path proven to be a descendant of the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub absolute: PathBuf,
    /// Root-relative form with `/` separators; empty for the root itself.
    pub relative: String,
}

impl ResolvedPath {
    pub fn display_name(&self) -> &str {
        if self.relative.is_empty() { "." } else { &self.relative }
    }
}

#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
    root_text: String,
}

impl PathSandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root_text = normalize_separators(&root.to_string_lossy());
        let root_text = match root_text.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        };
        Self { root, root_text }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves lexically. No filesystem call is made on any path.
    pub fn resolve(&self, raw: &str) -> Result<ResolvedPath, SandboxError> {
        let cleaned = clean_path(raw);
        if cleaned.is_empty() && raw.trim().is_empty() {
            return Err(SandboxError::EmptyPath);
        }

        let relative_input = if is_absolute(&cleaned) {
            self.strip_root(&cleaned)
                .map(str::to_string)
                .ok_or_else(|| SandboxError::OutsideRoot(raw.trim().to_string()))?
        } else if cleaned == "~" || cleaned.starts_with("~/") {
            return Err(SandboxError::OutsideRoot(raw.trim().to_string()));
        } else {
            cleaned.clone()
        };

        let mut segments: Vec<&str> = Vec::new();
        for segment in relative_input.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(SandboxError::OutsideRoot(raw.trim().to_string()));
                    }
                }
                other => segments.push(other),
            }
        }

        let relative = segments.join("/");
        let joined = if relative.is_empty() {
            self.root_text.clone()
        } else if self.root_text.ends_with('/') {
            format!("{}{}", self.root_text, relative)
        } else {
            format!("{}/{}", self.root_text, relative)
        };

        if !self.is_within_root(&joined) {
            return Err(SandboxError::OutsideRoot(raw.trim().to_string()));
        }

        Ok(ResolvedPath {
            absolute: PathBuf::from(joined),
            relative,
        })
    }

    /// `resolve` plus the sensitive-file and blocklist screens every file tool applies.
    pub fn resolve_for_access(&self, raw: &str) -> Result<ResolvedPath, SandboxError> {
        let resolved = self.resolve(raw)?;
        if is_sensitive_file(&resolved.relative) {
            return Err(SandboxError::Sensitive(resolved.relative));
        }
        if is_blocklisted_path(&resolved.relative) {
            return Err(SandboxError::Blocklisted(resolved.relative));
        }
        Ok(resolved)
    }

    fn strip_root<'a>(&self, absolute: &'a str) -> Option<&'a str> {
        let rest = strip_prefix_ignore_case(absolute, &self.root_text)?;
        if rest.is_empty() || self.root_text.ends_with('/') {
            return Some(rest);
        }
        rest.strip_prefix('/')
    }

    fn is_within_root(&self, joined: &str) -> bool {
        self.strip_root(joined).is_some()
    }
}

/// Case-insensitive prefix strip. The remainder always starts on a char boundary of `text`.
fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let mut chars = text.chars();
    for expected in prefix.chars() {
        let actual = chars.next()?;
        if !actual.to_lowercase().eq(expected.to_lowercase()) {
            return None;
        }
    }
    Some(chars.as_str())
}

fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

fn is_absolute(path: &str) -> bool {
    if path.starts_with('/') {
        return true;
    }
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn extension(name: &str) -> Option<&str> {
    let (stem, ext) = name.rsplit_once('.')?;
    (!stem.is_empty()).then_some(ext)
}

/// Credential, key and VCS/editor-config files. Checked independently of resolution.
pub fn is_sensitive_file(path: &str) -> bool {
    let normalized = normalize_separators(path).to_lowercase();
    let name = file_name(&normalized);

    if name == ".env" || (name.starts_with(".env.") && !matches!(name, ".env.example" | ".env.sample" | ".env.template")) {
        return true;
    }
    if name.ends_with(".env") && name != ".env" {
        return true;
    }
    if SENSITIVE_NAMES.contains(&name) || name.starts_with("id_rsa") || name.starts_with("id_ed25519") {
        return true;
    }
    if name.starts_with("secrets.") {
        return true;
    }
    if extension(name).is_some_and(|ext| SENSITIVE_EXTENSIONS.contains(&ext)) {
        return true;
    }
    normalized
        .split('/')
        .any(|segment| SENSITIVE_SEGMENTS.contains(&segment))
}

pub fn is_blocklisted_directory(name: &str) -> bool {
    BLOCKLISTED_DIRECTORIES.contains(&name.to_lowercase().as_str())
}

/// Lockfiles, logs and source maps.
pub fn is_noisy_file(name: &str) -> bool {
    let lower = name.to_lowercase();
    NOISY_FILES.contains(&lower.as_str()) || extension(&lower).is_some_and(|ext| NOISY_EXTENSIONS.contains(&ext))
}

/// True when any directory segment is blocklisted or the file itself is noise.
pub fn is_blocklisted_path(relative: &str) -> bool {
    let normalized = normalize_separators(relative);
    let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
    let Some((last, dirs)) = segments.split_last() else {
        return false;
    };
    dirs.iter().any(|dir| is_blocklisted_directory(dir)) || is_blocklisted_directory(last) || is_noisy_file(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> PathSandbox {
        PathSandbox::new("/home/dev/Project")
    }

    #[test]
    fn test_resolves_relative_paths_inside_root() {
        let resolved = sandbox().resolve("src/../src/./main.rs").unwrap();
        assert_eq!(resolved.relative, "src/main.rs");
        assert_eq!(resolved.absolute, PathBuf::from("/home/dev/Project/src/main.rs"));
    }

    #[test]
    fn test_rejects_traversal_out_of_root() {
        let sandbox = sandbox();
        assert!(matches!(sandbox.resolve("../../etc/passwd"), Err(SandboxError::OutsideRoot(_))));
        assert!(matches!(sandbox.resolve("src/../../other"), Err(SandboxError::OutsideRoot(_))));
        assert!(matches!(sandbox.resolve("/etc/passwd"), Err(SandboxError::OutsideRoot(_))));
        assert!(matches!(sandbox.resolve("~/.bashrc"), Err(SandboxError::OutsideRoot(_))));
        assert!(matches!(sandbox.resolve("/home/dev/ProjectX/a"), Err(SandboxError::OutsideRoot(_))));
    }

    #[test]
    fn test_absolute_paths_inside_root_are_case_insensitive() {
        let resolved = sandbox().resolve("/HOME/dev/project/README.md").unwrap();
        assert_eq!(resolved.relative, "README.md");
    }

    #[test]
    fn test_case_folding_that_changes_byte_length() {
        let resolved = PathSandbox::new("/x/k").resolve("/x/\u{212A}/abc").unwrap();
        assert_eq!(resolved.relative, "abc");

        let kelvin_root = PathSandbox::new("/x/\u{212A}");
        assert_eq!(kelvin_root.resolve("/x/k/src/a.rs").unwrap().relative, "src/a.rs");
        assert!(kelvin_root.resolve("/x/\u{212A}b/a.rs").is_err());
        assert_eq!(kelvin_root.resolve("lib.rs").unwrap().relative, "lib.rs");
    }

    #[test]
    fn test_windows_style_paths_and_invented_prefixes() {
        let sandbox = PathSandbox::new("C:\\Users\\dev\\app");
        let resolved = sandbox.resolve("$(root)/src\\index.ts").unwrap();
        assert_eq!(resolved.relative, "src/index.ts");
        assert!(sandbox.resolve("c:/users/dev/app/lib.rs").is_ok());
        assert!(sandbox.resolve("D:/elsewhere").is_err());
    }

    #[test]
    fn test_root_itself_resolves_to_empty_relative() {
        let resolved = sandbox().resolve(".").unwrap();
        assert_eq!(resolved.relative, "");
        assert_eq!(resolved.display_name(), ".");
        assert_eq!(sandbox().resolve("  "), Err(SandboxError::EmptyPath));
    }

    #[test]
    fn test_sensitive_files() {
        assert!(is_sensitive_file(".env"));
        assert!(is_sensitive_file("config/.env.production"));
        assert!(!is_sensitive_file(".env.example"));
        assert!(is_sensitive_file("certs/server.PEM"));
        assert!(is_sensitive_file("home/.ssh/config"));
        assert!(is_sensitive_file(".git/config"));
        assert!(is_sensitive_file("id_rsa.pub"));
        assert!(!is_sensitive_file("src/keyboard.ts"));
        assert!(!is_sensitive_file("src/main.rs"));
    }

    #[test]
    fn test_blocklisted_paths() {
        assert!(is_blocklisted_path("node_modules/react/index.js"));
        assert!(is_blocklisted_path("web/dist"));
        assert!(is_blocklisted_path("Cargo.lock"));
        assert!(is_blocklisted_path("logs/server.log"));
        assert!(is_blocklisted_path(".devify/manifest.json"));
        assert!(!is_blocklisted_path("src/build.rs"));
        assert!(!is_blocklisted_path(""));
    }

    #[test]
    fn test_resolve_for_access_screens() {
        let sandbox = sandbox();
        assert!(matches!(sandbox.resolve_for_access(".env"), Err(SandboxError::Sensitive(_))));
        assert!(matches!(
            sandbox.resolve_for_access("node_modules/x.js"),
            Err(SandboxError::Blocklisted(_))
        ));
        assert!(sandbox.resolve_for_access("src/app.tsx").is_ok());
    }
}
