/*
 * Devify - Agentic Coding Assistant Engine
 * File Path: src/init.rs
 * Responsibility: Home directory resolution and first-run bootstrap
 */

use crate::config::CONFIG_FILE;
use anyhow::{Context, Result};
use dirs::home_dir;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const HOME_ENV: &str = "DEVIFY_HOME";

const DEFAULT_CONFIG: &str = r#"# Devify configuration. Every key is optional.
provider:
  # Leave empty to use ANTHROPIC_API_KEY from the environment.
  api_key: ""
  model: claude-sonnet-4-5
  base_url: https://api.anthropic.com
  max_tokens: 8192

runtime:
  max_iterations: 15
  max_read_bytes: 512000
  max_write_bytes: 1000000
  list_depth: 3
  history_pairs: 20
  max_tool_output_bytes: 30000
  command_timeout_secs: 120

# prompt: confirm every file change on the terminal; auto: apply without asking.
approval: prompt

# Per-tool overrides, e.g.
# rate_limits:
#   run_command: { max: 20, window_secs: 60 }

# search:
#   endpoint: https://search.example.com/v1/search
#   api_key: ""
# connector:
#   endpoint: https://connect.example.com/v1/call
#   api_key: ""
"#;

/// Resolve the Devify home.
/// Priority: CLI > Environment Variable > Default (~/.devify)
pub fn resolve_home(cli_home: Option<PathBuf>) -> PathBuf {
    resolve_home_from(cli_home, std::env::var(HOME_ENV).ok())
}

fn resolve_home_from(cli_home: Option<PathBuf>, env_home: Option<String>) -> PathBuf {
    if let Some(path) = cli_home {
        return path;
    }
    if let Some(env_path) = env_home.filter(|p| !p.trim().is_empty()) {
        return PathBuf::from(env_path.trim());
    }
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".devify")
}

pub fn config_path(home: &Path) -> PathBuf {
    home.join(CONFIG_FILE)
}

/// Creates the home layout and a commented default config. Existing files are left alone.
pub fn initialize_home(home: &Path) -> Result<()> {
    for dir in [home.join("prompts"), home.join("data")] {
        if !dir.exists() {
            fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        }
    }

    let config = config_path(home);
    if !config.exists() {
        fs::write(&config, DEFAULT_CONFIG)
            .with_context(|| format!("Failed to write {}", config.display()))?;
        info!(path = %config.display(), "Initialized default configuration");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_resolution_order() {
        let cli = PathBuf::from("/from/cli");
        assert_eq!(resolve_home_from(Some(cli.clone()), Some("/from/env".into())), cli);
        assert_eq!(
            resolve_home_from(None, Some("/from/env".into())),
            PathBuf::from("/from/env")
        );
        assert!(resolve_home_from(None, Some("  ".into())).ends_with(".devify"));
    }

    #[test]
    fn test_initialize_home_writes_a_loadable_config_once() {
        let dir = tempfile::tempdir().unwrap();
        initialize_home(dir.path()).unwrap();
        assert!(dir.path().join("prompts").is_dir());
        assert!(dir.path().join("data").is_dir());

        let loaded = Config::load(config_path(dir.path())).unwrap();
        assert_eq!(loaded.runtime.max_iterations, 15);

        fs::write(config_path(dir.path()), "approval: auto\n").unwrap();
        initialize_home(dir.path()).unwrap();
        assert_eq!(fs::read_to_string(config_path(dir.path())).unwrap(), "approval: auto\n");
    }
}
