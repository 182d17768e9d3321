/*
 * Devify - Agentic Coding Assistant Engine
 * File Path: src/config.rs
 * Responsibility: YAML configuration structure and loading
 */
use crate::agent_loop::LoopSettings;
use crate::executor::ExecutorLimits;
use crate::rate_limit::{RateLimit, RateLimiter, default_limits};
use crate::tools::ToolName;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const CONFIG_FILE: &str = "devify.yml";
const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub runtime: RuntimeConfig,
    /// Per-tool overrides layered over the built-in table.
    pub rate_limits: BTreeMap<String, RateLimitConfig>,
    pub approval: ApprovalMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<EndpointConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector: Option<EndpointConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "claude-sonnet-4-5".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 8192,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_iterations: usize,
    pub max_read_bytes: u64,
    pub max_write_bytes: usize,
    pub list_depth: usize,
    pub history_pairs: usize,
    pub max_tool_output_bytes: usize,
    pub command_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_read_bytes: 512_000,
            max_write_bytes: 1_000_000,
            list_depth: 3,
            history_pairs: 20,
            max_tool_output_bytes: 30_000,
            command_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max: usize,
    pub window_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Ask on the terminal before every file mutation.
    #[default]
    Prompt,
    Auto,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EndpointConfig {
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file at {:?}", path.as_ref()))?;
        let mut config: Config = if content.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(&content).context("Failed to parse config file")?
        };
        config.apply_env(std::env::var(API_KEY_ENV).ok());
        Ok(config)
    }

    /// The environment key wins over an empty or placeholder one.
    pub fn apply_env(&mut self, env_key: Option<String>) {
        if let Some(key) = env_key.filter(|key| !key.trim().is_empty()) {
            if !self.has_api_key() {
                self.provider.api_key = key.trim().to_string();
            }
        }
    }

    pub fn has_api_key(&self) -> bool {
        let key = self.provider.api_key.trim();
        !key.is_empty() && !key.contains("YOUR_")
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            max_iterations: self.runtime.max_iterations,
            max_tokens: self.provider.max_tokens,
            history_pairs: self.runtime.history_pairs,
        }
    }

    pub fn executor_limits(&self) -> ExecutorLimits {
        ExecutorLimits {
            max_read_bytes: self.runtime.max_read_bytes,
            max_write_bytes: self.runtime.max_write_bytes,
            list_depth: self.runtime.list_depth.max(1),
            max_output_bytes: self.runtime.max_tool_output_bytes,
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime.command_timeout_secs.max(1))
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        let mut limits = default_limits();
        for (name, limit) in &self.rate_limits {
            match ToolName::resolve(name) {
                Some(tool) => {
                    limits.insert(
                        tool,
                        RateLimit {
                            max: limit.max,
                            window_ms: limit.window_secs.saturating_mul(1000),
                        },
                    );
                }
                None => warn!(tool = %name, "Ignoring rate limit for unknown tool"),
            }
        }
        RateLimiter::new(limits)
    }
}
