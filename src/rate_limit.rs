/*
 * Devify - Agentic Coding Assistant Engine
 * File Path: src/rate_limit.rs
 * Responsibility: Sliding-window call budgets for mutating and expensive tools.
 */

use crate::tools::ToolName;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max: usize,
    pub window_ms: u64,
}

impl RateLimit {
    pub const fn per_minute(max: usize) -> Self {
        Self { max, window_ms: 60_000 }
    }

    fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Budgets for tools that mutate the project or reach outside it. Reads are unbounded.
pub fn default_limits() -> HashMap<ToolName, RateLimit> {
    HashMap::from([
        (ToolName::WriteFile, RateLimit::per_minute(30)),
        (ToolName::EditFile, RateLimit::per_minute(30)),
        (ToolName::CreateDirectory, RateLimit::per_minute(30)),
        (ToolName::DeleteFile, RateLimit::per_minute(10)),
        (ToolName::RunCommand, RateLimit::per_minute(20)),
        (ToolName::WebSearch, RateLimit::per_minute(10)),
        (ToolName::Connection, RateLimit::per_minute(10)),
        (ToolName::CreateScheduledTask, RateLimit::per_minute(5)),
    ])
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error(
    "Rate limit reached for {tool}: at most {max} calls per {}. Try again in {}s",
    describe_window(.window),
    .wait.as_secs().max(1)
)]
pub struct RateLimited {
    pub tool: ToolName,
    pub max: usize,
    pub window: Duration,
    pub wait: Duration,
}

/// Whole seconds when exact, milliseconds otherwise.
fn describe_window(window: &Duration) -> String {
    if window.subsec_millis() == 0 && window.as_secs() > 0 {
        format!("{}s", window.as_secs())
    } else {
        format!("{}ms", window.as_millis())
    }
}

/// One instance is shared (behind `Arc`) by every executor that should draw from the same budget.
#[derive(Debug)]
pub struct RateLimiter {
    limits: HashMap<ToolName, RateLimit>,
    calls: Mutex<HashMap<ToolName, VecDeque<Instant>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(default_limits())
    }
}

impl RateLimiter {
    pub fn new(limits: HashMap<ToolName, RateLimit>) -> Self {
        Self {
            limits,
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit_for(&self, tool: ToolName) -> Option<RateLimit> {
        self.limits.get(&tool).copied()
    }

    /// Records the call if it fits the window; otherwise leaves state untouched.
    pub fn check(&self, tool: ToolName) -> Result<(), RateLimited> {
        let Some(limit) = self.limit_for(tool) else {
            return Ok(());
        };
        let now = Instant::now();
        let window = limit.window();

        let mut calls = self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let history = calls.entry(tool).or_default();
        while history.front().is_some_and(|at| now.duration_since(*at) >= window) {
            history.pop_front();
        }

        if history.len() >= limit.max {
            let wait = history
                .front()
                .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(window);
            return Err(RateLimited {
                tool,
                max: limit.max,
                window,
                wait,
            });
        }

        history.push_back(now);
        Ok(())
    }

    /// Calls still available in the current window.
    pub fn remaining(&self, tool: ToolName) -> Option<usize> {
        let limit = self.limit_for(tool)?;
        let now = Instant::now();
        let calls = self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let used = calls
            .get(&tool)
            .map(|history| history.iter().filter(|at| now.duration_since(**at) < limit.window()).count())
            .unwrap_or(0);
        Some(limit.max.saturating_sub(used))
    }
}
