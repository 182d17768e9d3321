/*
 * Devify - Agentic Coding Assistant Engine
 * File Path: src/task_runner.rs
 * Responsibility: Run a scheduled task's steps in order under its failure policy.
 */

use crate::guard::{CommandGuard, CommandPlan};
use crate::sandbox::PathSandbox;
use crate::scheduler::{
    FailureAction, RunStatus, ScheduledTask, StepAction, StepResult, StepStatus, TaskRun, TaskStep,
};
use crate::services::CommandRunner;
use crate::tools::truncate_output;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

const MAX_STEP_OUTPUT: usize = 4_000;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

type StepOutcome = (StepStatus, Option<String>, Option<String>);

pub struct TaskRunner {
    guard: CommandGuard,
    commands: Arc<dyn CommandRunner>,
    client: reqwest::Client,
    running: Mutex<HashSet<String>>,
}

impl TaskRunner {
    pub fn new(guard: CommandGuard, commands: Arc<dyn CommandRunner>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            guard,
            commands,
            client,
            running: Mutex::new(HashSet::new()),
        }
    }

    /// Runs every step of `task`. `None` when a run of the same task is already in flight.
    pub async fn execute(&self, task: &ScheduledTask) -> Option<TaskRun> {
        {
            let mut running = self.running.lock().ok()?;
            if !running.insert(task.id.clone()) {
                warn!(task = %task.name, "Previous run still in progress; skipping tick");
                return None;
            }
        }

        let run = self.execute_steps(task).await;

        if let Ok(mut running) = self.running.lock() {
            running.remove(&task.id);
        }
        info!(task = %task.name, status = ?run.status, "Scheduled task finished");
        Some(run)
    }

    async fn execute_steps(&self, task: &ScheduledTask) -> TaskRun {
        let started_at = Utc::now().to_rfc3339();
        let max_attempts = match task.on_failure {
            FailureAction::Retry { max_attempts } => max_attempts.max(1),
            _ => 1,
        };

        let mut step_results: Vec<StepResult> = Vec::new();
        let mut had_failure = false;

        for (idx, step) in task.steps.iter().enumerate() {
            if had_failure && step.depends_on_previous {
                step_results.push(skipped(step, "Skipped: previous step failed"));
                continue;
            }

            let mut result = None;
            for attempt in 1..=max_attempts {
                let step_started = Utc::now().to_rfc3339();
                let (status, output, error) = self.execute_step(step, task).await;
                let done = status == StepStatus::Success || attempt == max_attempts;
                if !done {
                    warn!(task = %task.name, step = %step.name, attempt, "Step failed; retrying");
                    continue;
                }
                result = Some(StepResult {
                    step_id: step.id.clone(),
                    status,
                    output,
                    error,
                    started_at: step_started,
                    finished_at: Some(Utc::now().to_rfc3339()),
                });
                break;
            }

            let Some(result) = result else { continue };
            let failed = result.status != StepStatus::Success;
            step_results.push(result);

            if failed {
                had_failure = true;
                if task.on_failure == FailureAction::Stop {
                    for remaining in &task.steps[idx + 1..] {
                        step_results.push(skipped(remaining, "Skipped: task stopped due to earlier failure"));
                    }
                    break;
                }
            }
        }

        let any_success = step_results.iter().any(|r| r.status == StepStatus::Success);
        let status = if !had_failure {
            RunStatus::Success
        } else if any_success {
            RunStatus::PartialSuccess
        } else {
            RunStatus::Failed
        };

        TaskRun {
            started_at,
            finished_at: Some(Utc::now().to_rfc3339()),
            status,
            step_results,
        }
    }

    async fn execute_step(&self, step: &TaskStep, task: &ScheduledTask) -> StepOutcome {
        match &step.action {
            StepAction::RunCommand { command, cwd } => {
                self.run_command(command, cwd.as_deref(), task.project_path.as_deref())
                    .await
            }
            StepAction::HttpRequest {
                url,
                method,
                headers,
                body,
            } => self.http_request(url, method, headers.as_ref(), body.as_deref()).await,
            StepAction::SendWebhook { url, payload } => {
                self.http_request(url, "POST", None, payload.as_deref()).await
            }
        }
    }

    async fn run_command(&self, command: &str, cwd: Option<&str>, project: Option<&str>) -> StepOutcome {
        let Some(project) = project else {
            return failed("Command steps need a project directory");
        };
        let sandbox = PathSandbox::new(project);

        let (command, mut dir, cd_applied) = match self.guard.plan(command, &sandbox) {
            Ok(CommandPlan::Run {
                command,
                cwd,
                cwd_relative,
            }) => (command, cwd, !cwd_relative.is_empty()),
            Ok(CommandPlan::NoOpCd { target }) => {
                return (StepStatus::Success, Some(format!("cd {} has no effect", target)), None);
            }
            Err(e) => return failed(e.to_string()),
        };
        if let (Some(cwd), false) = (cwd, cd_applied) {
            match sandbox.resolve(cwd) {
                Ok(resolved) => dir = resolved.absolute,
                Err(e) => return failed(e.to_string()),
            }
        }

        match self.commands.run(&command, &dir).await {
            Ok(output) if output.success() => (
                StepStatus::Success,
                non_empty(truncate_output(output.stdout.trim().to_string(), MAX_STEP_OUTPUT)),
                None,
            ),
            Ok(output) => {
                let error = if output.stderr.trim().is_empty() {
                    output.render()
                } else {
                    output.stderr.trim().to_string()
                };
                (
                    StepStatus::Failed,
                    non_empty(truncate_output(output.stdout.trim().to_string(), MAX_STEP_OUTPUT)),
                    Some(truncate_output(error, MAX_STEP_OUTPUT)),
                )
            }
            Err(e) => failed(format!("Failed to execute: {:#}", e)),
        }
    }

    async fn http_request(
        &self,
        url: &str,
        method: &str,
        headers: Option<&HashMap<String, String>>,
        body: Option<&str>,
    ) -> StepOutcome {
        let method = match reqwest::Method::from_bytes(method.trim().to_uppercase().as_bytes()) {
            Ok(method) => method,
            Err(_) => return failed(format!("Unsupported HTTP method: {}", method)),
        };
        let mut request = self.client.request(method, url);
        for (key, value) in headers.into_iter().flatten() {
            request = request.header(key, value);
        }
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                let text = truncate_output(text, MAX_STEP_OUTPUT);
                if status.is_success() {
                    (StepStatus::Success, non_empty(text), None)
                } else {
                    (StepStatus::Failed, non_empty(text), Some(format!("HTTP {}", status)))
                }
            }
            Err(e) => failed(format!("Request failed: {}", e)),
        }
    }
}

fn failed(error: impl Into<String>) -> StepOutcome {
    (StepStatus::Failed, None, Some(error.into()))
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() { None } else { Some(text) }
}

fn skipped(step: &TaskStep, reason: &str) -> StepResult {
    let now = Utc::now().to_rfc3339();
    StepResult {
        step_id: step.id.clone(),
        status: StepStatus::Skipped,
        output: None,
        error: Some(reason.to_string()),
        started_at: now.clone(),
        finished_at: Some(now),
    }
}
