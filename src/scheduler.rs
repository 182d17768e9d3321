/*
 * Devify - Agentic Coding Assistant Engine
 * File Path: src/scheduler.rs
 * Responsibility: Scheduled-task model, its JSON store, and cron registration.
 */

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::task_runner::TaskRunner;

const TASKS_FILE: &str = "scheduled_tasks.json";
/// Runs kept per task in the store's history.
pub const MAX_RUN_HISTORY: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Human-readable, e.g. "Every Monday at 8:00".
    #[serde(default)]
    pub schedule: String,
    pub cron_expression: String,
    /// Project the task's commands run in.
    #[serde(default)]
    pub project_path: Option<String>,
    pub enabled: bool,
    pub steps: Vec<TaskStep>,
    #[serde(default)]
    pub on_failure: FailureAction,
    #[serde(default)]
    pub last_run: Option<TaskRun>,
    #[serde(default)]
    pub next_run: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStep {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub action: StepAction,
    /// Skip this step when any earlier step failed.
    #[serde(default)]
    pub depends_on_previous: bool,
}

impl TaskStep {
    pub fn new(name: impl Into<String>, action: StepAction) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            action,
            depends_on_previous: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    RunCommand {
        command: String,
        #[serde(default)]
        cwd: Option<String>,
    },
    HttpRequest {
        url: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(default)]
        headers: Option<HashMap<String, String>>,
        #[serde(default)]
        body: Option<String>,
    },
    SendWebhook {
        url: String,
        #[serde(default)]
        payload: Option<String>,
    },
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureAction {
    #[default]
    Stop,
    SkipAndContinue,
    Retry { max_attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: RunStatus,
    pub step_results: Vec<StepResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    PartialSuccess,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct TaskHistory {
    task_id: String,
    runs: Vec<TaskRun>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StoreData {
    tasks: Vec<ScheduledTask>,
    #[serde(default)]
    history: Vec<TaskHistory>,
}

/// What the `create_scheduled_task` tool hands over; the store fills in ids and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDraft {
    pub name: String,
    pub description: String,
    pub schedule: String,
    pub cron_expression: String,
    pub project_path: Option<String>,
    pub steps: Vec<TaskStep>,
    pub on_failure: FailureAction,
}

/// Fields to change on an existing task. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub schedule: Option<String>,
    pub cron_expression: Option<String>,
    pub project_path: Option<String>,
    pub steps: Option<Vec<TaskStep>>,
    pub on_failure: Option<FailureAction>,
}

#[async_trait]
pub trait TaskScheduler: Send + Sync {
    async fn create_task(&self, draft: TaskDraft) -> Result<ScheduledTask>;
}

/// Widens 5-field cron (`min hour dom mon dow`) to the seconds-first form the job scheduler expects.
pub fn normalize_cron(expression: &str) -> Option<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => Some(format!("0 {}", fields.join(" "))),
        6 | 7 => Some(fields.join(" ")),
        _ => None,
    }
}

/// Normalizes and checks an expression by building a throwaway job from it.
pub fn validate_cron(expression: &str) -> Result<String> {
    let normalized = normalize_cron(expression)
        .ok_or_else(|| anyhow!("Invalid cron expression '{}': expected 5 or 6 fields", expression))?;
    Job::new_async(normalized.as_str(), |_uuid, _l| Box::pin(async {}))
        .map_err(|e| anyhow!("Invalid cron expression '{}': {:?}", expression, e))?;
    Ok(normalized)
}

/// All tasks in one JSON file, `<home>/data/scheduled_tasks.json`.
pub struct TaskStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl TaskStore {
    pub fn open(home: &Path) -> Result<Self> {
        Self::open_at(home.join("data").join(TASKS_FILE))
    }

    pub fn open_at(path: PathBuf) -> Result<Self> {
        let data = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &StoreData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, json).with_context(|| format!("Failed to write {}", self.path.display()))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StoreData>> {
        self.data.lock().map_err(|_| anyhow!("Task store lock poisoned"))
    }

    pub fn create(&self, draft: TaskDraft) -> Result<ScheduledTask> {
        if draft.steps.is_empty() {
            bail!("A scheduled task needs at least one step");
        }
        let cron_expression = validate_cron(&draft.cron_expression)?;
        let now = Utc::now().to_rfc3339();
        let mut steps = draft.steps;
        for step in &mut steps {
            if step.id.is_empty() {
                step.id = Uuid::new_v4().to_string();
            }
        }
        let task = ScheduledTask {
            id: Uuid::new_v4().to_string(),
            name: draft.name,
            description: draft.description,
            schedule: draft.schedule,
            cron_expression,
            project_path: draft.project_path,
            enabled: true,
            steps,
            on_failure: draft.on_failure,
            last_run: None,
            next_run: None,
            created_at: now.clone(),
            updated_at: now,
        };

        let mut data = self.lock()?;
        data.tasks.push(task.clone());
        self.persist(&data)?;
        info!(task = %task.name, id = %task.id, cron = %task.cron_expression, "Scheduled task created");
        Ok(task)
    }

    pub fn list(&self) -> Result<Vec<ScheduledTask>> {
        Ok(self.lock()?.tasks.clone())
    }

    pub fn get(&self, id: &str) -> Result<ScheduledTask> {
        self.lock()?
            .tasks
            .iter()
            .find(|task| task.id == id)
            .cloned()
            .ok_or_else(|| anyhow!("Task not found: {}", id))
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let mut data = self.lock()?;
        let before = data.tasks.len();
        data.tasks.retain(|task| task.id != id);
        if data.tasks.len() == before {
            bail!("Task not found: {}", id);
        }
        data.history.retain(|history| history.task_id != id);
        self.persist(&data)
    }

    pub fn toggle(&self, id: &str) -> Result<ScheduledTask> {
        let mut data = self.lock()?;
        let task = data
            .tasks
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or_else(|| anyhow!("Task not found: {}", id))?;
        task.enabled = !task.enabled;
        task.updated_at = Utc::now().to_rfc3339();
        if !task.enabled {
            task.next_run = None;
        }
        let toggled = task.clone();
        self.persist(&data)?;
        Ok(toggled)
    }

    /// A new cron expression clears `next_run` until the scheduler registers the task again.
    pub fn update(&self, id: &str, update: TaskUpdate) -> Result<ScheduledTask> {
        let cron_expression = update.cron_expression.as_deref().map(validate_cron).transpose()?;
        if update.steps.as_ref().is_some_and(Vec::is_empty) {
            bail!("A scheduled task needs at least one step");
        }

        let mut data = self.lock()?;
        let task = data
            .tasks
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or_else(|| anyhow!("Task not found: {}", id))?;
        if let Some(name) = update.name {
            task.name = name;
        }
        if let Some(description) = update.description {
            task.description = description;
        }
        if let Some(schedule) = update.schedule {
            task.schedule = schedule;
        }
        if let Some(cron) = cron_expression {
            if cron != task.cron_expression {
                task.cron_expression = cron;
                task.next_run = None;
            }
        }
        if let Some(project_path) = update.project_path {
            task.project_path = Some(project_path);
        }
        if let Some(mut steps) = update.steps {
            for step in &mut steps {
                if step.id.is_empty() {
                    step.id = Uuid::new_v4().to_string();
                }
            }
            task.steps = steps;
        }
        if let Some(on_failure) = update.on_failure {
            task.on_failure = on_failure;
        }
        task.updated_at = Utc::now().to_rfc3339();
        let updated = task.clone();
        self.persist(&data)?;
        info!(task = %updated.name, id = %updated.id, "Scheduled task updated");
        Ok(updated)
    }

    pub fn set_next_run(&self, id: &str, next_run: Option<String>) -> Result<()> {
        let mut data = self.lock()?;
        if let Some(task) = data.tasks.iter_mut().find(|task| task.id == id) {
            task.next_run = next_run;
            self.persist(&data)?;
        }
        Ok(())
    }

    /// Stores `run` as the task's last run and appends it to the capped history.
    pub fn record_run(&self, id: &str, run: TaskRun) -> Result<()> {
        let mut data = self.lock()?;
        if let Some(task) = data.tasks.iter_mut().find(|task| task.id == id) {
            task.last_run = Some(run.clone());
        }
        match data.history.iter_mut().find(|history| history.task_id == id) {
            Some(history) => {
                history.runs.push(run);
                if history.runs.len() > MAX_RUN_HISTORY {
                    let overflow = history.runs.len() - MAX_RUN_HISTORY;
                    history.runs.drain(..overflow);
                }
            }
            None => data.history.push(TaskHistory {
                task_id: id.to_string(),
                runs: vec![run],
            }),
        }
        self.persist(&data)
    }

    pub fn history(&self, id: &str) -> Result<Vec<TaskRun>> {
        Ok(self
            .lock()?
            .history
            .iter()
            .find(|history| history.task_id == id)
            .map(|history| history.runs.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl TaskScheduler for TaskStore {
    async fn create_task(&self, draft: TaskDraft) -> Result<ScheduledTask> {
        self.create(draft)
    }
}

/// Runs `task` now and records the result. `None` when a run of it is already in flight.
pub async fn run_and_record(store: &TaskStore, runner: &TaskRunner, task: &ScheduledTask) -> Result<Option<TaskRun>> {
    let Some(run) = runner.execute(task).await else {
        return Ok(None);
    };
    store.record_run(&task.id, run.clone())?;
    Ok(Some(run))
}

/// Registers every enabled task with a cron job and starts the scheduler.
pub async fn run_scheduler(store: Arc<TaskStore>, runner: Arc<TaskRunner>) -> Result<JobScheduler> {
    let mut sched = JobScheduler::new().await?;
    let mut registered = 0;

    for task in store.list()?.into_iter().filter(|task| task.enabled) {
        let task_id = task.id.clone();
        let job_store = store.clone();
        let job_runner = runner.clone();
        let job = Job::new_async(task.cron_expression.as_str(), move |_uuid, _l| {
            let store = job_store.clone();
            let runner = job_runner.clone();
            let task_id = task_id.clone();
            Box::pin(async move {
                let task = match store.get(&task_id) {
                    Ok(task) if task.enabled => task,
                    Ok(_) => return,
                    Err(e) => {
                        warn!(task = %task_id, "Scheduled task vanished: {:#}", e);
                        return;
                    }
                };
                if let Err(e) = run_and_record(&store, &runner, &task).await {
                    warn!(task = %task.name, "Failed to record run: {:#}", e);
                }
            })
        });

        let job = match job {
            Ok(job) => job,
            Err(e) => {
                warn!(task = %task.name, cron = %task.cron_expression, "Skipping task with bad schedule: {:?}", e);
                continue;
            }
        };
        let job_id = sched.add(job).await?;
        let next = sched
            .next_tick_for_job(job_id)
            .await
            .ok()
            .flatten()
            .map(|tick| tick.to_rfc3339());
        store.set_next_run(&task.id, next)?;
        debug!(task = %task.name, cron = %task.cron_expression, "Registered scheduled task");
        registered += 1;
    }

    sched.start().await?;
    info!(tasks = registered, "Scheduler running");
    Ok(sched)
}
