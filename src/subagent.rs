//! # Sub-Agent Contract
//!
//! The processing pipeline every specialist agent runs behind: validate the
//! inbound payload, delegate to the agent's business logic, validate the
//! outbound envelope, and never forward a malformed success. Concrete agents
//! implement [`SubAgent`] once; [`TaskPipeline`] adapts any of them to a bus
//! handler.
//!
//! Pipeline order, fixed:
//! 1. unknown task names short-circuit to `UNKNOWN_TASK` (non-retryable);
//! 2. the input schema runs before any business logic: missing required
//!    fields come back as `needs_info`, shape violations as `INVALID_INPUT`;
//! 3. `process_task` runs and is timed;
//! 4. error results pass through unmodified so domain error codes survive;
//! 5. non-error payloads are validated against the task's output schema, and
//!    a failing output validation becomes an `INVALID_OUTPUT` error.
//!
//! Tasks without a registered schema pass through unchecked, a deliberate
//! escape hatch for prototypes; give every production task a schema.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::bus::AgentHandler;
use crate::error::{ErrorCode, Result};
use crate::message::{AgentMessage, ConversationContext};
use crate::schema;
use crate::task::{TaskResponse, TaskResult};

/// Input/output schemas for one task.
#[derive(Debug, Clone, Default)]
pub struct TaskSchema {
    pub input: Option<Value>,
    pub output: Option<Value>,
}

/// Per-task schema registry a sub-agent exposes.
#[derive(Debug, Clone, Default)]
pub struct TaskSchemas {
    schemas: HashMap<String, TaskSchema>,
}

impl TaskSchemas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, task: &str, schema: Value) -> Self {
        self.schemas.entry(task.to_string()).or_default().input = Some(schema);
        self
    }

    pub fn output(mut self, task: &str, schema: Value) -> Self {
        self.schemas.entry(task.to_string()).or_default().output = Some(schema);
        self
    }

    pub fn for_task(&self, task: &str) -> Option<&TaskSchema> {
        self.schemas.get(task)
    }

    /// Declared tasks that carry no input schema; tests flag these.
    pub fn unchecked_tasks(&self) -> Vec<String> {
        let mut tasks: Vec<String> = self
            .schemas
            .iter()
            .filter(|(_, s)| s.input.is_none())
            .map(|(t, _)| t.clone())
            .collect();
        tasks.sort();
        tasks
    }
}

/// The one trait a specialist implements.
#[async_trait]
pub trait SubAgent: Send + Sync {
    /// Task names this agent serves. An empty list means the agent decides
    /// per call inside `process_task`.
    fn tasks(&self) -> Vec<String>;

    /// Per-task input/output schemas. Defaults to none registered.
    fn schemas(&self) -> TaskSchemas {
        TaskSchemas::new()
    }

    /// The agent's business logic. Returning `Err` signals an agent-level
    /// crash; domain failures belong in [`TaskResult::Error`].
    async fn process_task(
        &self,
        task: &str,
        parameters: Value,
        context: &ConversationContext,
    ) -> Result<TaskResult>;
}

/// Adapts a [`SubAgent`] to a bus [`AgentHandler`], enforcing the contract.
pub struct TaskPipeline {
    agent: Arc<dyn SubAgent>,
    schemas: TaskSchemas,
    tasks: Vec<String>,
}

impl TaskPipeline {
    pub fn new(agent: Arc<dyn SubAgent>) -> Self {
        let schemas = agent.schemas();
        let tasks = agent.tasks();
        Self {
            agent,
            schemas,
            tasks,
        }
    }

    fn validate_input(&self, task: &str, parameters: &Value) -> Option<TaskResult> {
        let input_schema = self.schemas.for_task(task)?.input.as_ref()?;
        let violations = schema::validate(parameters, input_schema);
        if violations.is_empty() {
            return None;
        }

        let missing: Vec<String> = violations
            .iter()
            .filter_map(|v| {
                v.message
                    .strip_prefix("missing required field `")
                    .and_then(|rest| rest.strip_suffix('`'))
                    .map(str::to_string)
            })
            .collect();

        if missing.len() == violations.len() {
            // Every violation is an absent field: ask for it rather than fail
            Some(TaskResult::needs_info(
                missing.clone(),
                format!("Missing required fields: {}", missing.join(", ")),
            ))
        } else {
            let detail = violations
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            Some(TaskResult::error(ErrorCode::InvalidInput, detail))
        }
    }

    fn validate_output(&self, task: &str, result: TaskResult) -> TaskResult {
        let Some(output_schema) = self
            .schemas
            .for_task(task)
            .and_then(|s| s.output.as_ref())
        else {
            return result;
        };
        let Some(data) = result.data() else {
            return result;
        };
        let violations = schema::validate(data, output_schema);
        if violations.is_empty() {
            result
        } else {
            let detail = violations
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            warn!(task = %task, detail = %detail, "output schema violation suppressed a success");
            TaskResult::error(ErrorCode::InvalidOutput, detail)
        }
    }

    async fn run(&self, message: AgentMessage) -> Result<TaskResponse> {
        let started = Instant::now();
        let request_id = message.id.clone();

        let Some(task) = message.task_name().map(str::to_string) else {
            let result = TaskResult::error(ErrorCode::InvalidInput, "request carries no task name");
            return Ok(TaskResponse::new(request_id, result, elapsed_ms(started)));
        };

        if !self.tasks.is_empty() && !self.tasks.contains(&task) {
            let result = TaskResult::Error {
                error: crate::task::TaskError::new(
                    ErrorCode::UnknownTask,
                    format!("task `{task}` is not implemented by this agent"),
                ),
            };
            return Ok(TaskResponse::new(request_id, result, elapsed_ms(started)));
        }

        let parameters = message.task_parameters();
        if let Some(rejection) = self.validate_input(&task, &parameters) {
            debug!(task = %task, "input validation stopped the task");
            return Ok(TaskResponse::new(request_id, rejection, elapsed_ms(started)));
        }

        let result = self
            .agent
            .process_task(&task, parameters, &message.context)
            .await?;

        // Error results pass through untouched; everything else must survive
        // the output schema.
        let result = match result {
            TaskResult::Error { .. } => result,
            other => self.validate_output(&task, other),
        };

        Ok(TaskResponse::new(request_id, result, elapsed_ms(started)))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[async_trait]
impl AgentHandler for TaskPipeline {
    async fn handle(&self, message: AgentMessage) -> Result<TaskResponse> {
        self.run(message).await
    }
}
