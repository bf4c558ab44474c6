//! # Task Orchestrator
//!
//! Runs the subtasks of one task strictly in order. The first handler error
//! fails the whole task and nothing after it runs; effects of the subtasks
//! that already finished stay applied.

use crate::error::{PipelineError, PipelineResult};
use crate::handlers::{HandlerRegistry, HandlerServices, SubtaskContext};
use crate::logging::{log_error, log_subtask_operation, log_task_operation};
use crate::models::subtask::SubtaskKind;
use crate::orchestration::progress::ProgressReporter;
use crate::repository::TaskRepository;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Final result of one `process_task` call, mirrored by the task status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed {
        subtasks: usize,
    },
    Failed {
        index: usize,
        kind: SubtaskKind,
        error: String,
    },
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed { .. })
    }
}

pub struct TaskOrchestrator {
    services: Arc<HandlerServices>,
    registry: HandlerRegistry,
}

impl TaskOrchestrator {
    pub fn new(services: Arc<HandlerServices>, registry: HandlerRegistry) -> Self {
        Self { services, registry }
    }

    pub fn services(&self) -> &Arc<HandlerServices> {
        &self.services
    }

    fn repository(&self) -> &Arc<dyn TaskRepository> {
        &self.services.repository
    }

    /// Execute every subtask of the task and finalize it.
    ///
    /// Handler failures are not errors of this call: they produce
    /// [`TaskOutcome::Failed`] after the task is marked failed. An `Err` means
    /// the task could not be run or finalized at all.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn process_task(&self, task_id: Uuid) -> PipelineResult<TaskOutcome> {
        let task = self.repository().get(task_id).await?;
        if task.status.is_terminal() {
            return Err(PipelineError::state_transition(task.status, "process"));
        }

        let started = Instant::now();
        let kinds: Vec<SubtaskKind> = task.subtasks.iter().map(|s| s.kind).collect();
        log_task_operation(
            "process",
            task_id,
            Some(&task.name),
            "started",
            Some(&format!("{} subtasks", kinds.len())),
        );

        for (index, kind) in kinds.iter().copied().enumerate() {
            if let Err(e) = self.run_subtask(task_id, index, kind).await {
                let error = e.to_string();
                log_error(
                    "orchestrator",
                    kind.as_str(),
                    &error,
                    Some(&format!("task {task_id} subtask {index}")),
                );
                self.repository().mark_failed(task_id, &error).await?;
                log_task_operation("process", task_id, Some(&task.name), "failed", Some(&error));
                return Ok(TaskOutcome::Failed { index, kind, error });
            }
        }

        self.repository().mark_completed(task_id).await?;
        info!(
            task_id = %task_id,
            subtasks = kinds.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Task completed"
        );
        log_task_operation("process", task_id, Some(&task.name), "completed", None);
        Ok(TaskOutcome::Completed {
            subtasks: kinds.len(),
        })
    }

    async fn run_subtask(&self, task_id: Uuid, index: usize, kind: SubtaskKind) -> PipelineResult<()> {
        self.repository().set_current_subtask(task_id, kind).await?;
        log_subtask_operation("run", task_id, index, kind.as_str(), "started", None);

        let context = SubtaskContext::new(
            Arc::clone(&self.services),
            ProgressReporter::new(Arc::clone(self.repository()), task_id, index, kind),
        );
        let handler = self.registry.handler(kind);
        let started = Instant::now();
        handler.handle(&context).await?;

        if !context.progress.has_registered() {
            warn!(task_id = %task_id, index = index, subtask = %kind, "Handler registered no outputs");
            context.progress.register_outputs(Vec::new()).await?;
        }

        log_subtask_operation(
            "run",
            task_id,
            index,
            kind.as_str(),
            "completed",
            Some(&format!("{}ms", started.elapsed().as_millis())),
        );
        Ok(())
    }
}
