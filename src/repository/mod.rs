//! # Task Repository
//!
//! Narrow persistence interface for task documents. Every mutation is a
//! [`TaskUpdate`] applied to the loaded document, so lifecycle rules (state
//! transitions, append-only outputs) are enforced identically by every
//! backend.

pub mod postgres;

use crate::error::{PipelineError, PipelineResult};
use crate::models::output::SubtaskOutputs;
use crate::models::subtask::SubtaskKind;
use crate::models::task::Task;
use crate::state_machine::{TaskEvent, TaskStateMachine};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

pub use postgres::PgTaskRepository;

/// One mutation of a task document
#[derive(Debug, Clone, PartialEq)]
pub enum TaskUpdate {
    SetCurrentSubtask(SubtaskKind),
    LogStep(String),
    UpdateProgress { step: String, percentage: String },
    AppendWarnings(Vec<String>),
    AppendSubtaskOutputs(SubtaskOutputs),
    MarkCompleted,
    MarkFailed(String),
}

impl TaskUpdate {
    /// Apply to an in-memory document
    pub fn apply(self, task: &mut Task) -> PipelineResult<()> {
        match self {
            TaskUpdate::SetCurrentSubtask(kind) => {
                task.progress.current_subtask = Some(kind);
                task.progress.current_step = None;
                task.progress.percentage = None;
            }
            TaskUpdate::LogStep(step) => {
                task.status = TaskStateMachine::transition(task.status, &TaskEvent::Progress)?;
                task.progress.current_step = Some(step);
                task.progress.percentage = None;
            }
            TaskUpdate::UpdateProgress { step, percentage } => {
                task.status = TaskStateMachine::transition(task.status, &TaskEvent::Progress)?;
                task.progress.current_step = Some(step);
                task.progress.percentage = Some(percentage);
            }
            TaskUpdate::AppendWarnings(warnings) => {
                task.warnings.extend(warnings);
            }
            TaskUpdate::AppendSubtaskOutputs(entry) => {
                let recorded = task.result.subtask_outputs.len();
                if recorded >= task.subtasks.len() {
                    return Err(PipelineError::validation(format!(
                        "Task {} already has outputs for all {} subtasks",
                        task.id,
                        task.subtasks.len()
                    )));
                }
                let expected = task.subtasks[recorded].kind;
                if entry.kind != expected {
                    return Err(PipelineError::validation(format!(
                        "Outputs of {} cannot be recorded at position {recorded} ({expected})",
                        entry.kind
                    )));
                }
                task.result.subtask_outputs.push(entry);
            }
            TaskUpdate::MarkCompleted => {
                task.status = TaskStateMachine::transition(task.status, &TaskEvent::Complete)?;
                task.progress.percentage = Some("100%".to_string());
                task.completed_at = Some(Utc::now());
            }
            TaskUpdate::MarkFailed(error) => {
                task.status =
                    TaskStateMachine::transition(task.status, &TaskEvent::fail_with_error(error))?;
                task.completed_at = Some(Utc::now());
            }
        }
        Ok(())
    }
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> PipelineResult<Option<Task>>;

    async fn insert(&self, task: &Task) -> PipelineResult<()>;

    /// Apply one update atomically; `NotFound` when the task is missing
    async fn update(&self, id: Uuid, update: TaskUpdate) -> PipelineResult<()>;

    async fn set_current_subtask(&self, id: Uuid, kind: SubtaskKind) -> PipelineResult<()> {
        self.update(id, TaskUpdate::SetCurrentSubtask(kind)).await
    }

    async fn log_step(&self, id: Uuid, step: &str) -> PipelineResult<()> {
        self.update(id, TaskUpdate::LogStep(step.to_string())).await
    }

    async fn update_progress(&self, id: Uuid, step: &str, percentage: &str) -> PipelineResult<()> {
        self.update(
            id,
            TaskUpdate::UpdateProgress {
                step: step.to_string(),
                percentage: percentage.to_string(),
            },
        )
        .await
    }

    async fn append_warnings(&self, id: Uuid, warnings: Vec<String>) -> PipelineResult<()> {
        if warnings.is_empty() {
            return Ok(());
        }
        self.update(id, TaskUpdate::AppendWarnings(warnings)).await
    }

    async fn append_subtask_outputs(&self, id: Uuid, entry: SubtaskOutputs) -> PipelineResult<()> {
        self.update(id, TaskUpdate::AppendSubtaskOutputs(entry)).await
    }

    async fn mark_completed(&self, id: Uuid) -> PipelineResult<()> {
        self.update(id, TaskUpdate::MarkCompleted).await
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> PipelineResult<()> {
        self.update(id, TaskUpdate::MarkFailed(error.to_string())).await
    }

    /// Load a task that must exist
    async fn get(&self, id: Uuid) -> PipelineResult<Task> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| PipelineError::not_found("Task", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::subtask::{InputSource, Subtask};
    use crate::state_machine::TaskState;

    fn task() -> Task {
        Task::new(
            "t",
            vec![
                Subtask::new(SubtaskKind::Occurrences, InputSource::Upload),
                Subtask::new(SubtaskKind::Labels, InputSource::Upload),
            ],
        )
    }

    #[test]
    fn test_progress_enters_running() {
        let mut task = task();
        TaskUpdate::SetCurrentSubtask(SubtaskKind::Occurrences)
            .apply(&mut task)
            .unwrap();
        assert_eq!(task.status, TaskState::Pending);

        TaskUpdate::UpdateProgress {
            step: "Reading".to_string(),
            percentage: "10%".to_string(),
        }
        .apply(&mut task)
        .unwrap();
        assert_eq!(task.status, TaskState::Running);
        assert_eq!(task.progress.percentage.as_deref(), Some("10%"));
    }

    #[test]
    fn test_outputs_are_positional_and_bounded() {
        let mut task = task();
        let wrong = SubtaskOutputs::new(SubtaskKind::Labels, vec![]);
        assert!(TaskUpdate::AppendSubtaskOutputs(wrong).apply(&mut task).is_err());

        TaskUpdate::AppendSubtaskOutputs(SubtaskOutputs::new(SubtaskKind::Occurrences, vec![]))
            .apply(&mut task)
            .unwrap();
        TaskUpdate::AppendSubtaskOutputs(SubtaskOutputs::new(SubtaskKind::Labels, vec![]))
            .apply(&mut task)
            .unwrap();
        let extra = SubtaskOutputs::new(SubtaskKind::Labels, vec![]);
        assert!(TaskUpdate::AppendSubtaskOutputs(extra).apply(&mut task).is_err());
        assert_eq!(task.result.subtask_outputs.len(), 2);
    }

    #[test]
    fn test_terminal_tasks_reject_updates() {
        let mut task = task();
        TaskUpdate::MarkFailed("boom".to_string())
            .apply(&mut task)
            .unwrap();
        assert_eq!(task.status, TaskState::Failed);
        assert!(task.completed_at.is_some());
        assert!(TaskUpdate::MarkCompleted.apply(&mut task).is_err());
        assert!(TaskUpdate::LogStep("x".to_string()).apply(&mut task).is_err());
    }
}
