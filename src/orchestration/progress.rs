//! # Progress Reporter
//!
//! The narrow write interface a running subtask has onto its task document.
//! Clients poll the document, so every call here is persisted immediately.

use crate::error::{PipelineError, PipelineResult};
use crate::logging::log_subtask_operation;
use crate::models::output::{OutputReference, SubtaskOutputs};
use crate::models::subtask::SubtaskKind;
use crate::repository::TaskRepository;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Reporter bound to one subtask of one task
pub struct ProgressReporter {
    repository: Arc<dyn TaskRepository>,
    task_id: Uuid,
    index: usize,
    kind: SubtaskKind,
    registered: AtomicBool,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("task_id", &self.task_id)
            .field("index", &self.index)
            .field("kind", &self.kind)
            .field("registered", &self.has_registered())
            .finish()
    }
}

impl ProgressReporter {
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        task_id: Uuid,
        index: usize,
        kind: SubtaskKind,
    ) -> Self {
        Self {
            repository,
            task_id,
            index,
            kind,
            registered: AtomicBool::new(false),
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> SubtaskKind {
        self.kind
    }

    /// Record a human-readable step such as "Compiling user mailing addresses"
    pub async fn step(&self, message: &str) -> PipelineResult<()> {
        debug!(task_id = %self.task_id, subtask = %self.kind, step = message, "Step");
        self.repository.log_step(self.task_id, message).await
    }

    /// Record a step together with a completion fraction in `[0, 1]`
    pub async fn progress(&self, message: &str, fraction: f64) -> PipelineResult<()> {
        let percentage = format_percentage(fraction);
        debug!(
            task_id = %self.task_id,
            subtask = %self.kind,
            step = message,
            percentage = %percentage,
            "Progress"
        );
        self.repository
            .update_progress(self.task_id, message, &percentage)
            .await
    }

    /// Append user-visible warnings to the task
    pub async fn warn(&self, warnings: Vec<String>) -> PipelineResult<()> {
        if warnings.is_empty() {
            return Ok(());
        }
        warn!(
            task_id = %self.task_id,
            subtask = %self.kind,
            count = warnings.len(),
            "Subtask reported warnings"
        );
        self.repository.append_warnings(self.task_id, warnings).await
    }

    /// Register this subtask's outputs. Allowed exactly once.
    pub async fn register_outputs(&self, outputs: Vec<OutputReference>) -> PipelineResult<()> {
        if self.registered.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::validation(format!(
                "Outputs of subtask {} ({}) already registered",
                self.index, self.kind
            )));
        }
        let count = outputs.len();
        let result = self
            .repository
            .append_subtask_outputs(self.task_id, SubtaskOutputs::new(self.kind, outputs))
            .await;
        if result.is_err() {
            self.registered.store(false, Ordering::SeqCst);
        }
        result?;

        log_subtask_operation(
            "register_outputs",
            self.task_id,
            self.index,
            self.kind.as_str(),
            "registered",
            Some(&format!("{count} outputs")),
        );
        Ok(())
    }

    pub fn has_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }
}

/// `0.456` becomes `"46%"`; out-of-range fractions are clamped
pub fn format_percentage(fraction: f64) -> String {
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    format!("{:.0}%", fraction * 100.0)
}
