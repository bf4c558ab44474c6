//! # Task Model
//!
//! The task document the engine consumes and updates. A task is created and
//! enqueued by the request layer; from then on the engine is the only writer of
//! `status`, `progress`, `result` and `warnings`.
//!
//! ## Document Shape
//!
//! ```json
//! {
//!   "_id": "6c1f0a3e-...",
//!   "name": "Spring labels",
//!   "tag": "2024-06-12T10-30-00",
//!   "subtasks": [{"type": "occurrences", "input": "upload"},
//!                {"type": "labels", "input": "0_occurrences"}],
//!   "status": "Pending",
//!   "progress": {"currentSubtask": null, "currentStep": null, "percentage": null},
//!   "warnings": [],
//!   "upload": {"fileName": "sheet.csv", "filePath": "./uploads/sheet.csv", "uri": "/api/uploads/sheet.csv"},
//!   "result": {"subtaskOutputs": []},
//!   "createdAt": "2024-06-12T10:30:00Z",
//!   "completedAt": null
//! }
//! ```

use super::output::SubtaskOutputs;
use super::subtask::{Subtask, SubtaskKind};
use crate::error::{PipelineError, PipelineResult};
use crate::state_machine::TaskState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Polled progress information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub current_subtask: Option<SubtaskKind>,
    pub current_step: Option<String>,
    /// Display string such as `"45%"`
    pub percentage: Option<String>,
}

/// Reference to the file uploaded with the task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    pub file_name: String,
    pub file_path: String,
    pub uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    /// Append-only; entry `i` belongs to subtask `i`
    #[serde(default)]
    pub subtask_outputs: Vec<SubtaskOutputs>,
}

/// One user-initiated pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub tag: String,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub status: TaskState,
    #[serde(default)]
    pub progress: Progress,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub upload: Option<Upload>,
    #[serde(default)]
    pub result: TaskResult,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// New pending task with a creation tag derived from the timestamp
    pub fn new(name: impl Into<String>, subtasks: Vec<Subtask>) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            tag: created_at.format("%Y-%m-%dT%H-%M-%S").to_string(),
            subtasks,
            status: TaskState::Pending,
            progress: Progress::default(),
            warnings: Vec::new(),
            upload: None,
            result: TaskResult::default(),
            created_at,
            completed_at: None,
        }
    }

    pub fn with_upload(mut self, upload: Upload) -> Self {
        self.upload = Some(upload);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Tag restricted to characters that are safe in file names
    pub fn file_tag(&self) -> String {
        let sanitized: String = self
            .tag
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        if sanitized.is_empty() {
            self.id.simple().to_string()
        } else {
            sanitized
        }
    }

    /// File tag for the artifacts of subtask `index`. When the same kind
    /// appears more than once in the task the index is appended, so each
    /// stage keeps its own files.
    pub fn artifact_tag(&self, index: usize) -> String {
        let tag = self.file_tag();
        let Some(kind) = self.subtasks.get(index).map(|s| s.kind) else {
            return tag;
        };
        if self.subtasks.iter().filter(|s| s.kind == kind).count() > 1 {
            format!("{tag}-{index}")
        } else {
            tag
        }
    }

    /// Subtask at `index`, which handlers require to exist
    pub fn subtask(&self, index: usize) -> PipelineResult<&Subtask> {
        self.subtasks.get(index).ok_or_else(|| {
            PipelineError::not_found("Subtask", format!("{}[{index}]", self.id))
        })
    }

    /// Outputs recorded for the subtask at `index`, if it already ran
    pub fn outputs_of(&self, index: usize) -> Option<&SubtaskOutputs> {
        self.result.subtask_outputs.get(index)
    }

    pub fn upload_path(&self) -> Option<&str> {
        self.upload
            .as_ref()
            .map(|u| u.file_path.as_str())
            .filter(|p| !p.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::subtask::InputSource;
    use serde_json::json;

    #[test]
    fn test_document_round_trip_shape() {
        let task = Task::new(
            "labels",
            vec![
                Subtask::new(SubtaskKind::Occurrences, InputSource::Upload),
                Subtask::new(
                    SubtaskKind::Labels,
                    InputSource::from("0_occurrences".to_string()),
                ),
            ],
        );
        let value = serde_json::to_value(&task).unwrap();
        assert!(value.get("_id").is_some());
        assert_eq!(value["status"], "Pending");
        assert_eq!(value["subtasks"][1]["input"], "0_occurrences");
        assert_eq!(value["result"]["subtaskOutputs"], json!([]));

        let parsed: Task = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, task);
    }

    #[test]
    fn test_file_tag_is_filesystem_safe() {
        let task = Task::new("t", vec![]).with_tag("2024/06/12 10:30");
        assert_eq!(task.file_tag(), "2024-06-12-10-30");

        let task = Task::new("t", vec![]).with_tag("");
        assert_eq!(task.file_tag().len(), 32);
    }

    #[test]
    fn test_repeated_kinds_get_distinct_artifact_tags() {
        let task = Task::new(
            "t",
            vec![
                Subtask::new(SubtaskKind::Download, InputSource::Selection),
                Subtask::new(SubtaskKind::Emails, InputSource::Upload),
                Subtask::new(SubtaskKind::Download, InputSource::Upload),
            ],
        )
        .with_tag("t1");
        assert_eq!(task.artifact_tag(0), "t1-0");
        assert_eq!(task.artifact_tag(1), "t1");
        assert_eq!(task.artifact_tag(2), "t1-2");
    }

    #[test]
    fn test_subtask_lookup() {
        let task = Task::new("t", vec![Subtask::new(SubtaskKind::Emails, InputSource::Upload)]);
        assert!(task.subtask(0).is_ok());
        assert!(matches!(
            task.subtask(1),
            Err(PipelineError::NotFound { .. })
        ));
        assert!(task.upload_path().is_none());
    }
}
