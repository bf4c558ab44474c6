pub mod output;
pub mod record;
pub mod subtask;
pub mod task;

// Re-export core models for easy access
pub use output::{OutputReference, OutputType, SubtaskOutputs};
pub use record::{fields, Collection, DatasetRecord, WorkingSetId, OCCURRENCE_COLUMNS};
pub use subtask::{InputSource, Subtask, SubtaskKind};
pub use task::{Progress, Task, TaskResult, Upload};
