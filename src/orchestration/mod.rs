//! # Orchestration
//!
//! Drives one task from its queue message to a terminal status.
//!
//! ## Components
//!
//! - **TaskOrchestrator**: walks the subtask list in order and finalizes the task
//! - **Input resolution**: turns an `input` token into a file, a record selection or nothing
//! - **ProgressReporter**: the only way a running subtask writes to its task document
//!
//! ```text
//! QueueConsumer ─▶ TaskOrchestrator ─▶ SubtaskHandler ─▶ ProgressReporter
//!                                        │
//!                                        ├─▶ resolve_input
//!                                        └─▶ ScratchSpace
//! ```

pub mod input;
pub mod orchestrator;
pub mod progress;

pub use input::{load_records, resolve_input, RecordSelection, ResolvedInput};
pub use orchestrator::{TaskOrchestrator, TaskOutcome};
pub use progress::ProgressReporter;
