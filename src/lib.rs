#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Pipeline Core
//!
//! Queue-driven engine that runs multi-stage data pipelines against a shared
//! dataset of specimen occurrence records.
//!
//! ## Overview
//!
//! A task is an ordered list of subtasks. The worker receives a task id from
//! the work queue, and the [`TaskOrchestrator`] then runs each subtask in turn
//! through its handler. Every handler reads its input (an upload, an earlier
//! subtask's output, or a record selection), stages records in a scratch
//! working set, and promotes or discards them. It may then write CSV or PDF
//! artifacts and register them as its outputs.
//!
//! ## Architecture
//!
//! - **Messaging**: [`messaging::QueueConsumer`] over pgmq with at-most-once delivery
//! - **Orchestration**: [`orchestration::TaskOrchestrator`] drives the task state machine
//! - **Handlers**: one [`handlers::SubtaskHandler`] per [`models::SubtaskKind`]
//! - **Staging**: [`staging::ScratchSpace`] isolates in-flight records from the stable pool
//! - **Storage**: [`store::RecordStore`] and [`repository::TaskRepository`] over PostgreSQL
//! - **Artifacts**: [`artifacts::ArtifactStore`] writes and prunes output files
//! - **Providers**: iNaturalist observations and an elevation service
//!
//! ## Testing
//!
//! [`testing`] holds in-memory doubles for every external seam, so the whole
//! pipeline runs without PostgreSQL or network access:
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod artifacts;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod providers;
pub mod query_builder;
pub mod repository;
pub mod staging;
pub mod state_machine;
pub mod store;
pub mod testing;

pub use config::{ConfigManager, PipelineConfig};
pub use error::{PipelineError, PipelineResult};
pub use handlers::{HandlerRegistry, HandlerServices, SubtaskContext, SubtaskHandler};
pub use messaging::{QueueConsumer, WorkQueue};
pub use models::{Collection, DatasetRecord, Subtask, SubtaskKind, Task};
pub use orchestration::{TaskOrchestrator, TaskOutcome};
pub use staging::ScratchSpace;
pub use state_machine::{TaskState, TaskStateMachine};
