//! # Test Doubles
//!
//! In-memory implementations of every external seam, used by the test suite
//! and for dry runs without PostgreSQL or network access.
//!
//! [`TestPipeline`] wires them into a ready orchestrator:
//!
//! ```rust
//! use pipeline_core::models::{InputSource, Subtask, SubtaskKind, Task};
//! use pipeline_core::testing::TestPipeline;
//!
//! # tokio_test::block_on(async {
//! let dir = tempfile::tempdir().unwrap();
//! let pipeline = TestPipeline::new(dir.path());
//! let task = Task::new("emails", vec![Subtask::new(SubtaskKind::Emails, InputSource::Upload)]);
//! let outcome = pipeline.run(&task).await.unwrap();
//! assert!(outcome.is_completed());
//! # });
//! ```

pub mod memory;
pub mod providers;

pub use memory::{InMemoryRecordStore, InMemoryTaskRepository, InMemoryWorkQueue};
pub use providers::{StaticElevationService, StaticObservationSource};

use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use crate::handlers::{HandlerRegistry, HandlerServices};
use crate::models::record::{Collection, DatasetRecord};
use crate::models::task::{Task, Upload};
use crate::orchestration::{TaskOrchestrator, TaskOutcome};
use crate::providers::{ElevationService, ObservationSource};
use crate::repository::TaskRepository;
use crate::store::RecordStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Orchestrator over in-memory collaborators, writing artifacts under one
/// directory
pub struct TestPipeline {
    pub config: PipelineConfig,
    pub repository: Arc<InMemoryTaskRepository>,
    pub store: Arc<InMemoryRecordStore>,
    pub orchestrator: TaskOrchestrator,
}

impl TestPipeline {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self::with_providers(
            output_dir,
            Arc::new(StaticObservationSource::default()),
            Arc::new(StaticElevationService::new()),
        )
    }

    pub fn with_providers(
        output_dir: impl AsRef<Path>,
        observations: Arc<dyn ObservationSource>,
        elevation: Arc<dyn ElevationService>,
    ) -> Self {
        let mut config = PipelineConfig::default();
        config.outputs.base_dir = output_dir.as_ref().to_path_buf();
        config.processing.page_size = 3;
        Self::with_config(config, observations, elevation, HandlerRegistry::new())
    }

    pub fn with_config(
        config: PipelineConfig,
        observations: Arc<dyn ObservationSource>,
        elevation: Arc<dyn ElevationService>,
        registry: HandlerRegistry,
    ) -> Self {
        let repository = Arc::new(InMemoryTaskRepository::new());
        let store = Arc::new(InMemoryRecordStore::new());
        let services = HandlerServices::new(
            &config,
            Arc::clone(&repository) as Arc<dyn TaskRepository>,
            Arc::clone(&store) as Arc<dyn RecordStore>,
            observations,
            elevation,
        );
        Self {
            config,
            repository,
            store,
            orchestrator: TaskOrchestrator::new(Arc::new(services), registry),
        }
    }

    /// Write an upload CSV next to the outputs and attach it to `task`
    pub async fn attach_upload(&self, task: Task, file_name: &str, csv: &str) -> PipelineResult<Task> {
        let dir = self.config.outputs.base_dir.join("uploads");
        tokio::fs::create_dir_all(&dir).await?;
        let path: PathBuf = dir.join(file_name);
        tokio::fs::write(&path, csv).await?;
        Ok(task.with_upload(Upload {
            file_name: file_name.to_string(),
            file_path: path.to_string_lossy().into_owned(),
            uri: format!("/uploads/{file_name}"),
        }))
    }

    /// Insert the task and process it
    pub async fn run(&self, task: &Task) -> PipelineResult<TaskOutcome> {
        self.repository.insert(task).await?;
        self.orchestrator.process_task(task.id).await
    }

    pub fn task(&self, id: Uuid) -> Option<Task> {
        self.repository.snapshot(id)
    }

    /// Seed stable records directly into the store
    pub async fn seed(&self, collection: Collection, records: Vec<DatasetRecord>) -> PipelineResult<u64> {
        self.store.insert_many(collection, records).await
    }

    /// Local path of an output artifact
    pub fn artifact_path(&self, reference: &crate::models::output::OutputReference) -> PathBuf {
        self.orchestrator.services().artifacts.path_for(reference)
    }
}
