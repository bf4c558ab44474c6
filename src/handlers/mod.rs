//! # Subtask Handlers
//!
//! One handler per [`SubtaskKind`]. Every handler follows the same contract:
//! load the task, find its own subtask by index, resolve input at run time,
//! mutate the shared dataset and write artifacts, then register its outputs
//! exactly once through the [`ProgressReporter`].
//!
//! Dispatch is an exhaustive match over the closed kind enum, so adding a
//! kind does not compile until a handler exists for it. Tests can override
//! individual kinds with [`HandlerRegistry::with_handler`].

pub mod addresses;
pub mod determinations;
pub mod download;
pub mod emails;
pub mod field_number;
pub mod file_sync;
pub mod labels;
pub mod merge;
pub mod normalize;
pub mod observations;
pub mod occurrences;
pub mod pivot_tables;
pub mod plant_list;
pub mod stewardship_report;
pub mod upload;

use crate::artifacts::ArtifactStore;
use crate::config::{PipelineConfig, ProcessingConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::models::output::{OutputReference, OutputType};
use crate::models::record::{Collection, DatasetRecord};
use crate::models::subtask::{Subtask, SubtaskKind};
use crate::models::task::Task;
use crate::orchestration::input::{resolve_input, ResolvedInput};
use crate::orchestration::progress::ProgressReporter;
use crate::providers::{ElevationService, ObservationSource};
use crate::query_builder::RecordFilter;
use crate::repository::TaskRepository;
use crate::staging::ScratchSpace;
use crate::store::RecordStore;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Executes one kind of subtask
#[async_trait]
pub trait SubtaskHandler: Send + Sync {
    fn kind(&self) -> SubtaskKind;

    async fn handle(&self, context: &SubtaskContext) -> PipelineResult<()>;
}

/// Collaborators shared by every handler
pub struct HandlerServices {
    pub repository: Arc<dyn TaskRepository>,
    pub store: Arc<dyn RecordStore>,
    pub scratch: ScratchSpace,
    pub artifacts: ArtifactStore,
    pub observations: Arc<dyn ObservationSource>,
    pub elevation: Arc<dyn ElevationService>,
    pub processing: ProcessingConfig,
    /// Project pulled when an observations subtask names none
    pub default_project_id: Option<String>,
}

impl HandlerServices {
    pub fn new(
        config: &PipelineConfig,
        repository: Arc<dyn TaskRepository>,
        store: Arc<dyn RecordStore>,
        observations: Arc<dyn ObservationSource>,
        elevation: Arc<dyn ElevationService>,
    ) -> Self {
        Self {
            repository,
            scratch: ScratchSpace::new(Arc::clone(&store), &config.scratch),
            store,
            artifacts: ArtifactStore::new(&config.outputs),
            observations,
            elevation,
            processing: config.processing.clone(),
            default_project_id: config.providers.inaturalist_project_id.clone(),
        }
    }
}

/// Everything a handler gets for one invocation
pub struct SubtaskContext {
    services: Arc<HandlerServices>,
    pub progress: ProgressReporter,
}

impl SubtaskContext {
    pub fn new(services: Arc<HandlerServices>, progress: ProgressReporter) -> Self {
        Self { services, progress }
    }

    pub fn task_id(&self) -> Uuid {
        self.progress.task_id()
    }

    pub fn index(&self) -> usize {
        self.progress.index()
    }

    pub fn services(&self) -> &HandlerServices {
        &self.services
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.services.store.as_ref()
    }

    pub fn scratch(&self) -> &ScratchSpace {
        &self.services.scratch
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.services.artifacts
    }

    /// Fresh copy of the task and this handler's subtask entry
    pub async fn load(&self) -> PipelineResult<(Task, Subtask)> {
        let task = self.services.repository.get(self.task_id()).await?;
        let subtask = task.subtask(self.index())?.clone();
        if subtask.kind != self.progress.kind() {
            return Err(PipelineError::validation(format!(
                "Subtask {} of task {} is {}, not {}",
                self.index(),
                task.id,
                subtask.kind,
                self.progress.kind()
            )));
        }
        Ok((task, subtask))
    }

    pub fn resolve(&self, task: &Task, subtask: &Subtask) -> PipelineResult<ResolvedInput> {
        resolve_input(task, subtask, &self.services.artifacts)
    }

    /// Output reference named after the task's file tag
    pub fn reference(
        &self,
        task: &Task,
        output_type: OutputType,
        subtype: Option<&str>,
    ) -> OutputReference {
        self.services
            .artifacts
            .reference(output_type, &task.artifact_tag(self.index()), subtype)
    }
}

// Bound on values per key lookup
const KEY_CHUNK: usize = 500;

/// Stable records of `collection` whose key field is one of `keys`
pub(crate) async fn stable_by_keys(
    store: &dyn RecordStore,
    collection: Collection,
    keys: &[String],
) -> PipelineResult<Vec<DatasetRecord>> {
    let mut found = Vec::new();
    for chunk in keys.chunks(KEY_CHUNK) {
        let filter = RecordFilter::stable().and(RecordFilter::is_in(
            collection.key_field(),
            chunk.iter().cloned(),
        ));
        found.extend(store.find_all(collection, filter).await?);
    }
    Ok(found)
}

/// Distinct non-empty trimmed values of `field`, in first-seen order
pub(crate) fn distinct_values(records: &[DatasetRecord], field: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    records
        .iter()
        .map(|r| r.get(field).trim())
        .filter(|v| !v.is_empty() && seen.insert(*v))
        .map(str::to_string)
        .collect()
}

/// Maps each subtask kind to its handler
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    overrides: HashMap<SubtaskKind, Arc<dyn SubtaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the built-in handler for `handler.kind()`
    pub fn with_handler(mut self, handler: Arc<dyn SubtaskHandler>) -> Self {
        self.overrides.insert(handler.kind(), handler);
        self
    }

    pub fn handler(&self, kind: SubtaskKind) -> Arc<dyn SubtaskHandler> {
        match self.overrides.get(&kind) {
            Some(handler) => Arc::clone(handler),
            None => builtin(kind),
        }
    }
}

fn builtin(kind: SubtaskKind) -> Arc<dyn SubtaskHandler> {
    match kind {
        SubtaskKind::Occurrences => Arc::new(occurrences::OccurrencesHandler),
        SubtaskKind::Observations => Arc::new(observations::ObservationsHandler),
        SubtaskKind::Labels => Arc::new(labels::LabelsHandler),
        SubtaskKind::Addresses => Arc::new(addresses::AddressesHandler),
        SubtaskKind::Emails => Arc::new(emails::EmailsHandler),
        SubtaskKind::PivotTables => Arc::new(pivot_tables::PivotTablesHandler),
        SubtaskKind::PlantList => Arc::new(plant_list::PlantListHandler),
        SubtaskKind::StewardshipReport => Arc::new(stewardship_report::StewardshipReportHandler),
        SubtaskKind::FileSync => Arc::new(file_sync::FileSyncHandler),
        SubtaskKind::Upload => Arc::new(upload::UploadHandler),
        SubtaskKind::Determinations => Arc::new(determinations::DeterminationsHandler),
        SubtaskKind::Download => Arc::new(download::DownloadHandler),
    }
}
