//! # Input Resolution
//!
//! Maps a subtask's declared input token to something a handler can read:
//!
//! | token | resolves to |
//! |---|---|
//! | `upload` | the task's uploaded file, or an empty input when there is none |
//! | `selection` | the subtask's own `filter`/`projection` against the stable dataset |
//! | `<index>_<type>` | the file of that output of subtask `index`, else the upload |
//!
//! Resolution reads the task document as it is when the handler runs, so a
//! handler only ever sees outputs of subtasks that already executed.

use crate::artifacts::{csv_io, ArtifactStore};
use crate::error::{PipelineError, PipelineResult};
use crate::models::record::{Collection, DatasetRecord};
use crate::models::subtask::{InputSource, Subtask};
use crate::models::task::Task;
use crate::query_builder::{RecordFilter, RecordQuery};
use crate::store::RecordStore;
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;

/// Filter and projection embedded in a `selection` subtask
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSelection {
    pub filter: RecordFilter,
    pub projection: Option<Vec<String>>,
}

impl RecordSelection {
    /// Read `filter` and `projection` from the subtask parameters.
    ///
    /// A projection may be given as `{"field": 1, ...}` or `["field", ...]`;
    /// fields mapped to a falsy value are left out.
    pub fn from_subtask(subtask: &Subtask) -> PipelineResult<Self> {
        let filter = match subtask.param("filter") {
            None | Some(Value::Null) => RecordFilter::All,
            Some(selection) => RecordFilter::parse_selection(selection)?,
        };
        let projection = match subtask.param("projection") {
            None | Some(Value::Null) => None,
            Some(value) => Some(parse_projection(value)?),
        };
        Ok(Self { filter, projection })
    }

    /// Query over stable records of a collection
    pub fn query(&self) -> RecordQuery {
        RecordQuery::new(RecordFilter::stable().and(self.filter.clone()))
            .project(self.projection.clone())
    }
}

fn parse_projection(value: &Value) -> PipelineResult<Vec<String>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    PipelineError::validation(format!("Projection entries must be strings: {item}"))
                })
            })
            .collect(),
        Value::Object(map) => Ok(map
            .iter()
            .filter(|(_, included)| match included {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
                _ => false,
            })
            .map(|(field, _)| field.clone())
            .collect()),
        other => Err(PipelineError::validation(format!(
            "Unsupported projection: {other}"
        ))),
    }
}

/// Concrete input of one subtask run
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedInput {
    File(PathBuf),
    Selection(RecordSelection),
    /// No seed data; handlers run against an empty input
    Empty,
}

impl ResolvedInput {
    pub fn is_empty(&self) -> bool {
        matches!(self, ResolvedInput::Empty)
    }
}

/// Resolve the input of `subtask` against the current state of `task`
pub fn resolve_input(
    task: &Task,
    subtask: &Subtask,
    artifacts: &ArtifactStore,
) -> PipelineResult<ResolvedInput> {
    let resolved = match &subtask.input {
        InputSource::Upload => upload_input(task),
        InputSource::Selection => ResolvedInput::Selection(RecordSelection::from_subtask(subtask)?),
        InputSource::Output { index, output_type } => {
            match task
                .outputs_of(*index)
                .and_then(|entry| entry.find(output_type))
            {
                Some(reference) => ResolvedInput::File(artifacts.path_for(reference)),
                None => {
                    debug!(
                        task_id = %task.id,
                        input = %subtask.input,
                        "No matching output recorded; falling back to upload"
                    );
                    upload_input(task)
                }
            }
        }
        InputSource::Unrecognized(token) => {
            debug!(task_id = %task.id, input = %token, "Unrecognized input token; using upload");
            upload_input(task)
        }
    };
    Ok(resolved)
}

fn upload_input(task: &Task) -> ResolvedInput {
    task.upload_path()
        .map(|path| ResolvedInput::File(PathBuf::from(path)))
        .unwrap_or(ResolvedInput::Empty)
}

/// Read the records an input refers to without staging them
pub async fn load_records(
    resolved: &ResolvedInput,
    store: &dyn RecordStore,
    collection: Collection,
) -> PipelineResult<Vec<DatasetRecord>> {
    match resolved {
        ResolvedInput::File(path) => csv_io::read_records(path).await,
        ResolvedInput::Selection(selection) => store.find(collection, &selection.query()).await,
        ResolvedInput::Empty => Ok(Vec::new()),
    }
}
