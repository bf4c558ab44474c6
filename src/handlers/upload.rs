//! File-to-store sync: merge spreadsheet rows into the shared dataset. The
//! file is the incoming side of the merge. Changed rows are staged and
//! promoted by field number so concurrent readers never see half a merge.

use super::merge::{plan, MergeAction, MergeMode, MergeStats};
use super::{distinct_values, stable_by_keys, SubtaskContext, SubtaskHandler};
use crate::error::PipelineResult;
use crate::models::record::{fields, Collection, DatasetRecord};
use crate::models::subtask::SubtaskKind;
use crate::orchestration::input::load_records;
use crate::query_builder::RecordFilter;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tracing::info;

#[derive(Debug, Default, Clone, Copy)]
pub struct UploadHandler;

/// Records to stage for promotion, plus counts of what happened to each row
#[derive(Debug, Default)]
pub struct UploadPlan {
    pub staged: Vec<DatasetRecord>,
    pub stats: MergeStats,
    pub missing_key: u64,
    pub repeated_key: u64,
}

impl UploadPlan {
    pub fn build(rows: Vec<DatasetRecord>, existing: &[DatasetRecord], mode: MergeMode) -> Self {
        let by_key: HashMap<&str, &DatasetRecord> = existing
            .iter()
            .map(|r| (r.get(fields::FIELD_NUMBER).trim(), r))
            .collect();

        let mut upload = UploadPlan::default();
        let mut seen = HashSet::new();
        for row in rows {
            let key = row.get(fields::FIELD_NUMBER).trim().to_string();
            if key.is_empty() {
                upload.missing_key += 1;
                continue;
            }
            if !seen.insert(key.clone()) {
                upload.repeated_key += 1;
                continue;
            }
            let current = by_key.get(key.as_str()).map(|r| &r.fields);
            let action = plan(current, &row.fields, mode);
            upload.stats.record(&action);
            match action {
                MergeAction::Insert(fields) | MergeAction::Update(fields) => {
                    upload.staged.push(DatasetRecord::new(fields));
                }
                MergeAction::Unchanged | MergeAction::Skip => {}
            }
        }
        upload
    }

    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.missing_key > 0 {
            warnings.push(format!(
                "{} uploaded rows without a field number were skipped",
                self.missing_key
            ));
        }
        if self.repeated_key > 0 {
            warnings.push(format!(
                "{} uploaded rows repeating an earlier field number were skipped",
                self.repeated_key
            ));
        }
        warnings
    }
}

#[async_trait]
impl SubtaskHandler for UploadHandler {
    fn kind(&self) -> SubtaskKind {
        SubtaskKind::Upload
    }

    async fn handle(&self, ctx: &SubtaskContext) -> PipelineResult<()> {
        let (task, subtask) = ctx.load().await?;
        let mode = MergeMode::from_subtask(&subtask);
        let input = ctx.resolve(&task, &subtask)?;

        ctx.progress.step("Reading uploaded rows").await?;
        let rows = load_records(&input, ctx.store(), Collection::Occurrences).await?;
        let keys = distinct_values(&rows, fields::FIELD_NUMBER);
        let existing = stable_by_keys(ctx.store(), Collection::Occurrences, &keys).await?;
        let mut upload = UploadPlan::build(rows, &existing, mode);
        let staged = std::mem::take(&mut upload.staged);

        ctx.progress.progress("Merging rows into the dataset", 0.5).await?;
        let scratch = ctx.scratch();
        scratch.discard_abandoned(Collection::Occurrences).await?;
        let ws = scratch
            .stage_records(Collection::Occurrences, staged)
            .await?;
        let (promoted, _) = scratch
            .settle(ws, RecordFilter::All, fields::FIELD_NUMBER)
            .await?;
        info!(
            task_id = %task.id,
            mode = ?mode,
            promoted = promoted,
            stats = %upload.stats.summary(),
            "Merged upload into dataset"
        );

        ctx.progress.warn(upload.warnings()).await?;
        ctx.progress.register_outputs(Vec::new()).await
    }
}
