//! Store-to-file sync: refresh the rows of a spreadsheet from the shared
//! dataset. The dataset is the incoming side of the merge.

use super::merge::{plan, MergeAction, MergeMode, MergeStats};
use super::{distinct_values, stable_by_keys, SubtaskContext, SubtaskHandler};
use crate::artifacts::csv_io::columns_for;
use crate::error::PipelineResult;
use crate::models::output::OutputType;
use crate::models::record::{fields, Collection, DatasetRecord};
use crate::models::subtask::SubtaskKind;
use crate::orchestration::input::load_records;
use crate::query_builder::RecordFilter;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Default, Clone, Copy)]
pub struct FileSyncHandler;

/// Merge `stored` records into `rows`. Rows keep their order; stored
/// records with no row are appended when the mode inserts.
pub fn sync_rows(
    rows: Vec<DatasetRecord>,
    stored: &[DatasetRecord],
    mode: MergeMode,
) -> (Vec<DatasetRecord>, MergeStats) {
    let mut stats = MergeStats::default();
    let mut by_key: HashMap<String, &DatasetRecord> = HashMap::new();
    for record in stored {
        let key = record.get(fields::FIELD_NUMBER).trim();
        if !key.is_empty() {
            by_key.entry(key.to_string()).or_insert(record);
        }
    }

    let mut synced = Vec::with_capacity(rows.len());
    for mut row in rows {
        let key = row.get(fields::FIELD_NUMBER).trim().to_string();
        if let Some(incoming) = by_key.remove(&key) {
            let action = plan(Some(&row.fields), &incoming.fields, mode);
            stats.record(&action);
            if let MergeAction::Update(merged) = action {
                row.fields = merged;
            }
        }
        synced.push(row);
    }

    for record in stored {
        let key = record.get(fields::FIELD_NUMBER).trim();
        if by_key.remove(key).is_none() {
            continue;
        }
        let action = plan(None, &record.fields, mode);
        stats.record(&action);
        if let MergeAction::Insert(fields) = action {
            synced.push(DatasetRecord::new(fields));
        }
    }
    (synced, stats)
}

#[async_trait]
impl SubtaskHandler for FileSyncHandler {
    fn kind(&self) -> SubtaskKind {
        SubtaskKind::FileSync
    }

    async fn handle(&self, ctx: &SubtaskContext) -> PipelineResult<()> {
        let (task, subtask) = ctx.load().await?;
        let mode = MergeMode::from_subtask(&subtask);
        let input = ctx.resolve(&task, &subtask)?;

        ctx.progress.step("Reading rows to sync").await?;
        let rows = load_records(&input, ctx.store(), Collection::Occurrences).await?;

        ctx.progress.progress("Merging dataset records", 0.4).await?;
        let stored = if mode.inserts() {
            ctx.store()
                .find_all(Collection::Occurrences, RecordFilter::stable())
                .await?
        } else {
            let keys = distinct_values(&rows, fields::FIELD_NUMBER);
            stable_by_keys(ctx.store(), Collection::Occurrences, &keys).await?
        };
        let (synced, stats) = sync_rows(rows, &stored, mode);

        let reference = ctx.reference(&task, OutputType::Sync, None);
        ctx.artifacts()
            .write_csv(&reference, &columns_for(&synced), &synced)
            .await?;
        info!(task_id = %task.id, mode = ?mode, stats = %stats.summary(), "Synced file with dataset");

        ctx.progress.register_outputs(vec![reference]).await
    }
}
