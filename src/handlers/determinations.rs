//! Determination reconciliation: apply identifications from a reference
//! sheet to the matching occurrences. Rows that match nothing are kept in
//! the `determinations` collection and written out for follow-up.

use super::{SubtaskContext, SubtaskHandler};
use crate::artifacts::csv_io::columns_for;
use crate::error::PipelineResult;
use crate::models::output::OutputType;
use crate::models::record::{fields, Collection, DatasetRecord};
use crate::models::subtask::SubtaskKind;
use crate::query_builder::{Pagination, RecordFilter, RecordQuery};
use crate::store::FieldMap;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// Fields a determination may change on an occurrence
pub const DETERMINATION_FIELDS: [&str; 9] = [
    fields::SCIENTIFIC_NAME,
    fields::FAMILY,
    fields::GENUS,
    fields::SPECIFIC_EPITHET,
    fields::TAXON_RANK,
    fields::SEX,
    fields::CASTE,
    fields::IDENTIFIED_BY,
    fields::DATE_IDENTIFIED,
];

const KEY_CHUNK: usize = 500;

/// Determination fields of `determination` that are non-empty and differ
/// from `occurrence`
pub fn determination_changes(occurrence: &DatasetRecord, determination: &DatasetRecord) -> FieldMap {
    DETERMINATION_FIELDS
        .iter()
        .filter_map(|field| {
            let value = determination.get(field).trim();
            (!value.is_empty() && value != occurrence.get(field).trim())
                .then(|| (field.to_string(), value.to_string()))
        })
        .collect()
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub matched: u64,
    pub updated: u64,
    pub unmatched: u64,
}

impl ReconcileStats {
    pub fn warnings(&self) -> Vec<String> {
        vec![
            format!("{} determinations matched an occurrence", self.matched),
            format!("{} occurrences updated", self.updated),
            format!("{} determinations did not match any occurrence", self.unmatched),
        ]
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DeterminationsHandler;

#[async_trait]
impl SubtaskHandler for DeterminationsHandler {
    fn kind(&self) -> SubtaskKind {
        SubtaskKind::Determinations
    }

    async fn handle(&self, ctx: &SubtaskContext) -> PipelineResult<()> {
        let (task, subtask) = ctx.load().await?;
        let input = ctx.resolve(&task, &subtask)?;
        let scratch = ctx.scratch();
        let page_size = ctx.services().processing.page_size.max(1);

        scratch.discard_abandoned(Collection::Determinations).await?;
        ctx.progress.step("Staging determinations").await?;
        let ws = scratch.stage_input(Collection::Determinations, &input).await?;

        let mut by_key: HashMap<String, DatasetRecord> = HashMap::new();
        for record in scratch.records(&ws, RecordFilter::All).await? {
            let key = record.get(fields::FIELD_NUMBER).trim().to_string();
            if !key.is_empty() {
                by_key.entry(key).or_insert(record);
            }
        }

        let total = ctx
            .store()
            .count(Collection::Occurrences, &RecordFilter::stable())
            .await?;
        let mut stats = ReconcileStats::default();
        let mut matched_keys = BTreeSet::new();
        let mut offset = 0;
        loop {
            let query = RecordQuery::new(RecordFilter::stable())
                .paginate(Pagination::limit_offset(page_size, offset));
            let page = ctx.store().find(Collection::Occurrences, &query).await?;
            if page.is_empty() {
                break;
            }
            for occurrence in &page {
                let key = occurrence.get(fields::FIELD_NUMBER).trim();
                let Some(determination) = by_key.get(key) else {
                    continue;
                };
                if matched_keys.insert(key.to_string()) {
                    stats.matched += 1;
                }
                let changes = determination_changes(occurrence, determination);
                if !changes.is_empty() {
                    ctx.store()
                        .update_fields(Collection::Occurrences, occurrence.id, changes)
                        .await?;
                    stats.updated += 1;
                }
            }
            offset += page.len();
            debug!(task_id = %task.id, scanned = offset, "Reconciled occurrence page");
            if total > 0 {
                ctx.progress
                    .progress("Matching determinations", offset as f64 / total as f64)
                    .await?;
            }
            if page.len() < page_size {
                break;
            }
        }

        let keys: Vec<String> = matched_keys.into_iter().collect();
        for chunk in keys.chunks(KEY_CHUNK) {
            scratch
                .update_many(
                    &ws,
                    RecordFilter::is_in(fields::FIELD_NUMBER, chunk.iter().cloned()),
                    FieldMap::from([(fields::MATCHED.to_string(), "true".to_string())]),
                )
                .await?;
        }
        scratch
            .remove(&ws, RecordFilter::eq(fields::MATCHED, "true"))
            .await?;

        let unmatched = scratch.records(&ws, RecordFilter::All).await?;
        stats.unmatched = unmatched.len() as u64;
        let reference = ctx.reference(&task, OutputType::Determinations, None);
        ctx.artifacts()
            .write_csv(&reference, &columns_for(&unmatched), &unmatched)
            .await?;

        scratch.settle(ws, RecordFilter::All, fields::FIELD_NUMBER).await?;
        info!(
            task_id = %task.id,
            matched = stats.matched,
            updated = stats.updated,
            unmatched = stats.unmatched,
            "Reconciled determinations"
        );

        ctx.progress.warn(stats.warnings()).await?;
        ctx.progress.register_outputs(vec![reference]).await
    }
}
