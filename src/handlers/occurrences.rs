//! Dataset normalization: stage the input, clean every record, report
//! duplicates and promote the clean records into the shared dataset.

use super::normalize::normalize_record;
use super::{SubtaskContext, SubtaskHandler};
use crate::artifacts::csv_io::columns_for;
use crate::error::PipelineResult;
use crate::models::output::OutputType;
use crate::models::record::{fields, Collection, DatasetRecord};
use crate::models::subtask::SubtaskKind;
use crate::query_builder::RecordFilter;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::info;

const KEY_CHUNK: usize = 500;

#[derive(Debug, Default, Clone, Copy)]
pub struct OccurrencesHandler;

/// Records promoted out of the working set: keyed, or clean
pub fn promotion_filter() -> RecordFilter {
    RecordFilter::not_empty(fields::FIELD_NUMBER).or(RecordFilter::empty(fields::ERROR_FLAGS))
}

/// Split records into those whose key repeats within `records` or already
/// exists in `stable_keys`, and the ids of repeated records beyond the first
pub fn find_duplicates<'a>(
    records: &'a [DatasetRecord],
    stable_keys: &BTreeSet<String>,
) -> (Vec<&'a DatasetRecord>, Vec<uuid::Uuid>) {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        let key = record.get(fields::FIELD_NUMBER).trim();
        if !key.is_empty() {
            *counts.entry(key).or_default() += 1;
        }
    }

    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    let mut redundant = Vec::new();
    for record in records {
        let key = record.get(fields::FIELD_NUMBER).trim();
        if key.is_empty() {
            continue;
        }
        let repeated = counts.get(key).copied().unwrap_or(0) > 1;
        if repeated || stable_keys.contains(key) {
            duplicates.push(record);
        }
        if !seen.insert(key) {
            redundant.push(record.id);
        }
    }
    (duplicates, redundant)
}

#[async_trait]
impl SubtaskHandler for OccurrencesHandler {
    fn kind(&self) -> SubtaskKind {
        SubtaskKind::Occurrences
    }

    async fn handle(&self, ctx: &SubtaskContext) -> PipelineResult<()> {
        let (task, subtask) = ctx.load().await?;
        let input = ctx.resolve(&task, &subtask)?;
        let scratch = ctx.scratch();

        scratch.discard_abandoned(Collection::Occurrences).await?;
        ctx.progress.step("Staging occurrence records").await?;
        let ws = scratch.stage_input(Collection::Occurrences, &input).await?;

        ctx.progress.progress("Normalizing occurrence records", 0.2).await?;
        let staged = scratch.records(&ws, RecordFilter::All).await?;
        let mut flagged = 0;
        let mut normalized = Vec::with_capacity(staged.len());
        for mut record in staged {
            let before = record.fields.clone();
            if !normalize_record(&mut record).is_empty() {
                flagged += 1;
            }
            if record.fields != before {
                scratch.update(&ws, record.id, record.fields.clone()).await?;
            }
            normalized.push(record);
        }

        ctx.progress.progress("Checking for duplicate field numbers", 0.6).await?;
        let keys: Vec<String> = normalized
            .iter()
            .map(|r| r.get(fields::FIELD_NUMBER).trim().to_string())
            .filter(|k| !k.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut stable_keys = BTreeSet::new();
        for chunk in keys.chunks(KEY_CHUNK) {
            let existing = ctx
                .store()
                .find_all(
                    Collection::Occurrences,
                    RecordFilter::stable()
                        .and(RecordFilter::is_in(fields::FIELD_NUMBER, chunk.iter().cloned())),
                )
                .await?;
            stable_keys.extend(
                existing
                    .iter()
                    .map(|r| r.get(fields::FIELD_NUMBER).trim().to_string()),
            );
        }
        let (duplicates, redundant) = find_duplicates(&normalized, &stable_keys);

        ctx.progress.progress("Writing occurrence files", 0.8).await?;
        let mut outputs = Vec::new();
        let reference = ctx.reference(&task, OutputType::Occurrences, None);
        ctx.artifacts()
            .write_csv(&reference, &columns_for(&normalized), &normalized)
            .await?;
        outputs.push(reference);

        if !duplicates.is_empty() {
            let duplicates: Vec<DatasetRecord> = duplicates.into_iter().cloned().collect();
            let reference = ctx.reference(&task, OutputType::Duplicates, None);
            ctx.artifacts()
                .write_csv(&reference, &columns_for(&duplicates), &duplicates)
                .await?;
            outputs.push(reference);
        }

        if !redundant.is_empty() {
            scratch.remove(&ws, RecordFilter::ids(redundant)).await?;
        }
        let (promoted, discarded) = scratch
            .settle(ws, promotion_filter(), fields::FIELD_NUMBER)
            .await?;
        info!(
            task_id = %task.id,
            records = normalized.len(),
            flagged = flagged,
            promoted = promoted,
            discarded = discarded,
            "Normalized occurrences"
        );

        let mut warnings = Vec::new();
        if flagged > 0 {
            warnings.push(format!("{flagged} occurrence records have error flags"));
        }
        if discarded > 0 {
            warnings.push(format!(
                "{discarded} occurrence records were not added to the dataset"
            ));
        }
        ctx.progress.warn(warnings).await?;
        ctx.progress.register_outputs(outputs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_within_set_and_against_pool() {
        let records = vec![
            DatasetRecord::from_pairs([("fieldNumber", "24000001")]),
            DatasetRecord::from_pairs([("fieldNumber", "24000002")]),
            DatasetRecord::from_pairs([("fieldNumber", "24000001")]),
            DatasetRecord::from_pairs([("fieldNumber", "")]),
            DatasetRecord::from_pairs([("fieldNumber", "24000009")]),
        ];
        let stable: BTreeSet<String> = ["24000009".to_string()].into_iter().collect();
        let (duplicates, redundant) = find_duplicates(&records, &stable);
        let keys: Vec<&str> = duplicates.iter().map(|r| r.get("fieldNumber")).collect();
        assert_eq!(keys, vec!["24000001", "24000001", "24000009"]);
        assert_eq!(redundant, vec![records[2].id]);
    }

    #[test]
    fn test_promotion_filter() {
        let filter = promotion_filter();
        assert!(filter.matches(&DatasetRecord::from_pairs([
            ("fieldNumber", "1"),
            ("errorFlags", "date")
        ])));
        assert!(filter.matches(&DatasetRecord::from_pairs([("county", "Benton")])));
        assert!(!filter.matches(&DatasetRecord::from_pairs([("errorFlags", "date")])));
    }
}
