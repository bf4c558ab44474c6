//! Collector mailing list extracted from staged occurrences.

use super::{SubtaskContext, SubtaskHandler};
use crate::error::PipelineResult;
use crate::models::output::OutputType;
use crate::models::record::{fields, Collection, DatasetRecord};
use crate::models::subtask::SubtaskKind;
use crate::query_builder::RecordFilter;
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::info;

pub const ADDRESS_COLUMNS: [&str; 5] = ["name", "address", "city", "state", "postalCode"];

#[derive(Debug, Default, Clone, Copy)]
pub struct AddressesHandler;

/// Records with both a collector and a mailing address
pub fn matching_filter() -> RecordFilter {
    RecordFilter::not_empty(fields::RECORDED_BY).and(RecordFilter::not_empty(fields::COLLECTOR_ADDRESS))
}

/// Sort key for a personal name: surname, then the full name
pub fn surname_key(name: &str) -> (String, String) {
    let name = name.trim();
    let surname = match name.split_once(',') {
        Some((surname, _)) => surname.trim(),
        None => name.split_whitespace().last().unwrap_or(name),
    };
    (surname.to_lowercase(), name.to_lowercase())
}

/// One row per collector; the first record seen for a name wins
pub fn address_rows(records: &[DatasetRecord]) -> Vec<Vec<String>> {
    let mut seen = HashSet::new();
    let mut rows: Vec<Vec<String>> = records
        .iter()
        .filter(|r| seen.insert(r.get(fields::RECORDED_BY).trim().to_lowercase()))
        .map(|r| {
            [
                fields::RECORDED_BY,
                fields::COLLECTOR_ADDRESS,
                fields::COLLECTOR_CITY,
                fields::COLLECTOR_STATE,
                fields::COLLECTOR_POSTAL_CODE,
            ]
            .iter()
            .map(|f| r.get(f).trim().to_string())
            .collect()
        })
        .collect();
    rows.sort_by_cached_key(|row| surname_key(&row[0]));
    rows
}

#[async_trait]
impl SubtaskHandler for AddressesHandler {
    fn kind(&self) -> SubtaskKind {
        SubtaskKind::Addresses
    }

    async fn handle(&self, ctx: &SubtaskContext) -> PipelineResult<()> {
        let (task, subtask) = ctx.load().await?;
        let input = ctx.resolve(&task, &subtask)?;
        let scratch = ctx.scratch();

        scratch.discard_abandoned(Collection::Occurrences).await?;
        ctx.progress.step("Collecting collector addresses").await?;
        let ws = scratch.stage_input(Collection::Occurrences, &input).await?;
        let records = scratch.records(&ws, matching_filter()).await?;
        scratch.discard(ws).await?;

        let rows = address_rows(&records);
        let collectors = rows.len();
        let reference = ctx.reference(&task, OutputType::Addresses, None);
        ctx.artifacts()
            .write_table(&reference, &ADDRESS_COLUMNS, rows)
            .await?;
        info!(task_id = %task.id, collectors = collectors, "Wrote address list");

        ctx.progress.register_outputs(vec![reference]).await
    }
}
