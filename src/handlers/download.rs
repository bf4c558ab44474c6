//! Filtered export of dataset records as CSV.

use super::{SubtaskContext, SubtaskHandler};
use crate::artifacts::csv_io::{self, columns_for};
use crate::error::PipelineResult;
use crate::models::output::OutputType;
use crate::models::record::{Collection, DatasetRecord};
use crate::models::subtask::SubtaskKind;
use crate::orchestration::input::{RecordSelection, ResolvedInput};
use async_trait::async_trait;
use tracing::info;

#[derive(Debug, Default, Clone, Copy)]
pub struct DownloadHandler;

/// Columns of the export: the projection in the order given, otherwise the
/// canonical order of the fields present
pub fn download_columns(selection: &RecordSelection, records: &[DatasetRecord]) -> Vec<String> {
    match &selection.projection {
        Some(projection) if !projection.is_empty() => projection.clone(),
        _ => columns_for(records),
    }
}

#[async_trait]
impl SubtaskHandler for DownloadHandler {
    fn kind(&self) -> SubtaskKind {
        SubtaskKind::Download
    }

    async fn handle(&self, ctx: &SubtaskContext) -> PipelineResult<()> {
        let (task, subtask) = ctx.load().await?;
        let input = ctx.resolve(&task, &subtask)?;
        let selection = match &input {
            ResolvedInput::Selection(selection) => selection.clone(),
            _ => RecordSelection::from_subtask(&subtask)?,
        };

        ctx.progress.step("Selecting records").await?;
        let query = selection.query();
        let records: Vec<DatasetRecord> = match &input {
            ResolvedInput::File(path) => csv_io::read_records(path)
                .await?
                .into_iter()
                .filter(|r| selection.filter.matches(r))
                .map(|r| query.apply_projection(r))
                .collect(),
            ResolvedInput::Selection(_) | ResolvedInput::Empty => {
                ctx.store().find(Collection::Occurrences, &query).await?
            }
        };

        let reference = ctx.reference(&task, OutputType::Download, None);
        ctx.artifacts()
            .write_csv(&reference, &download_columns(&selection, &records), &records)
            .await?;
        info!(task_id = %task.id, records = records.len(), "Wrote download");

        ctx.progress.register_outputs(vec![reference]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_builder::RecordFilter;

    #[test]
    fn test_projection_order_wins() {
        let selection = RecordSelection {
            filter: RecordFilter::All,
            projection: Some(vec!["county".to_string(), "fieldNumber".to_string()]),
        };
        let records = vec![DatasetRecord::from_pairs([("fieldNumber", "1"), ("county", "Polk")])];
        assert_eq!(download_columns(&selection, &records), vec!["county", "fieldNumber"]);

        let unprojected = RecordSelection {
            filter: RecordFilter::All,
            projection: None,
        };
        assert_eq!(download_columns(&unprojected, &records), vec!["fieldNumber", "county"]);
    }
}
