//! # Label Sheets
//!
//! Renders printable specimen labels for staged occurrence records. Each
//! record becomes a 54×28.8 pt cell on a US Letter grid holding the
//! location, coordinates, collection date, collector and method, a rotated
//! field-number strip and a small 2-D code of the field number.
//!
//! Labels are read-only over the dataset: the working set is always
//! discarded, never promoted.

pub mod barcode;
pub mod counties;
pub mod fields;
pub mod fit;
pub mod layout;
pub mod pdf;

use super::{SubtaskContext, SubtaskHandler};
use crate::artifacts::csv_io::columns_for;
use crate::error::PipelineResult;
use crate::models::output::{OutputReference, OutputType};
use crate::models::record::{fields as record_fields, Collection, DatasetRecord};
use crate::models::subtask::SubtaskKind;
use crate::models::task::Task;
use crate::query_builder::{RecordFilter, RecordQuery, SortField};
use async_trait::async_trait;
use fields::{LabelFields, LabelWarning};
use tracing::info;

pub use fields::CollectionMethod;
pub use fit::{fit_text, FitResult, TextBox};
pub use layout::partition_by_collector;

pub const WARNINGS_SUBTYPE: &str = "warnings";
pub const EXCLUSION_REASON_FIELD: &str = "reason";
const NO_FIELD_NUMBER: &str = "no field number";

#[derive(Debug, Default, Clone, Copy)]
pub struct LabelsHandler;

/// Records split into printable labels and exclusions
#[derive(Debug, Default)]
pub struct LabelPlan {
    pub labels: Vec<LabelFields>,
    /// Parallel to `labels`
    pub warnings: Vec<Vec<LabelWarning>>,
    pub excluded: Vec<DatasetRecord>,
}

impl LabelPlan {
    /// Records must already be in print order
    pub fn build(records: Vec<DatasetRecord>) -> Self {
        let mut plan = LabelPlan::default();
        for record in records {
            if !record.has(record_fields::FIELD_NUMBER) {
                plan.excluded.push(record);
                continue;
            }
            let (label, warnings) = LabelFields::derive(&record);
            plan.labels.push(label);
            plan.warnings.push(warnings);
        }
        plan
    }

    pub fn has_warnings(&self) -> bool {
        self.warnings.iter().any(|w| !w.is_empty())
    }

    /// Labels that earned at least one warning
    pub fn flagged_labels(&self) -> Vec<LabelFields> {
        self.labels
            .iter()
            .zip(&self.warnings)
            .filter(|(_, w)| !w.is_empty())
            .map(|(label, _)| label.clone())
            .collect()
    }

    /// Task warning lines: the exclusion count, then one line per flagged label
    pub fn warning_messages(&self) -> Vec<String> {
        let mut messages = Vec::new();
        if !self.excluded.is_empty() {
            messages.push(format!(
                "{} records excluded from labels ({NO_FIELD_NUMBER})",
                self.excluded.len()
            ));
        }
        for (label, warnings) in self.labels.iter().zip(&self.warnings) {
            if warnings.is_empty() {
                continue;
            }
            let reasons: Vec<String> = warnings.iter().map(ToString::to_string).collect();
            messages.push(format!("Label {}: {}", label.field_number, reasons.join(", ")));
        }
        messages
    }

    /// Excluded records with the reason column filled in
    pub fn exclusion_rows(&self) -> (Vec<String>, Vec<DatasetRecord>) {
        let rows: Vec<DatasetRecord> = self
            .excluded
            .iter()
            .cloned()
            .map(|mut r| {
                r.set(EXCLUSION_REASON_FIELD, NO_FIELD_NUMBER);
                r
            })
            .collect();
        let mut columns = vec![EXCLUSION_REASON_FIELD.to_string()];
        columns.extend(
            columns_for(&self.excluded)
                .into_iter()
                .filter(|c| c != EXCLUSION_REASON_FIELD),
        );
        (columns, rows)
    }
}

/// PDF bytes of a label sheet, blank slots between collectors
pub fn render_sheet(labels: Vec<LabelFields>) -> PipelineResult<Vec<u8>> {
    let slots = partition_by_collector(labels);
    let pages = layout::render_pages(&slots)?;
    pdf::render_document(&pages)
}

impl LabelsHandler {
    async fn write_sheet(
        ctx: &SubtaskContext,
        task: &Task,
        labels: Vec<LabelFields>,
        subtype: Option<&str>,
    ) -> PipelineResult<OutputReference> {
        let bytes = render_sheet(labels)?;
        let reference = ctx.reference(task, OutputType::Labels, subtype);
        ctx.artifacts().write_bytes(&reference, bytes).await?;
        Ok(reference)
    }
}

#[async_trait]
impl SubtaskHandler for LabelsHandler {
    fn kind(&self) -> SubtaskKind {
        SubtaskKind::Labels
    }

    async fn handle(&self, ctx: &SubtaskContext) -> PipelineResult<()> {
        let (task, subtask) = ctx.load().await?;
        let input = ctx.resolve(&task, &subtask)?;
        let scratch = ctx.scratch();

        scratch.discard_abandoned(Collection::Occurrences).await?;
        ctx.progress.step("Staging label records").await?;
        let ws = scratch.stage_input(Collection::Occurrences, &input).await?;

        let query = RecordQuery::new(RecordFilter::All)
            .order_by(SortField::asc(record_fields::RECORDED_BY))
            .order_by(SortField::asc(record_fields::FIELD_NUMBER));
        let records = scratch.query(&ws, query).await?;
        let plan = LabelPlan::build(records);

        ctx.progress.progress("Rendering labels", 0.3).await?;
        let mut outputs = vec![Self::write_sheet(ctx, &task, plan.labels.clone(), None).await?];

        if plan.has_warnings() {
            ctx.progress.progress("Rendering label warnings", 0.7).await?;
            outputs.push(
                Self::write_sheet(ctx, &task, plan.flagged_labels(), Some(WARNINGS_SUBTYPE)).await?,
            );
        }

        if !plan.excluded.is_empty() {
            let (columns, rows) = plan.exclusion_rows();
            let reference = ctx.reference(&task, OutputType::LabelExclusions, None);
            ctx.artifacts().write_csv(&reference, &columns, &rows).await?;
            outputs.push(reference);
        }

        scratch.discard(ws).await?;
        info!(
            task_id = %task.id,
            labels = plan.labels.len(),
            excluded = plan.excluded.len(),
            "Rendered labels"
        );

        ctx.progress.warn(plan.warning_messages()).await?;
        ctx.progress.register_outputs(outputs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(field_number: &str, collector: &str) -> DatasetRecord {
        DatasetRecord::from_pairs([
            ("fieldNumber", field_number),
            ("recordedBy", collector),
            ("county", "Benton"),
            ("stateProvince", "Oregon"),
            ("country", "USA"),
            ("locality", "Mary's Peak"),
            ("decimalLatitude", "44.5"),
            ("decimalLongitude", "-123.5"),
            ("year", "2024"),
            ("month", "6"),
            ("day", "12"),
        ])
    }

    #[test]
    fn test_plan_splits_printable_and_excluded() {
        let mut no_county = complete("24000002", "Jane Doe");
        no_county.fields.remove("county");
        let records = vec![
            complete("24000001", "Jane Doe"),
            no_county,
            complete("", "Jane Doe"),
        ];
        let plan = LabelPlan::build(records);
        assert_eq!(plan.labels.len(), 2);
        assert_eq!(plan.excluded.len(), 1);
        assert!(plan.has_warnings());
        assert_eq!(plan.flagged_labels()[0].field_number, "24000002");
        assert_eq!(
            plan.warning_messages(),
            vec![
                "1 records excluded from labels (no field number)".to_string(),
                "Label 24000002: missing county".to_string(),
            ]
        );

        let (columns, rows) = plan.exclusion_rows();
        assert_eq!(columns[0], "reason");
        assert_eq!(rows[0].get("reason"), "no field number");
    }

    #[test]
    fn test_render_sheet_produces_pdf() {
        let labels: Vec<LabelFields> = ["24000001", "24000002"]
            .iter()
            .map(|n| LabelFields::derive(&complete(n, "Jane Doe")).0)
            .collect();
        let bytes = render_sheet(labels).unwrap();
        let doc = lopdf::Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }
}
