//! Cross-tabulated record counts, one CSV per requested pivot.

use super::{SubtaskContext, SubtaskHandler};
use crate::error::PipelineResult;
use crate::models::output::OutputType;
use crate::models::record::{fields, Collection, DatasetRecord};
use crate::models::subtask::SubtaskKind;
use crate::query_builder::{compare_values, RecordFilter};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::info;

pub const BLANK: &str = "(blank)";
pub const TOTAL: &str = "Total";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PivotSpec {
    pub rows: String,
    pub columns: String,
}

impl PivotSpec {
    pub fn new(rows: &str, columns: &str) -> Self {
        Self {
            rows: rows.to_string(),
            columns: columns.to_string(),
        }
    }

    pub fn subtype(&self) -> String {
        format!("{}-by-{}", self.rows, self.columns)
    }
}

#[derive(Debug, Default, Deserialize)]
struct PivotParams {
    #[serde(default)]
    pivots: Vec<PivotSpec>,
}

pub fn default_pivots() -> Vec<PivotSpec> {
    vec![
        PivotSpec::new(fields::RECORDED_BY, fields::YEAR),
        PivotSpec::new(fields::COUNTY, fields::YEAR),
        PivotSpec::new(fields::GENUS, fields::COUNTY),
    ]
}

/// Count table of one pivot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

fn label(record: &DatasetRecord, field: &str) -> String {
    let value = record.get(field).trim();
    if value.is_empty() {
        BLANK.to_string()
    } else {
        value.to_string()
    }
}

fn sorted_keys<V>(map: &BTreeMap<String, V>) -> Vec<String> {
    let mut keys: Vec<String> = map.keys().cloned().collect();
    keys.sort_by(|a, b| compare_values(a, b));
    keys
}

/// Count records by the pivot's row and column values, with a `Total`
/// column on every row and a totals row last
pub fn build_pivot(records: &[DatasetRecord], spec: &PivotSpec) -> PivotTable {
    let mut counts: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
    let mut column_totals: BTreeMap<String, u64> = BTreeMap::new();
    for record in records {
        let row = label(record, &spec.rows);
        let column = label(record, &spec.columns);
        *counts.entry(row).or_default().entry(column.clone()).or_default() += 1;
        *column_totals.entry(column).or_default() += 1;
    }

    let columns = sorted_keys(&column_totals);
    let mut header = Vec::with_capacity(columns.len() + 2);
    header.push(spec.rows.clone());
    header.extend(columns.iter().cloned());
    header.push(TOTAL.to_string());

    let mut rows = Vec::with_capacity(counts.len() + 1);
    for row_key in sorted_keys(&counts) {
        let cells = &counts[&row_key];
        let mut row = vec![row_key.clone()];
        row.extend(
            columns
                .iter()
                .map(|c| cells.get(c).copied().unwrap_or(0).to_string()),
        );
        row.push(cells.values().sum::<u64>().to_string());
        rows.push(row);
    }

    let mut totals = vec![TOTAL.to_string()];
    totals.extend(columns.iter().map(|c| column_totals[c].to_string()));
    totals.push(records.len().to_string());
    rows.push(totals);

    PivotTable { header, rows }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PivotTablesHandler;

#[async_trait]
impl SubtaskHandler for PivotTablesHandler {
    fn kind(&self) -> SubtaskKind {
        SubtaskKind::PivotTables
    }

    async fn handle(&self, ctx: &SubtaskContext) -> PipelineResult<()> {
        let (task, subtask) = ctx.load().await?;
        let params: PivotParams = subtask.params_as()?;
        let pivots = if params.pivots.is_empty() {
            default_pivots()
        } else {
            params.pivots
        };
        let input = ctx.resolve(&task, &subtask)?;
        let scratch = ctx.scratch();

        scratch.discard_abandoned(Collection::Occurrences).await?;
        ctx.progress.step("Staging pivot records").await?;
        let ws = scratch.stage_input(Collection::Occurrences, &input).await?;
        let records = scratch.records(&ws, RecordFilter::All).await?;
        scratch.discard(ws).await?;

        let mut outputs = Vec::with_capacity(pivots.len());
        for (i, spec) in pivots.iter().enumerate() {
            ctx.progress
                .progress(
                    &format!("Building pivot {}", spec.subtype()),
                    i as f64 / pivots.len() as f64,
                )
                .await?;
            let table = build_pivot(&records, spec);
            let reference = ctx.reference(&task, OutputType::PivotTables, Some(&spec.subtype()));
            let header: Vec<&str> = table.header.iter().map(String::as_str).collect();
            ctx.artifacts()
                .write_table(&reference, &header, table.rows)
                .await?;
            outputs.push(reference);
        }
        info!(task_id = %task.id, pivots = outputs.len(), records = records.len(), "Wrote pivot tables");

        ctx.progress.register_outputs(outputs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(collector: &str, year: &str) -> DatasetRecord {
        DatasetRecord::from_pairs([("recordedBy", collector), ("year", year)])
    }

    #[test]
    fn test_pivot_counts_and_totals() {
        let records = vec![
            record("Amy", "2023"),
            record("Amy", "2024"),
            record("Bo", "2024"),
            record("", "2024"),
            record("Amy", "2024"),
        ];
        let table = build_pivot(&records, &PivotSpec::new("recordedBy", "year"));
        assert_eq!(table.header, vec!["recordedBy", "2023", "2024", "Total"]);
        assert_eq!(
            table.rows,
            vec![
                vec!["(blank)", "0", "1", "1"],
                vec!["Amy", "1", "2", "3"],
                vec!["Bo", "0", "1", "1"],
                vec!["Total", "1", "4", "5"],
            ]
        );
    }

    #[test]
    fn test_numeric_columns_sort_numerically() {
        let records = vec![record("Amy", "10"), record("Amy", "9")];
        let table = build_pivot(&records, &PivotSpec::new("recordedBy", "year"));
        assert_eq!(table.header, vec!["recordedBy", "9", "10", "Total"]);
    }

    #[test]
    fn test_params_default_and_subtype() {
        assert_eq!(default_pivots().len(), 3);
        assert_eq!(PivotSpec::new("county", "year").subtype(), "county-by-year");
    }
}
