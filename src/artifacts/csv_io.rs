//! CSV reading and encoding for dataset records and derived tables.

use crate::error::{PipelineError, PipelineResult};
use crate::models::record::{DatasetRecord, OCCURRENCE_COLUMNS};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Parse a CSV file into stable (unflagged) records keyed by header name
pub async fn read_records(path: &Path) -> PipelineResult<Vec<DatasetRecord>> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        PipelineError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {e}", path.display()),
        ))
    })?;
    parse_records(&bytes)
}

pub fn parse_records(bytes: &[u8]) -> PipelineResult<Vec<DatasetRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let fields: BTreeMap<String, String> = headers
            .iter()
            .zip(row.iter())
            .filter(|(header, _)| !header.is_empty())
            .map(|(header, value)| (header.clone(), value.to_string()))
            .collect();
        if fields.values().all(|v| v.trim().is_empty()) {
            continue;
        }
        records.push(DatasetRecord::new(fields));
    }
    Ok(records)
}

/// Column order for a set of records: canonical occurrence columns that
/// appear in any record, then the remaining columns sorted
pub fn columns_for(records: &[DatasetRecord]) -> Vec<String> {
    let present: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.fields.keys().map(String::as_str))
        .collect();

    let mut columns: Vec<String> = OCCURRENCE_COLUMNS
        .iter()
        .filter(|c| present.contains(*c))
        .map(|c| c.to_string())
        .collect();
    columns.extend(
        present
            .iter()
            .filter(|c| !OCCURRENCE_COLUMNS.contains(c))
            .map(|c| c.to_string()),
    );
    columns
}

/// Encode records under the given header; missing fields are blank
pub fn encode_records(columns: &[String], records: &[DatasetRecord]) -> PipelineResult<Vec<u8>> {
    encode_rows(
        columns,
        records
            .iter()
            .map(|r| columns.iter().map(|c| r.get(c).to_string()).collect()),
    )
}

/// Encode an arbitrary table
pub fn encode_rows<H, I>(header: &[H], rows: I) -> PipelineResult<Vec<u8>>
where
    H: AsRef<str>,
    I: IntoIterator<Item = Vec<String>>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(header.iter().map(|h| h.as_ref()))?;
    for row in rows {
        writer.write_record(&row)?;
    }
    writer
        .into_inner()
        .map_err(|e| PipelineError::Csv(e.to_string()))
}
