//! Site summary for land stewards: collecting effort and taxa per county
//! and locality over a date range.

use super::{SubtaskContext, SubtaskHandler};
use crate::error::PipelineResult;
use crate::models::output::OutputType;
use crate::models::record::{fields, Collection, DatasetRecord};
use crate::models::subtask::SubtaskKind;
use crate::orchestration::input::{load_records, ResolvedInput};
use crate::query_builder::RecordFilter;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

pub const REPORT_COLUMNS: [&str; 7] = [
    "county",
    "locality",
    "specimens",
    "samples",
    "collectors",
    "beeTaxa",
    "plantTaxa",
];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportParams {
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
}

impl ReportParams {
    /// Without bounds every record is included; with bounds, undated
    /// records are left out
    pub fn includes(&self, record: &DatasetRecord) -> bool {
        if self.min_date.is_none() && self.max_date.is_none() {
            return true;
        }
        match record.event_date() {
            None => false,
            Some(date) => {
                self.min_date.map_or(true, |min| date >= min)
                    && self.max_date.map_or(true, |max| date <= max)
            }
        }
    }
}

#[derive(Debug, Default)]
struct SiteTally {
    specimens: u64,
    samples: BTreeSet<(String, String, String)>,
    collectors: BTreeSet<String>,
    bee_taxa: BTreeSet<String>,
    plant_taxa: BTreeSet<String>,
}

fn bee_taxon(record: &DatasetRecord) -> String {
    let name = record.get(fields::SCIENTIFIC_NAME).trim();
    if !name.is_empty() {
        return name.to_string();
    }
    [fields::GENUS, fields::SPECIFIC_EPITHET]
        .iter()
        .map(|f| record.get(f).trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Report rows sorted by county then locality
pub fn build_report(records: &[DatasetRecord], params: &ReportParams) -> Vec<Vec<String>> {
    let mut sites: BTreeMap<(String, String), SiteTally> = BTreeMap::new();
    for record in records.iter().filter(|r| params.includes(r)) {
        let site = (
            record.get(fields::COUNTY).trim().to_string(),
            record.get(fields::LOCALITY).trim().to_string(),
        );
        let tally = sites.entry(site).or_default();
        tally.specimens += 1;

        let collector = record.get(fields::RECORDED_BY).trim().to_string();
        let date = record
            .event_date()
            .map(|d| d.to_string())
            .unwrap_or_default();
        tally.samples.insert((
            collector.clone(),
            date,
            record.get(fields::SAMPLE_ID).trim().to_string(),
        ));
        if !collector.is_empty() {
            tally.collectors.insert(collector);
        }
        let bee = bee_taxon(record);
        if !bee.is_empty() {
            tally.bee_taxa.insert(bee);
        }
        if record.has(fields::ASSOCIATED_TAXA) {
            tally
                .plant_taxa
                .insert(record.get(fields::ASSOCIATED_TAXA).trim().to_string());
        }
    }

    sites
        .into_iter()
        .map(|((county, locality), tally)| {
            vec![
                county,
                locality,
                tally.specimens.to_string(),
                tally.samples.len().to_string(),
                tally.collectors.len().to_string(),
                tally.bee_taxa.len().to_string(),
                tally.plant_taxa.len().to_string(),
            ]
        })
        .collect()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StewardshipReportHandler;

#[async_trait]
impl SubtaskHandler for StewardshipReportHandler {
    fn kind(&self) -> SubtaskKind {
        SubtaskKind::StewardshipReport
    }

    async fn handle(&self, ctx: &SubtaskContext) -> PipelineResult<()> {
        let (task, subtask) = ctx.load().await?;
        let params: ReportParams = subtask.params_as()?;
        let input = ctx.resolve(&task, &subtask)?;

        ctx.progress.step("Reading report records").await?;
        let records = match &input {
            ResolvedInput::Empty => {
                ctx.store()
                    .find_all(Collection::Occurrences, RecordFilter::stable())
                    .await?
            }
            other => load_records(other, ctx.store(), Collection::Occurrences).await?,
        };

        ctx.progress.progress("Summarizing sites", 0.5).await?;
        let rows = build_report(&records, &params);
        let sites = rows.len();
        let reference = ctx.reference(&task, OutputType::StewardshipReport, None);
        ctx.artifacts()
            .write_table(&reference, &REPORT_COLUMNS, rows)
            .await?;
        info!(task_id = %task.id, sites = sites, "Wrote stewardship report");

        ctx.progress.register_outputs(vec![reference]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specimen(locality: &str, collector: &str, day: &str, sample: &str, bee: &str) -> DatasetRecord {
        DatasetRecord::from_pairs([
            ("county", "Benton"),
            ("locality", locality),
            ("recordedBy", collector),
            ("year", "2024"),
            ("month", "6"),
            ("day", day),
            ("sampleId", sample),
            ("scientificName", bee),
            ("associatedTaxa", "Rosa nutkana"),
        ])
    }

    #[test]
    fn test_site_tallies() {
        let records = vec![
            specimen("Mary's Peak", "Amy", "12", "1", "Bombus vosnesenskii"),
            specimen("Mary's Peak", "Amy", "12", "1", "Bombus mixtus"),
            specimen("Mary's Peak", "Amy", "12", "2", "Bombus mixtus"),
            specimen("Mary's Peak", "Bo", "13", "1", "Osmia lignaria"),
            specimen("Alsea Falls", "Bo", "14", "1", "Osmia lignaria"),
        ];
        let rows = build_report(&records, &ReportParams::default());
        assert_eq!(
            rows,
            vec![
                vec!["Benton", "Alsea Falls", "1", "1", "1", "1", "1"],
                vec!["Benton", "Mary's Peak", "4", "3", "2", "3", "1"],
            ]
        );
    }

    #[test]
    fn test_date_bounds() {
        let params = ReportParams {
            min_date: NaiveDate::from_ymd_opt(2024, 6, 13),
            max_date: None,
        };
        let records = vec![
            specimen("Mary's Peak", "Amy", "12", "1", "Bombus mixtus"),
            specimen("Mary's Peak", "Bo", "13", "1", "Osmia lignaria"),
            DatasetRecord::from_pairs([("county", "Benton")]),
        ];
        let rows = build_report(&records, &params);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][2], "1");
        assert!(ReportParams::default().includes(&records[2]));
    }
}
