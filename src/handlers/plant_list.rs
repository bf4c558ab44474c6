//! Plant list: distinct associated plant taxa with their specimen counts,
//! kept in sync with the `plants` collection.

use super::{SubtaskContext, SubtaskHandler};
use crate::error::PipelineResult;
use crate::models::output::OutputType;
use crate::models::record::{fields, Collection, DatasetRecord};
use crate::models::subtask::SubtaskKind;
use crate::orchestration::input::{load_records, ResolvedInput};
use crate::query_builder::RecordFilter;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::info;

pub const PLANT_COLUMNS: [&str; 4] = ["family", "genus", "name", "specimens"];
const SPECIMENS: &str = "specimens";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlantEntry {
    pub name: String,
    pub family: String,
    pub genus: String,
    pub specimens: u64,
}

impl PlantEntry {
    fn to_record(&self) -> DatasetRecord {
        DatasetRecord::from_pairs([
            (fields::ASSOCIATED_TAXA, self.name.clone()),
            (fields::FAMILY_PLANT, self.family.clone()),
            (fields::GENUS_PLANT, self.genus.clone()),
            (SPECIMENS, self.specimens.to_string()),
        ])
    }

    fn to_row(&self) -> Vec<String> {
        vec![
            self.family.clone(),
            self.genus.clone(),
            self.name.clone(),
            self.specimens.to_string(),
        ]
    }
}

/// One entry per distinct `associatedTaxa`, sorted by family then name.
/// The first non-empty family and genus seen for a plant are kept.
pub fn aggregate_plants(records: &[DatasetRecord]) -> Vec<PlantEntry> {
    let mut plants: BTreeMap<String, PlantEntry> = BTreeMap::new();
    for record in records {
        let name = record.get(fields::ASSOCIATED_TAXA).trim();
        if name.is_empty() {
            continue;
        }
        let entry = plants.entry(name.to_string()).or_insert_with(|| PlantEntry {
            name: name.to_string(),
            family: String::new(),
            genus: String::new(),
            specimens: 0,
        });
        entry.specimens += 1;
        if entry.family.is_empty() {
            entry.family = record.get(fields::FAMILY_PLANT).trim().to_string();
        }
        if entry.genus.is_empty() {
            entry.genus = record.get(fields::GENUS_PLANT).trim().to_string();
        }
    }
    let mut entries: Vec<PlantEntry> = plants.into_values().collect();
    entries.sort_by_cached_key(|e| (e.family.to_lowercase(), e.name.to_lowercase()));
    entries
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlantListHandler;

#[async_trait]
impl SubtaskHandler for PlantListHandler {
    fn kind(&self) -> SubtaskKind {
        SubtaskKind::PlantList
    }

    async fn handle(&self, ctx: &SubtaskContext) -> PipelineResult<()> {
        let (task, subtask) = ctx.load().await?;
        let input = ctx.resolve(&task, &subtask)?;

        ctx.progress.step("Reading plant associations").await?;
        let records = match &input {
            ResolvedInput::Empty => {
                ctx.store()
                    .find_all(Collection::Occurrences, RecordFilter::stable())
                    .await?
            }
            other => load_records(other, ctx.store(), Collection::Occurrences).await?,
        };
        let plants = aggregate_plants(&records);

        ctx.progress.progress("Updating plant list", 0.5).await?;
        let scratch = ctx.scratch();
        scratch.discard_abandoned(Collection::Plants).await?;
        let ws = scratch
            .stage_records(
                Collection::Plants,
                plants.iter().map(PlantEntry::to_record).collect(),
            )
            .await?;
        let (synced, _) = scratch
            .settle(ws, RecordFilter::All, Collection::Plants.key_field())
            .await?;

        let reference = ctx.reference(&task, OutputType::PlantList, None);
        ctx.artifacts()
            .write_table(
                &reference,
                &PLANT_COLUMNS,
                plants.iter().map(PlantEntry::to_row).collect(),
            )
            .await?;
        info!(task_id = %task.id, plants = plants.len(), synced = synced, "Wrote plant list");

        ctx.progress.register_outputs(vec![reference]).await
    }
}
