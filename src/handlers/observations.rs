//! External pull: observations from the observation source become
//! occurrence records with field numbers, place names, plant taxonomy and
//! elevations filled in.

use super::field_number::FieldNumberSequence;
use super::{SubtaskContext, SubtaskHandler};
use crate::artifacts::csv_io::columns_for;
use crate::error::{PipelineError, PipelineResult};
use crate::models::output::OutputType;
use crate::models::record::{fields, Collection, DatasetRecord};
use crate::models::subtask::SubtaskKind;
use crate::providers::{Coordinate, Observation, ObservationQuery, Place, Taxon};
use crate::query_builder::{RecordFilter, RecordQuery};
use crate::store::RecordStore;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::info;

const PLACE_ID: &str = "placeId";
const TAXON_ID: &str = "taxonId";
const KEY_CHUNK: usize = 500;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObservationParams {
    min_date: Option<NaiveDate>,
    max_date: Option<NaiveDate>,
    project_id: Option<String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ObservationsHandler;

/// Cached reference data for one pull
#[derive(Debug, Default)]
pub struct ReferenceData {
    pub places: HashMap<u64, Place>,
    pub taxa: HashMap<u64, Taxon>,
    pub elevations: HashMap<(i64, i64), f64>,
}

/// Expand one observation into one record per collected specimen
pub fn expand_observation(observation: &Observation, reference: &ReferenceData) -> Vec<DatasetRecord> {
    let mut base = DatasetRecord::new(BTreeMap::new());
    base.set(fields::INATURALIST_URL, observation.url.clone());
    base.set(fields::RECORDED_BY, observation.observer.clone());
    base.set(fields::LOCALITY, observation.place_guess.clone());
    if let Some(date) = observation.observed_on {
        base.set(fields::DAY, date.day().to_string());
        base.set(fields::MONTH, date.month().to_string());
        base.set(fields::YEAR, date.year().to_string());
    }
    if let (Some(lat), Some(lng)) = (observation.latitude, observation.longitude) {
        base.set(fields::LATITUDE, lat.to_string());
        base.set(fields::LONGITUDE, lng.to_string());
        if let Some(elevation) = reference.elevations.get(&Coordinate::new(lat, lng).key()) {
            base.set(fields::ELEVATION, format!("{}", elevation.round() as i64));
        }
    }
    if let Some(method) = observation.sampling_method() {
        base.set(fields::SAMPLING_PROTOCOL, method);
    }
    for place_id in &observation.place_ids {
        let Some(place) = reference.places.get(place_id) else {
            continue;
        };
        let field = match place.admin_level {
            Some(0) => fields::COUNTRY,
            Some(10) => fields::STATE_PROVINCE,
            Some(20) => fields::COUNTY,
            _ => continue,
        };
        base.set(field, place.name.clone());
    }
    if !observation.taxon_name.is_empty() {
        base.set(fields::ASSOCIATED_TAXA, observation.taxon_name.clone());
    }
    if let Some(taxon) = observation.taxon_id.and_then(|id| reference.taxa.get(&id)) {
        if let Some(family) = &taxon.family {
            base.set(fields::FAMILY_PLANT, family.clone());
        }
        if let Some(genus) = &taxon.genus {
            base.set(fields::GENUS_PLANT, genus.clone());
        }
    }

    let count = observation.specimens_collected();
    base.set(fields::SPECIMENS_COLLECTED, count.to_string());
    (1..=count)
        .map(|specimen| {
            let mut record = base.clone();
            record.id = uuid::Uuid::new_v4();
            record.set(fields::SPECIMEN_ID, specimen.to_string());
            record
        })
        .collect()
}

async fn cached_ids(
    store: &dyn RecordStore,
    collection: Collection,
    key: &str,
    ids: &[u64],
) -> PipelineResult<HashSet<u64>> {
    let mut known = HashSet::new();
    let keys: Vec<String> = ids.iter().map(u64::to_string).collect();
    for chunk in keys.chunks(KEY_CHUNK) {
        let records = store
            .find(
                collection,
                &RecordQuery::new(
                    RecordFilter::stable().and(RecordFilter::is_in(key, chunk.iter().cloned())),
                ),
            )
            .await?;
        known.extend(records.iter().filter_map(|r| r.get(key).parse::<u64>().ok()));
    }
    Ok(known)
}

fn place_from_record(record: &DatasetRecord) -> Option<Place> {
    Some(Place {
        id: record.get(PLACE_ID).parse().ok()?,
        name: record.get("name").to_string(),
        admin_level: record.get("adminLevel").parse().ok(),
    })
}

fn taxon_from_record(record: &DatasetRecord) -> Option<Taxon> {
    let optional = |field: &str| Some(record.get(field).to_string()).filter(|v| !v.is_empty());
    Some(Taxon {
        id: record.get(TAXON_ID).parse().ok()?,
        name: record.get("name").to_string(),
        rank: record.get("rank").to_string(),
        family: optional("family"),
        genus: optional("genus"),
    })
}

impl ObservationsHandler {
    /// Place and taxon caches, fetching only ids the cache does not hold
    async fn load_reference_data(
        &self,
        ctx: &SubtaskContext,
        observations: &[Observation],
    ) -> PipelineResult<ReferenceData> {
        let store = ctx.store();
        let source = &ctx.services().observations;

        let place_ids: Vec<u64> = observations
            .iter()
            .flat_map(|o| o.place_ids.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let known = cached_ids(store, Collection::Places, PLACE_ID, &place_ids).await?;
        let missing: Vec<u64> = place_ids.iter().copied().filter(|id| !known.contains(id)).collect();
        if !missing.is_empty() {
            let fetched = source.fetch_places(&missing).await?;
            let records = fetched
                .iter()
                .map(|p| {
                    DatasetRecord::from_pairs([
                        (PLACE_ID, p.id.to_string()),
                        ("name", p.name.clone()),
                        (
                            "adminLevel",
                            p.admin_level.map(|l| l.to_string()).unwrap_or_default(),
                        ),
                    ])
                })
                .collect();
            store.insert_many(Collection::Places, records).await?;
        }

        let taxon_ids: Vec<u64> = observations
            .iter()
            .filter_map(|o| o.taxon_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let known = cached_ids(store, Collection::Taxa, TAXON_ID, &taxon_ids).await?;
        let missing: Vec<u64> = taxon_ids.iter().copied().filter(|id| !known.contains(id)).collect();
        if !missing.is_empty() {
            let fetched = source.fetch_taxa(&missing).await?;
            let records = fetched
                .iter()
                .map(|t| {
                    DatasetRecord::from_pairs([
                        (TAXON_ID, t.id.to_string()),
                        ("name", t.name.clone()),
                        ("rank", t.rank.clone()),
                        ("family", t.family.clone().unwrap_or_default()),
                        ("genus", t.genus.clone().unwrap_or_default()),
                    ])
                })
                .collect();
            store.insert_many(Collection::Taxa, records).await?;
        }

        let mut reference = ReferenceData::default();
        for (collection, key, ids) in [
            (Collection::Places, PLACE_ID, &place_ids),
            (Collection::Taxa, TAXON_ID, &taxon_ids),
        ] {
            let keys: Vec<String> = ids.iter().map(u64::to_string).collect();
            for chunk in keys.chunks(KEY_CHUNK) {
                let records = store
                    .find_all(
                        collection,
                        RecordFilter::stable().and(RecordFilter::is_in(key, chunk.iter().cloned())),
                    )
                    .await?;
                for record in &records {
                    match collection {
                        Collection::Places => {
                            if let Some(place) = place_from_record(record) {
                                reference.places.insert(place.id, place);
                            }
                        }
                        _ => {
                            if let Some(taxon) = taxon_from_record(record) {
                                reference.taxa.insert(taxon.id, taxon);
                            }
                        }
                    }
                }
            }
        }
        Ok(reference)
    }

    /// One elevation lookup per distinct rounded coordinate
    async fn load_elevations(
        &self,
        ctx: &SubtaskContext,
        observations: &[Observation],
    ) -> PipelineResult<HashMap<(i64, i64), f64>> {
        let mut distinct: BTreeMap<(i64, i64), Coordinate> = BTreeMap::new();
        for observation in observations {
            if let (Some(lat), Some(lng)) = (observation.latitude, observation.longitude) {
                let coordinate = Coordinate::new(lat, lng);
                distinct.entry(coordinate.key()).or_insert_with(|| coordinate.rounded());
            }
        }
        if distinct.is_empty() {
            return Ok(HashMap::new());
        }
        let coordinates: Vec<Coordinate> = distinct.values().copied().collect();
        let elevations = ctx.services().elevation.lookup(&coordinates).await?;
        Ok(distinct
            .keys()
            .copied()
            .zip(elevations)
            .filter_map(|(key, elevation)| elevation.map(|e| (key, e)))
            .collect())
    }
}

#[async_trait]
impl SubtaskHandler for ObservationsHandler {
    fn kind(&self) -> SubtaskKind {
        SubtaskKind::Observations
    }

    async fn handle(&self, ctx: &SubtaskContext) -> PipelineResult<()> {
        let (task, subtask) = ctx.load().await?;
        let params: ObservationParams = subtask.params_as()?;
        let project_id = params
            .project_id
            .or_else(|| ctx.services().default_project_id.clone())
            .ok_or_else(|| PipelineError::validation("No observation project configured"))?;
        let query = ObservationQuery {
            project_id,
            min_date: params.min_date,
            max_date: params.max_date,
        };
        let scratch = ctx.scratch();

        scratch.discard_abandoned(Collection::Occurrences).await?;
        ctx.progress.step("Fetching observations").await?;
        let observations = ctx.services().observations.fetch_observations(&query).await?;

        ctx.progress.progress("Updating place and taxon data", 0.3).await?;
        let mut reference = self.load_reference_data(ctx, &observations).await?;
        ctx.progress.progress("Looking up elevations", 0.45).await?;
        reference.elevations = self.load_elevations(ctx, &observations).await?;

        ctx.progress.progress("Staging observation records", 0.6).await?;
        let records: Vec<DatasetRecord> = observations
            .iter()
            .flat_map(|o| expand_observation(o, &reference))
            .collect();
        let ws = scratch.stage_records(Collection::Occurrences, records).await?;

        let staged = scratch.records(&ws, RecordFilter::All).await?;
        let urls: Vec<String> = staged
            .iter()
            .map(|r| r.get(fields::INATURALIST_URL).to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut existing: HashSet<(String, String)> = HashSet::new();
        for chunk in urls.chunks(KEY_CHUNK) {
            let stable = ctx
                .store()
                .find_all(
                    Collection::Occurrences,
                    RecordFilter::stable()
                        .and(RecordFilter::is_in(fields::INATURALIST_URL, chunk.iter().cloned())),
                )
                .await?;
            existing.extend(stable.iter().map(|r| {
                (
                    r.get(fields::INATURALIST_URL).to_string(),
                    r.get(fields::SPECIMEN_ID).to_string(),
                )
            }));
        }
        let seen: Vec<uuid::Uuid> = staged
            .iter()
            .filter(|r| {
                existing.contains(&(
                    r.get(fields::INATURALIST_URL).to_string(),
                    r.get(fields::SPECIMEN_ID).to_string(),
                ))
            })
            .map(|r| r.id)
            .collect();
        if !seen.is_empty() {
            scratch.remove(&ws, RecordFilter::ids(seen)).await?;
        }

        ctx.progress.progress("Assigning field numbers", 0.75).await?;
        let unindexed = scratch
            .records(&ws, RecordFilter::empty(fields::FIELD_NUMBER))
            .await?;
        let mut sequence =
            FieldNumberSequence::for_current_year(ctx.store(), Collection::Occurrences).await?;
        for record in &unindexed {
            let number = sequence.next_number()?;
            scratch
                .update(
                    &ws,
                    record.id,
                    [(fields::FIELD_NUMBER.to_string(), number)].into_iter().collect(),
                )
                .await?;
        }

        ctx.progress.progress("Writing observation file", 0.9).await?;
        let pulled = scratch.records(&ws, RecordFilter::All).await?;
        let reference_out = ctx.reference(&task, OutputType::Observations, None);
        ctx.artifacts()
            .write_csv(&reference_out, &columns_for(&pulled), &pulled)
            .await?;

        let (promoted, discarded) = scratch
            .settle(
                ws,
                RecordFilter::not_empty(fields::FIELD_NUMBER),
                fields::FIELD_NUMBER,
            )
            .await?;
        info!(
            task_id = %task.id,
            observations = observations.len(),
            new_records = pulled.len(),
            promoted = promoted,
            discarded = discarded,
            "Pulled observations"
        );
        ctx.progress
            .warn(vec![format!(
                "{} observations pulled, {} new occurrence records",
                observations.len(),
                pulled.len()
            )])
            .await?;
        ctx.progress.register_outputs(vec![reference_out]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_observation_into_specimens() {
        let observation = Observation {
            id: 7,
            url: "https://www.inaturalist.org/observations/7".to_string(),
            observed_on: NaiveDate::from_ymd_opt(2024, 6, 12),
            observer: "Jane Doe".to_string(),
            latitude: Some(44.56781),
            longitude: Some(-123.27949),
            place_ids: vec![1, 10, 20],
            taxon_id: Some(55),
            taxon_name: "Rubus armeniacus".to_string(),
            field_values: [("Number of bees collected".to_string(), "3".to_string())]
                .into_iter()
                .collect(),
            ..Observation::default()
        };
        let mut reference = ReferenceData::default();
        for (id, name, level) in [(1, "United States", 0), (10, "Oregon", 10), (20, "Benton", 20)] {
            reference.places.insert(
                id,
                Place {
                    id,
                    name: name.to_string(),
                    admin_level: Some(level),
                },
            );
        }
        reference.taxa.insert(
            55,
            Taxon {
                id: 55,
                name: "Rubus armeniacus".to_string(),
                rank: "species".to_string(),
                family: Some("Rosaceae".to_string()),
                genus: Some("Rubus".to_string()),
            },
        );
        reference
            .elevations
            .insert(Coordinate::new(44.5678, -123.2795).key(), 121.6);

        let records = expand_observation(&observation, &reference);
        assert_eq!(records.len(), 3);
        let specimen_ids: Vec<&str> = records.iter().map(|r| r.get("specimenId")).collect();
        assert_eq!(specimen_ids, vec!["1", "2", "3"]);
        let first = &records[0];
        assert_eq!(first.get("county"), "Benton");
        assert_eq!(first.get("stateProvince"), "Oregon");
        assert_eq!(first.get("country"), "United States");
        assert_eq!(first.get("familyPlant"), "Rosaceae");
        assert_eq!(first.get("minimumElevationInMeters"), "122");
        assert_eq!(first.get("month"), "6");
        assert!(!first.has("fieldNumber"));
        assert_ne!(records[0].id, records[1].id);
    }
}
