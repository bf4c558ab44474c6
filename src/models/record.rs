//! # Dataset Records
//!
//! Records of the shared dataset. Field values are kept as display strings,
//! the way they arrive from spreadsheets, and every record optionally belongs
//! to a scratch working set while a handler has it quarantined.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Identifier of one staging pass over the dataset
pub type WorkingSetId = Uuid;

/// Field names used by more than one handler
pub mod fields {
    pub const FIELD_NUMBER: &str = "fieldNumber";
    pub const ERROR_FLAGS: &str = "errorFlags";
    pub const SAMPLE_ID: &str = "sampleId";
    pub const SPECIMEN_ID: &str = "specimenId";
    pub const RECORDED_BY: &str = "recordedBy";
    pub const COLLECTOR_EMAIL: &str = "collectorEmail";
    pub const COLLECTOR_ADDRESS: &str = "collectorAddress";
    pub const COLLECTOR_CITY: &str = "collectorCity";
    pub const COLLECTOR_STATE: &str = "collectorState";
    pub const COLLECTOR_POSTAL_CODE: &str = "collectorPostalCode";
    pub const DAY: &str = "day";
    pub const MONTH: &str = "month";
    pub const YEAR: &str = "year";
    pub const DAY2: &str = "day2";
    pub const MONTH2: &str = "month2";
    pub const YEAR2: &str = "year2";
    pub const SAMPLING_PROTOCOL: &str = "samplingProtocol";
    pub const COUNTRY: &str = "country";
    pub const STATE_PROVINCE: &str = "stateProvince";
    pub const COUNTY: &str = "county";
    pub const LOCALITY: &str = "locality";
    pub const LATITUDE: &str = "decimalLatitude";
    pub const LONGITUDE: &str = "decimalLongitude";
    pub const ELEVATION: &str = "minimumElevationInMeters";
    pub const ASSOCIATED_TAXA: &str = "associatedTaxa";
    pub const FAMILY_PLANT: &str = "familyPlant";
    pub const GENUS_PLANT: &str = "genusPlant";
    pub const SCIENTIFIC_NAME: &str = "scientificName";
    pub const FAMILY: &str = "family";
    pub const GENUS: &str = "genus";
    pub const SPECIFIC_EPITHET: &str = "specificEpithet";
    pub const TAXON_RANK: &str = "taxonRank";
    pub const SEX: &str = "sex";
    pub const CASTE: &str = "caste";
    pub const IDENTIFIED_BY: &str = "identifiedBy";
    pub const DATE_IDENTIFIED: &str = "dateIdentified";
    pub const INATURALIST_URL: &str = "iNaturalistUrl";
    pub const SPECIMENS_COLLECTED: &str = "specimensCollected";
    pub const MATCHED: &str = "matched";
}

/// Canonical column order for occurrence CSV files. Columns not listed here
/// follow in sorted order.
pub const OCCURRENCE_COLUMNS: &[&str] = &[
    fields::ERROR_FLAGS,
    fields::FIELD_NUMBER,
    fields::SAMPLE_ID,
    fields::SPECIMEN_ID,
    fields::RECORDED_BY,
    fields::COLLECTOR_EMAIL,
    fields::COLLECTOR_ADDRESS,
    fields::COLLECTOR_CITY,
    fields::COLLECTOR_STATE,
    fields::COLLECTOR_POSTAL_CODE,
    fields::DAY,
    fields::MONTH,
    fields::YEAR,
    fields::DAY2,
    fields::MONTH2,
    fields::YEAR2,
    fields::SAMPLING_PROTOCOL,
    fields::COUNTRY,
    fields::STATE_PROVINCE,
    fields::COUNTY,
    fields::LOCALITY,
    fields::LATITUDE,
    fields::LONGITUDE,
    fields::ELEVATION,
    fields::ASSOCIATED_TAXA,
    fields::FAMILY_PLANT,
    fields::GENUS_PLANT,
    fields::SCIENTIFIC_NAME,
    fields::FAMILY,
    fields::GENUS,
    fields::SPECIFIC_EPITHET,
    fields::TAXON_RANK,
    fields::SEX,
    fields::CASTE,
    fields::IDENTIFIED_BY,
    fields::DATE_IDENTIFIED,
    fields::INATURALIST_URL,
    fields::SPECIMENS_COLLECTED,
];

/// Named partitions of the shared dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Occurrences,
    Determinations,
    Places,
    Taxa,
    Plants,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Occurrences => "occurrences",
            Self::Determinations => "determinations",
            Self::Places => "places",
            Self::Taxa => "taxa",
            Self::Plants => "plants",
        }
    }

    /// Identity field of the collection
    pub fn key_field(&self) -> &'static str {
        match self {
            Self::Occurrences | Self::Determinations => fields::FIELD_NUMBER,
            Self::Places => "placeId",
            Self::Taxa => "taxonId",
            Self::Plants => fields::ASSOCIATED_TAXA,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record of the shared dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: Uuid,
    /// Working set holding this record in quarantine; `None` for the stable pool
    pub scratch: Option<WorkingSetId>,
    pub staged_at: Option<DateTime<Utc>>,
    /// Stable record a staged copy was taken from
    #[serde(default)]
    pub origin: Option<Uuid>,
    pub fields: BTreeMap<String, String>,
}

impl DatasetRecord {
    pub fn new(fields: BTreeMap<String, String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scratch: None,
            staged_at: None,
            origin: None,
            fields,
        }
    }

    /// Build from `(field, value)` pairs
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Field value, empty when absent
    pub fn get(&self, field: &str) -> &str {
        self.fields.get(field).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, field: &str, value: impl Into<String>) {
        self.fields.insert(field.to_string(), value.into());
    }

    pub fn has(&self, field: &str) -> bool {
        !self.get(field).trim().is_empty()
    }

    pub fn is_stable(&self) -> bool {
        self.scratch.is_none()
    }

    /// Copy with a fresh id, flagged into `working_set`
    pub fn staged_copy(&self, working_set: WorkingSetId, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scratch: Some(working_set),
            staged_at: Some(at),
            origin: if self.is_stable() { Some(self.id) } else { self.origin },
            fields: self.fields.clone(),
        }
    }

    /// Append a flag to the semicolon-separated error list
    pub fn add_error_flag(&mut self, flag: &str) {
        let existing = self.get(fields::ERROR_FLAGS).trim().to_string();
        if existing.split(';').any(|f| f.trim() == flag) {
            return;
        }
        let value = if existing.is_empty() {
            flag.to_string()
        } else {
            format!("{existing};{flag}")
        };
        self.set(fields::ERROR_FLAGS, value);
    }

    /// Collection date from the `year`/`month`/`day` fields
    pub fn event_date(&self) -> Option<NaiveDate> {
        date_from_parts(
            self.get(fields::YEAR),
            self.get(fields::MONTH),
            self.get(fields::DAY),
        )
    }

    /// End of a multi-day collection range, if recorded
    pub fn second_event_date(&self) -> Option<NaiveDate> {
        date_from_parts(
            self.get(fields::YEAR2),
            self.get(fields::MONTH2),
            self.get(fields::DAY2),
        )
    }
}

fn date_from_parts(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(
        year.trim().parse().ok()?,
        month.trim().parse().ok()?,
        day.trim().parse().ok()?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_access() {
        let mut record = DatasetRecord::from_pairs([("fieldNumber", "24000001"), ("county", " ")]);
        assert_eq!(record.get("fieldNumber"), "24000001");
        assert_eq!(record.get("missing"), "");
        assert!(record.has("fieldNumber"));
        assert!(!record.has("county"));

        record.set("county", "Benton");
        assert!(record.has("county"));
        assert!(record.is_stable());
    }

    #[test]
    fn test_error_flags_are_deduplicated() {
        let mut record = DatasetRecord::from_pairs([("fieldNumber", "1")]);
        record.add_error_flag("date");
        record.add_error_flag("coordinates");
        record.add_error_flag("date");
        assert_eq!(record.get(fields::ERROR_FLAGS), "date;coordinates");
    }

    #[test]
    fn test_event_dates() {
        let record = DatasetRecord::from_pairs([
            ("year", "2024"),
            ("month", "6"),
            ("day", "12"),
            ("year2", "2024"),
            ("month2", "13"),
            ("day2", "1"),
        ]);
        assert_eq!(record.event_date(), NaiveDate::from_ymd_opt(2024, 6, 12));
        assert_eq!(record.second_event_date(), None);
    }

    #[test]
    fn test_staged_copy_gets_new_identity() {
        let record = DatasetRecord::from_pairs([("fieldNumber", "1")]);
        let ws = Uuid::new_v4();
        let copy = record.staged_copy(ws, Utc::now());
        assert_ne!(copy.id, record.id);
        assert_eq!(copy.scratch, Some(ws));
        assert_eq!(copy.origin, Some(record.id));
        assert_eq!(copy.fields, record.fields);
    }

    #[test]
    fn test_collection_keys() {
        assert_eq!(Collection::Occurrences.key_field(), "fieldNumber");
        assert_eq!(Collection::Plants.key_field(), "associatedTaxa");
        assert_eq!(Collection::Taxa.to_string(), "taxa");
    }
}
