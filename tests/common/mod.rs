//! Shared fixtures for the integration tests.

#![allow(dead_code)]

pub mod strategies;

use pipeline_core::models::{InputSource, Subtask, SubtaskKind};
use pipeline_core::DatasetRecord;
use tempfile::TempDir;

/// Header of the occurrence uploads used across the suite
pub const OCCURRENCE_HEADER: &str = "fieldNumber,recordedBy,sampleId,day,month,year,samplingProtocol,country,stateProvince,county,locality,decimalLatitude,decimalLongitude,collectorEmail,collectorAddress,collectorCity,collectorState,collectorPostalCode,genus,scientificName,associatedTaxa,familyPlant,genusPlant";

/// Ten occurrence rows from two collectors; 24000004 has no county
pub fn ten_occurrences_csv() -> String {
    let rows = [
        "24000001,jane doe,1,12,6,2024,aerial net,USA,OR,Benton,Mary's Peak,44.5041,-123.5527,jane@example.org,1 Oak St,Corvallis,OR,97330,Bombus,Bombus mixtus,Rubus armeniacus,Rosaceae,Rubus",
        "24000002,jane doe,1,12,6,2024,aerial net,USA,OR,Benton,Mary's Peak,44.5041,-123.5527,jane@example.org,1 Oak St,Corvallis,OR,97330,Bombus,Bombus vosnesenskii,Rubus armeniacus,Rosaceae,Rubus",
        "24000003,jane doe,2,13,VI,2024,blue vane trap,USA,OR,Benton County,Finley NWR,44.4106,-123.3265,jane@example.org,1 Oak St,Corvallis,OR,97330,Andrena,Andrena prunorum,,,",
        "24000004,jane doe,3,14,6,2024,aerial net,USA,OR,,Soap Creek,44.6501,-123.2790,JANE@example.org,1 Oak St,Corvallis,OR,97330,Osmia,Osmia lignaria,Ceanothus velutinus,Rhamnaceae,Ceanothus",
        "24000005,john roe,1,2,7,2024,bowl,USA,OR,Lane,Spencer Butte,44.0046,-123.1096,john@example.org,9 Elm Ave,Eugene,OR,97401,Bombus,Bombus melanopygus,Lupinus polyphyllus,Fabaceae,Lupinus",
        "24000006,john roe,1,2,7,2024,bowl,USA,OR,Lane,Spencer Butte,44.0046,-123.1096,john@example.org,9 Elm Ave,Eugene,OR,97401,Lasioglossum,Lasioglossum sisymbrii,Lupinus polyphyllus,Fabaceae,Lupinus",
        "24000007,john roe,2,3,7,2024,aerial net,USA,OR,Lane,Mount Pisgah,43.9929,-122.9812,john@example.org,9 Elm Ave,Eugene,OR,97401,Bombus,Bombus mixtus,Rubus armeniacus,Rosaceae,Rubus",
        "24000008,john roe,2,3,7,2024,aerial net,USA,OR,Lane,Mount Pisgah,43.9929,-122.9812,john@example.org,9 Elm Ave,Eugene,OR,97401,Halictus,Halictus ligatus,Cirsium vulgare,Asteraceae,Cirsium",
        "24000009,john roe,3,4,7,2024,aerial net,USA,OR,Lane,Mount Pisgah,43.9929,-122.9812,john@example.org,9 Elm Ave,Eugene,OR,97401,Agapostemon,Agapostemon texanus,Cirsium vulgare,Asteraceae,Cirsium",
        "24000010,john roe,3,4,7,2024,aerial net,USA,OR,Lane,Mount Pisgah,43.9929,-122.9812,john@example.org,9 Elm Ave,Eugene,OR,97401,Bombus,Bombus vosnesenskii,Cirsium vulgare,Asteraceae,Cirsium",
    ];
    csv_of(OCCURRENCE_HEADER, &rows)
}

pub fn csv_of(header: &str, rows: &[&str]) -> String {
    let mut csv = String::from(header);
    for row in rows {
        csv.push('\n');
        csv.push_str(row);
    }
    csv.push('\n');
    csv
}

pub fn subtask(kind: SubtaskKind, input: &str) -> Subtask {
    Subtask::new(kind, InputSource::from(input.to_string()))
}

pub fn record(pairs: &[(&str, &str)]) -> DatasetRecord {
    DatasetRecord::from_pairs(pairs.iter().copied())
}

pub fn output_dir() -> TempDir {
    tempfile::tempdir().expect("temporary output directory")
}

/// Parse an artifact written as CSV into header and rows
pub fn read_csv(path: &std::path::Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).expect("readable csv artifact");
    let header = reader
        .headers()
        .expect("csv header")
        .iter()
        .map(str::to_string)
        .collect();
    let rows = reader
        .records()
        .map(|r| r.expect("csv row").iter().map(str::to_string).collect())
        .collect();
    (header, rows)
}
