//! Display strings printed on a label, derived once per record.

use super::counties;
use crate::handlers::normalize::{parse_coordinates, roman_month};
use crate::models::record::{fields, DatasetRecord};
use chrono::{Datelike, NaiveDate};
use std::fmt;

/// Data-quality problems that put a label on the warnings sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelWarning {
    MissingCounty,
    MissingCoordinates,
    MissingDate,
    MissingCollector,
}

impl fmt::Display for LabelWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LabelWarning::MissingCounty => "missing county",
            LabelWarning::MissingCoordinates => "missing coordinates",
            LabelWarning::MissingDate => "missing collection date",
            LabelWarning::MissingCollector => "missing collector",
        })
    }
}

/// Collection method bucket shown on the label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionMethod {
    Net,
    Bowl,
    Trap,
    Other,
}

impl CollectionMethod {
    pub fn classify(protocol: &str) -> Option<Self> {
        let protocol = protocol.trim().to_lowercase();
        if protocol.is_empty() {
            return None;
        }
        let method = if protocol.contains("net") {
            CollectionMethod::Net
        } else if ["bowl", "pan", "cup"].iter().any(|t| protocol.contains(t)) {
            CollectionMethod::Bowl
        } else if ["trap", "vane", "malaise"].iter().any(|t| protocol.contains(t)) {
            CollectionMethod::Trap
        } else {
            CollectionMethod::Other
        };
        Some(method)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionMethod::Net => "net",
            CollectionMethod::Bowl => "bowl",
            CollectionMethod::Trap => "trap",
            CollectionMethod::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelFields {
    pub location: String,
    pub coordinates: String,
    pub date: String,
    pub collector: String,
    pub method: String,
    pub field_number: String,
    /// Raw collector name used to group labels
    pub collector_key: String,
}

impl LabelFields {
    /// Derive the printed strings and any warnings for one record
    pub fn derive(record: &DatasetRecord) -> (Self, Vec<LabelWarning>) {
        let mut warnings = Vec::new();
        if !record.has(fields::COUNTY) {
            warnings.push(LabelWarning::MissingCounty);
        }
        let coordinates = coordinates(record);
        if coordinates.is_none() {
            warnings.push(LabelWarning::MissingCoordinates);
        }
        let date = date_code(record);
        if date.is_none() {
            warnings.push(LabelWarning::MissingDate);
        }
        if !record.has(fields::RECORDED_BY) {
            warnings.push(LabelWarning::MissingCollector);
        }

        let label = LabelFields {
            location: location(record),
            coordinates: coordinates.unwrap_or_default(),
            date: date.unwrap_or_default(),
            collector: collector(record.get(fields::RECORDED_BY)),
            method: CollectionMethod::classify(record.get(fields::SAMPLING_PROTOCOL))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            field_number: record.get(fields::FIELD_NUMBER).trim().to_string(),
            collector_key: record.get(fields::RECORDED_BY).trim().to_string(),
        };
        (label, warnings)
    }
}

/// `USA:OR:Bent Mary's Peak`
pub fn location(record: &DatasetRecord) -> String {
    let state_name = record.get(fields::STATE_PROVINCE);
    let region: Vec<String> = [
        counties::country(record.get(fields::COUNTRY)),
        counties::state(state_name),
        counties::county(state_name, record.get(fields::COUNTY)),
    ]
    .into_iter()
    .filter(|s| !s.is_empty())
    .collect();
    let region = region.join(":");
    let locality = record.get(fields::LOCALITY).trim();
    match (region.is_empty(), locality.is_empty()) {
        (false, false) => format!("{region} {locality}"),
        (false, true) => region,
        (true, _) => locality.to_string(),
    }
}

/// `44.568 -123.280 121m`
pub fn coordinates(record: &DatasetRecord) -> Option<String> {
    let (lat, lng) = parse_coordinates(record.get(fields::LATITUDE), record.get(fields::LONGITUDE))?;
    let mut text = format!("{lat:.3} {lng:.3}");
    if let Ok(elevation) = record.get(fields::ELEVATION).trim().parse::<f64>() {
        if elevation.is_finite() {
            text.push_str(&format!(" {}m", elevation.round() as i64));
        }
    }
    Some(text)
}

fn day_month(date: NaiveDate) -> String {
    format!("{}.{}", date.day(), roman_month(date.month()).unwrap_or_default())
}

/// Compact collection date such as `12.VI.2024`, `12-15.VI.2024`,
/// `28.VI-3.VII.2024` or `30.XII.2024-2.I.2025`, followed by the
/// sample/specimen suffix when either is recorded
pub fn date_code(record: &DatasetRecord) -> Option<String> {
    let first = record.event_date()?;
    let mut code = match record.second_event_date().filter(|d| *d != first) {
        None => format!("{}.{}", day_month(first), first.year()),
        Some(second) if second.year() == first.year() && second.month() == first.month() => {
            format!(
                "{}-{}.{}.{}",
                first.day(),
                second.day(),
                roman_month(first.month()).unwrap_or_default(),
                first.year()
            )
        }
        Some(second) if second.year() == first.year() => {
            format!("{}-{}.{}", day_month(first), day_month(second), first.year())
        }
        Some(second) => format!(
            "{}.{}-{}.{}",
            day_month(first),
            first.year(),
            day_month(second),
            second.year()
        ),
    };

    let suffix: Vec<&str> = [record.get(fields::SAMPLE_ID), record.get(fields::SPECIMEN_ID)]
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if !suffix.is_empty() {
        code.push(' ');
        code.push_str(&suffix.join("."));
    }
    Some(code)
}

/// Initials and surname: `Jane Q. Public` and `Public, Jane Q.` both become
/// `J.Q. Public`. Several collectors are kept, separated by commas.
pub fn collector(recorded_by: &str) -> String {
    recorded_by
        .split([';', '&'])
        .flat_map(|part| part.split(" and "))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(format_person)
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_person(name: &str) -> String {
    let (given, surname) = match name.split_once(',') {
        Some((surname, given)) => (given.trim().to_string(), surname.trim().to_string()),
        None => {
            let words: Vec<&str> = name.split_whitespace().collect();
            match words.split_last() {
                Some((last, rest)) if !rest.is_empty() => (rest.join(" "), last.to_string()),
                _ => return name.to_string(),
            }
        }
    };
    let initials: String = given
        .split(|c: char| c.is_whitespace() || c == '.')
        .filter_map(|w| w.chars().next())
        .flat_map(|c| c.to_uppercase().chain(std::iter::once('.')))
        .collect();
    if initials.is_empty() {
        surname
    } else {
        format!("{initials} {surname}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> DatasetRecord {
        DatasetRecord::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn test_date_codes() {
        let base = [("year", "2024"), ("month", "6"), ("day", "12")];
        assert_eq!(date_code(&record(&base)).unwrap(), "12.VI.2024");

        let mut same_month = base.to_vec();
        same_month.extend([("year2", "2024"), ("month2", "6"), ("day2", "15")]);
        assert_eq!(date_code(&record(&same_month)).unwrap(), "12-15.VI.2024");

        let mut same_year = base.to_vec();
        same_year.extend([("year2", "2024"), ("month2", "7"), ("day2", "3")]);
        assert_eq!(date_code(&record(&same_year)).unwrap(), "12.VI-3.VII.2024");

        let mut across_years = vec![("year", "2024"), ("month", "12"), ("day", "30")];
        across_years.extend([("year2", "2025"), ("month2", "1"), ("day2", "2")]);
        assert_eq!(
            date_code(&record(&across_years)).unwrap(),
            "30.XII.2024-2.I.2025"
        );

        let mut with_sample = base.to_vec();
        with_sample.extend([("sampleId", "3"), ("specimenId", "2")]);
        assert_eq!(date_code(&record(&with_sample)).unwrap(), "12.VI.2024 3.2");

        assert_eq!(date_code(&record(&[("year", "2024")])), None);
    }

    #[test]
    fn test_collector_initials() {
        assert_eq!(collector("Jane Q. Public"), "J.Q. Public");
        assert_eq!(collector("Public, Jane Q."), "J.Q. Public");
        assert_eq!(collector("Cher"), "Cher");
        assert_eq!(
            collector("Jane Doe & John Smith"),
            "J. Doe, J. Smith"
        );
    }

    #[test]
    fn test_method_classifier() {
        assert_eq!(CollectionMethod::classify("Aerial net"), Some(CollectionMethod::Net));
        assert_eq!(CollectionMethod::classify("blue vane trap"), Some(CollectionMethod::Trap));
        assert_eq!(CollectionMethod::classify("pan trap"), Some(CollectionMethod::Bowl));
        assert_eq!(CollectionMethod::classify("by hand"), Some(CollectionMethod::Other));
        assert_eq!(CollectionMethod::classify(" "), None);
    }

    #[test]
    fn test_location_and_coordinates() {
        let r = record(&[
            ("country", "United States"),
            ("stateProvince", "Oregon"),
            ("county", "Benton"),
            ("locality", "Mary's Peak"),
            ("decimalLatitude", "44.50449"),
            ("decimalLongitude", "-123.55249"),
            ("minimumElevationInMeters", "1200.4"),
        ]);
        assert_eq!(location(&r), "USA:OR:Bent Mary's Peak");
        assert_eq!(coordinates(&r).unwrap(), "44.504 -123.552 1200m");
        assert_eq!(location(&record(&[("locality", "Somewhere")])), "Somewhere");
    }

    #[test]
    fn test_warnings() {
        let (fields, warnings) = LabelFields::derive(&record(&[("fieldNumber", "24000001")]));
        assert_eq!(fields.field_number, "24000001");
        assert_eq!(
            warnings,
            vec![
                LabelWarning::MissingCounty,
                LabelWarning::MissingCoordinates,
                LabelWarning::MissingDate,
                LabelWarning::MissingCollector
            ]
        );
    }
}
