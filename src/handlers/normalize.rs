//! Occurrence record normalization and validation.

use crate::models::record::{fields, DatasetRecord};
use chrono::NaiveDate;

pub const FLAG_COORDINATES: &str = "coordinates";
pub const FLAG_DATE: &str = "date";
pub const FLAG_SECOND_DATE: &str = "date2";

const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

const ROMAN_MONTHS: [&str; 12] = [
    "I", "II", "III", "IV", "V", "VI", "VII", "VIII", "IX", "X", "XI", "XII",
];

const STATE_CODES: &[(&str, &str)] = &[
    ("OR", "Oregon"),
    ("WA", "Washington"),
    ("ID", "Idaho"),
    ("CA", "California"),
    ("NV", "Nevada"),
    ("MT", "Montana"),
    ("BC", "British Columbia"),
];

/// Roman numeral of a month number, `None` outside 1..=12
pub fn roman_month(month: u32) -> Option<&'static str> {
    ROMAN_MONTHS.get(month.checked_sub(1)? as usize).copied()
}

/// Month number from digits, an English name or abbreviation, or a roman numeral
pub fn parse_month(value: &str) -> Option<u32> {
    let value = value.trim().trim_end_matches('.');
    if value.is_empty() {
        return None;
    }
    if let Ok(n) = value.parse::<u32>() {
        return (1..=12).contains(&n).then_some(n);
    }
    let upper = value.to_ascii_uppercase();
    if let Some(i) = ROMAN_MONTHS.iter().position(|r| *r == upper) {
        return Some(i as u32 + 1);
    }
    let lower = value.to_ascii_lowercase();
    if lower.len() >= 3 {
        if let Some(i) = MONTH_NAMES.iter().position(|m| m.starts_with(&lower)) {
            return Some(i as u32 + 1);
        }
    }
    None
}

/// Four-digit year; two-digit years are taken as 20xx
pub fn normalize_year(value: &str) -> String {
    let value = value.trim();
    if value.len() == 2 && value.bytes().all(|b| b.is_ascii_digit()) {
        format!("20{value}")
    } else {
        value.to_string()
    }
}

pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `"jane q. PUBLIC"` becomes `"Jane Q. Public"`
pub fn title_case(value: &str) -> String {
    value
        .split(' ')
        .map(|word| {
            word.split_inclusive(|c: char| c == '-' || c == '\'')
                .map(|part| {
                    let mut chars = part.chars();
                    match chars.next() {
                        Some(first) => first
                            .to_uppercase()
                            .chain(chars.flat_map(char::to_lowercase))
                            .collect(),
                        None => String::new(),
                    }
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn expand_state(value: &str) -> String {
    STATE_CODES
        .iter()
        .find(|(code, _)| code.eq_ignore_ascii_case(value.trim()))
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| value.to_string())
}

pub fn strip_county_suffix(value: &str) -> String {
    let trimmed = value.trim();
    let lower = trimmed.to_ascii_lowercase();
    for suffix in [" county", " co.", " co"] {
        if lower.ends_with(suffix) && trimmed.len() > suffix.len() {
            return trimmed[..trimmed.len() - suffix.len()].trim_end().to_string();
        }
    }
    trimmed.to_string()
}

/// Parsed `(latitude, longitude)` when both are present and in range
pub fn parse_coordinates(latitude: &str, longitude: &str) -> Option<(f64, f64)> {
    let lat: f64 = latitude.trim().parse().ok()?;
    let lng: f64 = longitude.trim().parse().ok()?;
    let valid = lat.is_finite() && lng.is_finite() && lat.abs() <= 90.0 && lng.abs() <= 180.0;
    valid.then_some((lat, lng))
}

fn check_date(record: &DatasetRecord, year: &str, month: &str, day: &str) -> bool {
    let parts = [record.get(year), record.get(month), record.get(day)];
    if parts.iter().all(|p| p.trim().is_empty()) {
        return true;
    }
    ymd(parts[0], parts[1], parts[2]).is_some()
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(
        year.trim().parse().ok()?,
        month.trim().parse().ok()?,
        day.trim().parse().ok()?,
    )
}

/// Normalize a record in place and return the error flags it earned.
///
/// Missing values are not errors here; only present but unusable
/// coordinates or dates are flagged.
pub fn normalize_record(record: &mut DatasetRecord) -> Vec<&'static str> {
    for value in record.fields.values_mut() {
        *value = collapse_whitespace(value);
    }

    if record.has(fields::RECORDED_BY) {
        let name = title_case(record.get(fields::RECORDED_BY));
        record.set(fields::RECORDED_BY, name);
    }
    for field in [fields::MONTH, fields::MONTH2] {
        if let Some(month) = parse_month(record.get(field)) {
            record.set(field, month.to_string());
        }
    }
    for field in [fields::YEAR, fields::YEAR2] {
        if record.has(field) {
            let year = normalize_year(record.get(field));
            record.set(field, year);
        }
    }
    if record.has(fields::STATE_PROVINCE) {
        let state = expand_state(record.get(fields::STATE_PROVINCE));
        record.set(fields::STATE_PROVINCE, state);
    }
    if record.has(fields::COUNTY) {
        let county = strip_county_suffix(record.get(fields::COUNTY));
        record.set(fields::COUNTY, county);
    }

    let mut flags = Vec::new();
    let has_coordinates = record.has(fields::LATITUDE) || record.has(fields::LONGITUDE);
    if has_coordinates
        && parse_coordinates(record.get(fields::LATITUDE), record.get(fields::LONGITUDE)).is_none()
    {
        flags.push(FLAG_COORDINATES);
    }
    if !check_date(record, fields::YEAR, fields::MONTH, fields::DAY) {
        flags.push(FLAG_DATE);
    }
    if !check_date(record, fields::YEAR2, fields::MONTH2, fields::DAY2) {
        flags.push(FLAG_SECOND_DATE);
    }
    for flag in &flags {
        record.add_error_flag(flag);
    }
    flags
}
