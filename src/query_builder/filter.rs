//! # Record Filters
//!
//! A small predicate language over [`DatasetRecord`] fields. The same tree is
//! evaluated in memory ([`RecordFilter::matches`]) and translated to bound SQL
//! (see [`super::sql`]), so the two store implementations agree on semantics.
//!
//! Selection-based subtask input arrives as a Mongo-style JSON document and is
//! parsed with [`RecordFilter::parse_selection`]:
//!
//! ```json
//! {"county": "Benton", "year": {"$gte": 2023}, "$or": [{"sex": "f"}, {"caste": "queen"}]}
//! ```

use crate::error::{PipelineError, PipelineResult};
use crate::models::record::{DatasetRecord, WorkingSetId};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use uuid::Uuid;

/// Which side of the quarantine a record must be on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScratchScope {
    /// Records in the shared, visible pool
    Stable,
    /// Records held by one working set
    WorkingSet(WorkingSetId),
    /// Records of any working set staged before the given instant
    StagedBefore(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordFilter {
    All,
    Eq(String, String),
    Ne(String, String),
    In(String, Vec<String>),
    NotEmpty(String),
    Empty(String),
    StartsWith(String, String),
    Gte(String, String),
    Lte(String, String),
    Ids(Vec<Uuid>),
    And(Vec<RecordFilter>),
    Or(Vec<RecordFilter>),
    Not(Box<RecordFilter>),
    Scratch(ScratchScope),
}

impl RecordFilter {
    pub fn eq(field: &str, value: impl Into<String>) -> Self {
        Self::Eq(field.to_string(), value.into())
    }

    pub fn ne(field: &str, value: impl Into<String>) -> Self {
        Self::Ne(field.to_string(), value.into())
    }

    pub fn is_in<I, S>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::In(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn not_empty(field: &str) -> Self {
        Self::NotEmpty(field.to_string())
    }

    pub fn empty(field: &str) -> Self {
        Self::Empty(field.to_string())
    }

    pub fn starts_with(field: &str, prefix: impl Into<String>) -> Self {
        Self::StartsWith(field.to_string(), prefix.into())
    }

    pub fn gte(field: &str, value: impl Into<String>) -> Self {
        Self::Gte(field.to_string(), value.into())
    }

    pub fn lte(field: &str, value: impl Into<String>) -> Self {
        Self::Lte(field.to_string(), value.into())
    }

    pub fn ids(ids: Vec<Uuid>) -> Self {
        Self::Ids(ids)
    }

    pub fn stable() -> Self {
        Self::Scratch(ScratchScope::Stable)
    }

    pub fn working_set(id: WorkingSetId) -> Self {
        Self::Scratch(ScratchScope::WorkingSet(id))
    }

    pub fn staged_before(at: DateTime<Utc>) -> Self {
        Self::Scratch(ScratchScope::StagedBefore(at))
    }

    /// Conjunction, flattening `All` away
    pub fn and(self, other: RecordFilter) -> Self {
        match (self, other) {
            (RecordFilter::All, f) | (f, RecordFilter::All) => f,
            (RecordFilter::And(mut left), RecordFilter::And(right)) => {
                left.extend(right);
                RecordFilter::And(left)
            }
            (RecordFilter::And(mut left), f) => {
                left.push(f);
                RecordFilter::And(left)
            }
            (f, RecordFilter::And(mut right)) => {
                right.insert(0, f);
                RecordFilter::And(right)
            }
            (left, right) => RecordFilter::And(vec![left, right]),
        }
    }

    pub fn or(self, other: RecordFilter) -> Self {
        match (self, other) {
            (RecordFilter::Or(mut left), f) => {
                left.push(f);
                RecordFilter::Or(left)
            }
            (left, right) => RecordFilter::Or(vec![left, right]),
        }
    }

    pub fn negate(self) -> Self {
        RecordFilter::Not(Box::new(self))
    }

    /// Evaluate against one record
    pub fn matches(&self, record: &DatasetRecord) -> bool {
        match self {
            Self::All => true,
            Self::Eq(field, value) => record.get(field) == value,
            Self::Ne(field, value) => record.get(field) != value,
            Self::In(field, values) => values.iter().any(|v| v == record.get(field)),
            Self::NotEmpty(field) => record.has(field),
            Self::Empty(field) => !record.has(field),
            Self::StartsWith(field, prefix) => record.get(field).starts_with(prefix.as_str()),
            Self::Gte(field, value) => {
                compare_for_match(record.get(field), value) != Ordering::Less
            }
            Self::Lte(field, value) => {
                compare_for_match(record.get(field), value) != Ordering::Greater
            }
            Self::Ids(ids) => ids.contains(&record.id),
            Self::And(filters) => filters.iter().all(|f| f.matches(record)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(record)),
            Self::Not(filter) => !filter.matches(record),
            Self::Scratch(ScratchScope::Stable) => record.scratch.is_none(),
            Self::Scratch(ScratchScope::WorkingSet(id)) => record.scratch == Some(*id),
            Self::Scratch(ScratchScope::StagedBefore(at)) => {
                record.scratch.is_some() && record.staged_at.is_some_and(|s| s < *at)
            }
        }
    }

    /// Parse a Mongo-style selection document
    pub fn parse_selection(selection: &Value) -> PipelineResult<RecordFilter> {
        match selection {
            Value::Null => Ok(RecordFilter::All),
            Value::Object(map) => parse_document(map),
            other => Err(PipelineError::validation(format!(
                "Selection filter must be an object, got {other}"
            ))),
        }
    }
}

/// Numeric value of a plain decimal string, `None` for anything else
pub fn numeric_value(s: &str) -> Option<f64> {
    let s = s.trim();
    let digits = s.strip_prefix('-').unwrap_or(s);
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };
    let int_ok = !int_part.is_empty() && int_part.bytes().all(|b| b.is_ascii_digit());
    let frac_ok = frac_part.map_or(true, |f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()));
    if int_ok && frac_ok {
        s.parse().ok()
    } else {
        None
    }
}

/// Sort order over field values.
///
/// Numbers come before everything else and compare numerically, ties broken
/// lexically; other values compare lexically. This is a total order, which
/// `sort_by` requires.
pub fn compare_values(left: &str, right: &str) -> Ordering {
    match (numeric_value(left), numeric_value(right)) {
        (Some(l), Some(r)) => l.total_cmp(&r).then_with(|| left.cmp(right)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => left.cmp(right),
    }
}

// `$gte`/`$lte` matching: numeric when both sides are numbers, lexical
// otherwise. Not a total order; never sort with it.
fn compare_for_match(value: &str, bound: &str) -> Ordering {
    match (numeric_value(value), numeric_value(bound)) {
        (Some(l), Some(r)) => l.total_cmp(&r),
        _ => value.cmp(bound),
    }
}

fn parse_document(map: &Map<String, Value>) -> PipelineResult<RecordFilter> {
    let mut filter = RecordFilter::All;
    for (key, value) in map {
        let clause = match key.as_str() {
            "$and" => RecordFilter::And(parse_clause_list(key, value)?),
            "$or" => RecordFilter::Or(parse_clause_list(key, value)?),
            "$nor" => RecordFilter::Or(parse_clause_list(key, value)?).negate(),
            op if op.starts_with('$') => {
                return Err(PipelineError::validation(format!(
                    "Unsupported selection operator: {op}"
                )))
            }
            field => parse_field(field, value)?,
        };
        filter = filter.and(clause);
    }
    Ok(filter)
}

fn parse_clause_list(op: &str, value: &Value) -> PipelineResult<Vec<RecordFilter>> {
    let items = value.as_array().ok_or_else(|| {
        PipelineError::validation(format!("{op} expects an array of selections"))
    })?;
    items.iter().map(RecordFilter::parse_selection).collect()
}

fn parse_field(field: &str, value: &Value) -> PipelineResult<RecordFilter> {
    match value {
        Value::Object(ops) if ops.keys().all(|k| k.starts_with('$')) && !ops.is_empty() => {
            let mut filter = RecordFilter::All;
            for (op, operand) in ops {
                filter = filter.and(parse_operator(field, op, operand)?);
            }
            Ok(filter)
        }
        Value::Null => Ok(RecordFilter::empty(field)),
        Value::Array(_) | Value::Object(_) => Err(PipelineError::validation(format!(
            "Unsupported value for selection field {field}"
        ))),
        scalar => Ok(RecordFilter::eq(field, scalar_string(field, scalar)?)),
    }
}

fn parse_operator(field: &str, op: &str, operand: &Value) -> PipelineResult<RecordFilter> {
    let filter = match op {
        "$eq" => RecordFilter::eq(field, scalar_string(field, operand)?),
        "$ne" => RecordFilter::ne(field, scalar_string(field, operand)?),
        "$gte" => RecordFilter::gte(field, scalar_string(field, operand)?),
        "$lte" => RecordFilter::lte(field, scalar_string(field, operand)?),
        "$gt" => RecordFilter::lte(field, scalar_string(field, operand)?).negate(),
        "$lt" => RecordFilter::gte(field, scalar_string(field, operand)?).negate(),
        "$in" | "$nin" => {
            let values = operand
                .as_array()
                .ok_or_else(|| PipelineError::validation(format!("{op} on {field} expects an array")))?
                .iter()
                .map(|v| scalar_string(field, v))
                .collect::<PipelineResult<Vec<_>>>()?;
            let filter = RecordFilter::In(field.to_string(), values);
            if op == "$nin" {
                filter.negate()
            } else {
                filter
            }
        }
        "$exists" => match operand.as_bool() {
            Some(true) => RecordFilter::not_empty(field),
            Some(false) => RecordFilter::empty(field),
            None => {
                return Err(PipelineError::validation(format!(
                    "$exists on {field} expects a boolean"
                )))
            }
        },
        "$regex" => {
            let pattern = operand.as_str().unwrap_or_default();
            match pattern.strip_prefix('^') {
                Some(prefix) if !prefix.chars().any(|c| "\\.*+?()[]{}|^$".contains(c)) => {
                    RecordFilter::starts_with(field, prefix)
                }
                _ => {
                    return Err(PipelineError::validation(format!(
                        "Only anchored literal prefixes are supported for $regex on {field}"
                    )))
                }
            }
        }
        other => {
            return Err(PipelineError::validation(format!(
                "Unsupported selection operator {other} on {field}"
            )))
        }
    };
    Ok(filter)
}

fn scalar_string(field: &str, value: &Value) -> PipelineResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        _ => Err(PipelineError::validation(format!(
            "Expected a scalar value for selection field {field}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> DatasetRecord {
        DatasetRecord::from_pairs([
            ("fieldNumber", "24000010"),
            ("county", "Benton"),
            ("year", "2024"),
            ("recordedBy", "Jane Smith"),
        ])
    }

    #[test]
    fn test_basic_predicates() {
        let r = record();
        assert!(RecordFilter::eq("county", "Benton").matches(&r));
        assert!(RecordFilter::ne("county", "Linn").matches(&r));
        assert!(RecordFilter::is_in("county", ["Linn", "Benton"]).matches(&r));
        assert!(RecordFilter::not_empty("recordedBy").matches(&r));
        assert!(RecordFilter::empty("locality").matches(&r));
        assert!(RecordFilter::starts_with("fieldNumber", "24").matches(&r));
        assert!(RecordFilter::stable().matches(&r));
        assert!(!RecordFilter::working_set(Uuid::new_v4()).matches(&r));
    }

    #[test]
    fn test_numeric_comparison_when_both_sides_are_numbers() {
        let r = record();
        assert!(RecordFilter::gte("year", "900").matches(&r));
        assert!(!RecordFilter::lte("year", "900").matches(&r));
        // lexical otherwise
        assert!(RecordFilter::gte("county", "A").matches(&r));
        assert!(!RecordFilter::gte("year", "2024").matches(&DatasetRecord::from_pairs([("county", "Lane")])));
        assert_eq!(numeric_value("1e5"), None);
        assert_eq!(numeric_value("-3.25"), Some(-3.25));
    }

    #[test]
    fn test_sort_order_puts_numbers_first() {
        assert_eq!(compare_values("10", "9"), Ordering::Greater);
        assert_eq!(compare_values("10", "1x"), Ordering::Less);
        assert_eq!(compare_values("1x", "9"), Ordering::Greater);
        assert_eq!(compare_values("1", "1.0"), Ordering::Less);
        assert_eq!(compare_values("b", "a"), Ordering::Greater);

        let mut values = vec!["1x", "10", "", "9", "Lane", "-2.5"];
        values.sort_by(|a, b| compare_values(a, b));
        assert_eq!(values, vec!["-2.5", "9", "10", "", "1x", "Lane"]);
    }

    #[test]
    fn test_parse_mongo_selection() {
        let filter = RecordFilter::parse_selection(&json!({
            "county": "Benton",
            "year": {"$gte": 2023, "$lte": 2024},
            "$or": [{"recordedBy": {"$regex": "^Jane"}}, {"sex": "f"}],
            "locality": {"$exists": false}
        }))
        .unwrap();
        assert!(filter.matches(&record()));

        let filter =
            RecordFilter::parse_selection(&json!({"county": {"$nin": ["Benton"]}})).unwrap();
        assert!(!filter.matches(&record()));

        assert_eq!(
            RecordFilter::parse_selection(&json!({})).unwrap(),
            RecordFilter::All
        );
    }

    #[test]
    fn test_malformed_selection_is_rejected() {
        assert!(RecordFilter::parse_selection(&json!([1, 2])).is_err());
        assert!(RecordFilter::parse_selection(&json!({"$where": "x"})).is_err());
        assert!(RecordFilter::parse_selection(&json!({"a": {"$in": 3}})).is_err());
        assert!(RecordFilter::parse_selection(&json!({"a": {"$regex": "a.*b"}})).is_err());
    }

    #[test]
    fn test_and_flattens_all() {
        let f = RecordFilter::All.and(RecordFilter::stable());
        assert_eq!(f, RecordFilter::stable());
        let f = RecordFilter::stable()
            .and(RecordFilter::not_empty("a"))
            .and(RecordFilter::empty("b"));
        assert!(matches!(f, RecordFilter::And(ref v) if v.len() == 3));
    }
}
