//! # Field Numbers
//!
//! Human-readable occurrence identifiers: a two-character year prefix
//! followed by a zero-padded sequence, e.g. `24000041`. Incrementing keeps
//! the prefix and the suffix width; when the suffix overflows its width the
//! width grows (`24999999` becomes `241000000`).

use crate::error::{PipelineError, PipelineResult};
use crate::models::record::{fields, Collection};
use crate::query_builder::{numeric_value, RecordFilter, RecordQuery, SortField};
use crate::store::RecordStore;
use chrono::Datelike;

const PREFIX_LEN: usize = 2;
const SUFFIX_WIDTH: usize = 6;

/// The field number after `field_number`
pub fn increment(field_number: &str) -> PipelineResult<String> {
    let field_number = field_number.trim();
    let (prefix, suffix) = split(field_number)?;
    let next = suffix
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_add(1))
        .ok_or_else(|| {
            PipelineError::validation(format!("Field number {field_number} cannot be incremented"))
        })?;
    Ok(format!("{prefix}{next:0width$}", width = suffix.len()))
}

fn split(field_number: &str) -> PipelineResult<(&str, &str)> {
    if !field_number.is_ascii() || field_number.len() <= PREFIX_LEN {
        return Err(PipelineError::validation(format!(
            "Malformed field number: {field_number:?}"
        )));
    }
    let (prefix, suffix) = field_number.split_at(PREFIX_LEN);
    if !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PipelineError::validation(format!(
            "Field number {field_number} has a non-numeric suffix"
        )));
    }
    Ok((prefix, suffix))
}

/// Two-digit year prefix, e.g. `"24"` for 2024
pub fn year_prefix(year: i32) -> String {
    format!("{:02}", year.rem_euclid(100))
}

/// First number of a year with no numbers yet
pub fn first_for_prefix(prefix: &str) -> String {
    format!("{prefix}{:0width$}", 1, width = SUFFIX_WIDTH)
}

/// Highest stable field number carrying `prefix`, compared numerically
pub async fn highest_with_prefix(
    store: &dyn RecordStore,
    collection: Collection,
    prefix: &str,
) -> PipelineResult<Option<String>> {
    let query = RecordQuery::new(
        RecordFilter::stable().and(RecordFilter::starts_with(fields::FIELD_NUMBER, prefix)),
    )
    .order_by(SortField::desc(fields::FIELD_NUMBER))
    .project(Some(vec![fields::FIELD_NUMBER.to_string()]));

    let candidates = store.find(collection, &query).await?;
    Ok(candidates
        .iter()
        .map(|r| r.get(fields::FIELD_NUMBER).trim())
        .find(|n| numeric_value(n).is_some() && split(n).is_ok())
        .map(str::to_string))
}

/// Hands out consecutive field numbers
#[derive(Debug, Clone)]
pub struct FieldNumberSequence {
    next: String,
}

impl FieldNumberSequence {
    /// Continue after the highest stable number of the current year
    pub async fn for_current_year(
        store: &dyn RecordStore,
        collection: Collection,
    ) -> PipelineResult<Self> {
        let prefix = year_prefix(chrono::Utc::now().year());
        Self::continuing(highest_with_prefix(store, collection, &prefix).await?, &prefix)
    }

    pub fn continuing(highest: Option<String>, prefix: &str) -> PipelineResult<Self> {
        let next = match highest {
            Some(highest) => increment(&highest)?,
            None => first_for_prefix(prefix),
        };
        Ok(Self { next })
    }

    pub fn next_number(&mut self) -> PipelineResult<String> {
        let following = increment(&self.next)?;
        Ok(std::mem::replace(&mut self.next, following))
    }
}
