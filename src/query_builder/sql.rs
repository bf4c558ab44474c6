//! Translation of [`RecordFilter`] trees into bound PostgreSQL predicates over
//! the `dataset_records` table (`data` JSONB column plus scratch columns).
//! Field names and values are always bound parameters.

use super::filter::{numeric_value, RecordFilter, ScratchScope};
use super::pagination::{RecordQuery, SortField};
use sqlx::{Postgres, QueryBuilder};

const NUMERIC_PATTERN: &str = r"^-?[0-9]+(\.[0-9]+)?$";

fn push_field(builder: &mut QueryBuilder<'_, Postgres>, field: &str) {
    builder.push("COALESCE(data ->> ");
    builder.push_bind(field.to_string());
    builder.push(", '')");
}

/// Append the predicate for `filter`
pub fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &RecordFilter) {
    match filter {
        RecordFilter::All => {
            builder.push("TRUE");
        }
        RecordFilter::Eq(field, value) => {
            push_field(builder, field);
            builder.push(" = ");
            builder.push_bind(value.clone());
        }
        RecordFilter::Ne(field, value) => {
            push_field(builder, field);
            builder.push(" <> ");
            builder.push_bind(value.clone());
        }
        RecordFilter::In(field, values) => {
            push_field(builder, field);
            builder.push(" = ANY(");
            builder.push_bind(values.clone());
            builder.push(")");
        }
        RecordFilter::NotEmpty(field) => {
            builder.push("btrim(");
            push_field(builder, field);
            builder.push(") <> ''");
        }
        RecordFilter::Empty(field) => {
            builder.push("btrim(");
            push_field(builder, field);
            builder.push(") = ''");
        }
        RecordFilter::StartsWith(field, prefix) => {
            builder.push("starts_with(");
            push_field(builder, field);
            builder.push(", ");
            builder.push_bind(prefix.clone());
            builder.push(")");
        }
        RecordFilter::Gte(field, value) => push_comparison(builder, field, ">=", value),
        RecordFilter::Lte(field, value) => push_comparison(builder, field, "<=", value),
        RecordFilter::Ids(ids) => {
            builder.push("id = ANY(");
            builder.push_bind(ids.clone());
            builder.push(")");
        }
        RecordFilter::And(filters) => push_group(builder, filters, " AND ", "TRUE"),
        RecordFilter::Or(filters) => push_group(builder, filters, " OR ", "FALSE"),
        RecordFilter::Not(inner) => {
            builder.push("NOT (");
            push_filter(builder, inner);
            builder.push(")");
        }
        RecordFilter::Scratch(ScratchScope::Stable) => {
            builder.push("scratch IS NULL");
        }
        RecordFilter::Scratch(ScratchScope::WorkingSet(id)) => {
            builder.push("scratch = ");
            builder.push_bind(*id);
        }
        RecordFilter::Scratch(ScratchScope::StagedBefore(at)) => {
            builder.push("(scratch IS NOT NULL AND staged_at < ");
            builder.push_bind(*at);
            builder.push(")");
        }
    }
}

fn push_group(
    builder: &mut QueryBuilder<'_, Postgres>,
    filters: &[RecordFilter],
    joiner: &str,
    identity: &str,
) {
    if filters.is_empty() {
        builder.push(identity);
        return;
    }
    builder.push("(");
    for (i, filter) in filters.iter().enumerate() {
        if i > 0 {
            builder.push(joiner);
        }
        push_filter(builder, filter);
    }
    builder.push(")");
}

// Numeric when both sides are numbers, lexical otherwise
fn push_comparison(
    builder: &mut QueryBuilder<'_, Postgres>,
    field: &str,
    operator: &str,
    value: &str,
) {
    match numeric_value(value) {
        Some(number) => {
            builder.push("(CASE WHEN ");
            push_field(builder, field);
            builder.push(" ~ ");
            builder.push_bind(NUMERIC_PATTERN);
            builder.push(" THEN (");
            push_field(builder, field);
            builder.push(format!(")::numeric {operator} "));
            builder.push_bind(number);
            builder.push("::numeric ELSE ");
            push_field(builder, field);
            builder.push(format!(" {operator} "));
            builder.push_bind(value.to_string());
            builder.push(" END)");
        }
        None => {
            push_field(builder, field);
            builder.push(format!(" {operator} "));
            builder.push_bind(value.to_string());
        }
    }
}

// Same order as `compare_values`: numbers first (non-numbers sort as NULL on
// the numeric key), then bytewise text.
fn push_sort(builder: &mut QueryBuilder<'_, Postgres>, sort: &SortField) {
    let (direction, nulls) = if sort.descending {
        ("DESC", "NULLS FIRST")
    } else {
        ("ASC", "NULLS LAST")
    };
    builder.push("CASE WHEN btrim(");
    push_field(builder, &sort.field);
    builder.push(") ~ ");
    builder.push_bind(NUMERIC_PATTERN);
    builder.push(" THEN btrim(");
    push_field(builder, &sort.field);
    builder.push(format!(")::numeric END {direction} {nulls}, "));
    push_field(builder, &sort.field);
    builder.push(format!(" COLLATE \"C\" {direction}"));
}

/// Append `WHERE`, `ORDER BY`, `LIMIT` and `OFFSET` for a record query on
/// one collection
pub fn push_query_tail(
    builder: &mut QueryBuilder<'_, Postgres>,
    collection: &str,
    query: &RecordQuery,
) {
    push_where(builder, collection, &query.filter);
    builder.push(" ORDER BY ");
    for sort in &query.order {
        push_sort(builder, sort);
        builder.push(", ");
    }
    builder.push("seq ASC");
    if let Some(limit) = query.pagination.limit {
        builder.push(" LIMIT ");
        builder.push_bind(limit as i64);
    }
    if let Some(offset) = query.pagination.offset {
        builder.push(" OFFSET ");
        builder.push_bind(offset as i64);
    }
}

/// Append `WHERE collection = ... AND <filter>`
pub fn push_where(builder: &mut QueryBuilder<'_, Postgres>, collection: &str, filter: &RecordFilter) {
    builder.push(" WHERE collection = ");
    builder.push_bind(collection.to_string());
    builder.push(" AND ");
    push_filter(builder, filter);
}
