use super::filter::{compare_values, RecordFilter};
use crate::models::record::DatasetRecord;
use std::cmp::Ordering;

/// LIMIT/OFFSET window over a record query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pagination {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Pagination {
    /// Create pagination with page number (1-indexed) and per-page count
    pub fn new(page: usize, per_page: usize) -> Self {
        let offset = if page > 0 {
            Some((page - 1) * per_page)
        } else {
            None
        };
        Self {
            limit: Some(per_page),
            offset,
        }
    }

    pub fn limit_offset(limit: usize, offset: usize) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
        }
    }

    /// Calculate total pages given a total count
    pub fn total_pages(&self, total_count: usize) -> usize {
        match self.limit {
            Some(limit) if limit > 0 => total_count.div_ceil(limit),
            _ => 1,
        }
    }

    /// Apply the window to an already ordered iterator
    pub fn apply<T>(&self, items: impl Iterator<Item = T>) -> Vec<T> {
        let skipped = items.skip(self.offset.unwrap_or(0));
        match self.limit {
            Some(limit) => skipped.take(limit).collect(),
            None => skipped.collect(),
        }
    }
}

/// One ordering key. Numeric keys sort by value when every compared value
/// is a number, which keeps `"9" < "10"` for field numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub field: String,
    pub descending: bool,
}

impl SortField {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: false,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: true,
        }
    }
}

/// Compare two records on a list of sort fields
pub fn compare_records(a: &DatasetRecord, b: &DatasetRecord, order: &[SortField]) -> Ordering {
    for sort in order {
        let ordering = compare_values(a.get(&sort.field), b.get(&sort.field));
        let ordering = if sort.descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Filter, order, window and projection of a record read. Without an explicit
/// order records come back in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    pub filter: RecordFilter,
    pub order: Vec<SortField>,
    pub pagination: Pagination,
    pub projection: Option<Vec<String>>,
}

impl RecordQuery {
    pub fn new(filter: RecordFilter) -> Self {
        Self {
            filter,
            order: Vec::new(),
            pagination: Pagination::default(),
            projection: None,
        }
    }

    pub fn order_by(mut self, sort: SortField) -> Self {
        self.order.push(sort);
        self
    }

    pub fn paginate(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.pagination.limit = Some(limit);
        self
    }

    pub fn project(mut self, fields: Option<Vec<String>>) -> Self {
        self.projection = fields;
        self
    }

    /// Restrict a record's fields to the projection, if any
    pub fn apply_projection(&self, mut record: DatasetRecord) -> DatasetRecord {
        if let Some(projection) = &self.projection {
            record.fields.retain(|k, _| projection.iter().any(|p| p == k));
        }
        record
    }
}
