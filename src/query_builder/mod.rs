//! # Record Query Building
//!
//! Predicates, ordering and pagination for reads of the shared dataset.
//!
//! ## Key Components
//!
//! - [`filter`] - [`RecordFilter`] tree, in-memory evaluation, Mongo-style parsing
//! - [`pagination`] - [`RecordQuery`] with ordering, LIMIT/OFFSET and projection
//! - [`sql`] - Translation to bound PostgreSQL through `sqlx::QueryBuilder`
//!
//! ## Example Usage
//!
//! ```rust
//! use pipeline_core::query_builder::{RecordFilter, RecordQuery, SortField};
//!
//! let query = RecordQuery::new(
//!     RecordFilter::stable().and(RecordFilter::not_empty("fieldNumber")),
//! )
//! .order_by(SortField::desc("fieldNumber"))
//! .limit(1);
//! assert_eq!(query.pagination.limit, Some(1));
//! ```

pub mod filter;
pub mod pagination;
pub mod sql;

pub use filter::{compare_values, numeric_value, RecordFilter, ScratchScope};
pub use pagination::{compare_records, Pagination, RecordQuery, SortField};
