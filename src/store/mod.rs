//! # Record Store
//!
//! The shared dataset seam. Handlers talk to [`RecordStore`]; production uses
//! [`PgRecordStore`], tests use `testing::InMemoryRecordStore`. Both evaluate
//! the same [`RecordFilter`] semantics.

pub mod postgres;

use crate::error::PipelineResult;
use crate::models::record::{Collection, DatasetRecord};
use crate::query_builder::{RecordFilter, RecordQuery};
use async_trait::async_trait;
use std::collections::BTreeMap;
use uuid::Uuid;

pub use postgres::PgRecordStore;

/// Field updates applied by a merge (`data = data || fields`)
pub type FieldMap = BTreeMap<String, String>;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find(
        &self,
        collection: Collection,
        query: &RecordQuery,
    ) -> PipelineResult<Vec<DatasetRecord>>;

    async fn count(&self, collection: Collection, filter: &RecordFilter) -> PipelineResult<u64>;

    async fn insert_many(
        &self,
        collection: Collection,
        records: Vec<DatasetRecord>,
    ) -> PipelineResult<u64>;

    /// Merge `fields` into one record. Returns whether the record existed.
    async fn update_fields(
        &self,
        collection: Collection,
        id: Uuid,
        fields: FieldMap,
    ) -> PipelineResult<bool>;

    /// Replace all fields of one record
    async fn replace(
        &self,
        collection: Collection,
        id: Uuid,
        fields: FieldMap,
    ) -> PipelineResult<bool>;

    /// Merge `fields` into every matching record
    async fn update_many(
        &self,
        collection: Collection,
        filter: &RecordFilter,
        fields: FieldMap,
    ) -> PipelineResult<u64>;

    async fn delete_many(&self, collection: Collection, filter: &RecordFilter)
        -> PipelineResult<u64>;

    /// Return matching records to the stable pool
    async fn clear_scratch(
        &self,
        collection: Collection,
        filter: &RecordFilter,
    ) -> PipelineResult<u64>;

    /// Convenience: all matching records in insertion order
    async fn find_all(
        &self,
        collection: Collection,
        filter: RecordFilter,
    ) -> PipelineResult<Vec<DatasetRecord>> {
        self.find(collection, &RecordQuery::new(filter)).await
    }
}
