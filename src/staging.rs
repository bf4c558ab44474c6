//! # Scratch-Space Staging
//!
//! Handlers that rewrite part of the shared dataset do it in quarantine. A
//! [`WorkingSet`] is a batch of records flagged with one working-set id;
//! nothing outside the set sees those records until they are promoted.
//!
//! ```text
//! discard_abandoned ─▶ stage_* ─▶ records / update ─▶ promote ─▶ discard
//!                                                   └──── settle ────┘
//! ```
//!
//! Promotion is keyed: before a staged record is unflagged, stable records
//! sharing its key value (and the stable original it was copied from) are
//! removed, so promotion replaces rather than duplicates. Running it twice is
//! a no-op because promoted records are no longer in the set.

use crate::artifacts::csv_io;
use crate::config::ScratchConfig;
use crate::error::PipelineResult;
use crate::models::record::{Collection, DatasetRecord, WorkingSetId};
use crate::orchestration::input::ResolvedInput;
use crate::query_builder::{RecordFilter, RecordQuery};
use crate::store::{FieldMap, RecordStore};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

// Bound on values per key-deletion statement
const KEY_CHUNK: usize = 500;

/// Handle to one batch of quarantined records
#[must_use = "a working set must be promoted, settled or discarded"]
#[derive(Debug)]
pub struct WorkingSet {
    id: WorkingSetId,
    collection: Collection,
    staged: u64,
}

impl WorkingSet {
    pub fn id(&self) -> WorkingSetId {
        self.id
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Records placed in the set when it was staged
    pub fn staged(&self) -> u64 {
        self.staged
    }

    /// Filter selecting this set's records, optionally narrowed
    pub fn scope(&self, filter: RecordFilter) -> RecordFilter {
        RecordFilter::working_set(self.id).and(filter)
    }
}

#[derive(Clone)]
pub struct ScratchSpace {
    store: Arc<dyn RecordStore>,
    stale_after: chrono::Duration,
}

impl ScratchSpace {
    pub fn new(store: Arc<dyn RecordStore>, config: &ScratchConfig) -> Self {
        Self {
            store,
            stale_after: config.stale_after(),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Delete working-set records left behind by runs that never finished
    pub async fn discard_abandoned(&self, collection: Collection) -> PipelineResult<u64> {
        let cutoff = Utc::now() - self.stale_after;
        let removed = self
            .store
            .delete_many(collection, &RecordFilter::staged_before(cutoff))
            .await?;
        if removed > 0 {
            info!(collection = %collection, removed = removed, "Discarded abandoned scratch records");
        }
        Ok(removed)
    }

    /// Stage records that do not exist in the store yet (file input)
    pub async fn stage_records(
        &self,
        collection: Collection,
        records: Vec<DatasetRecord>,
    ) -> PipelineResult<WorkingSet> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let records: Vec<DatasetRecord> = records
            .into_iter()
            .map(|mut r| {
                r.id = Uuid::new_v4();
                r.scratch = Some(id);
                r.staged_at = Some(now);
                r.origin = None;
                r
            })
            .collect();
        let staged = self.store.insert_many(collection, records).await?;
        debug!(collection = %collection, working_set = %id, staged = staged, "Staged records");
        Ok(WorkingSet {
            id,
            collection,
            staged,
        })
    }

    /// Copy matching stable records into a new working set
    pub async fn stage_selection(
        &self,
        collection: Collection,
        filter: &RecordFilter,
    ) -> PipelineResult<WorkingSet> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let originals = self
            .store
            .find_all(collection, RecordFilter::stable().and(filter.clone()))
            .await?;
        let copies: Vec<DatasetRecord> = originals.iter().map(|r| r.staged_copy(id, now)).collect();
        let staged = self.store.insert_many(collection, copies).await?;
        debug!(collection = %collection, working_set = %id, staged = staged, "Staged selection");
        Ok(WorkingSet {
            id,
            collection,
            staged,
        })
    }

    /// Stage whatever a subtask's input resolved to
    pub async fn stage_input(
        &self,
        collection: Collection,
        input: &ResolvedInput,
    ) -> PipelineResult<WorkingSet> {
        match input {
            ResolvedInput::File(path) => {
                let records = csv_io::read_records(path).await?;
                self.stage_records(collection, records).await
            }
            ResolvedInput::Selection(selection) => {
                self.stage_selection(collection, &selection.filter).await
            }
            ResolvedInput::Empty => self.stage_records(collection, Vec::new()).await,
        }
    }

    /// Working-set records matching `filter`, in staging order
    pub async fn records(
        &self,
        ws: &WorkingSet,
        filter: RecordFilter,
    ) -> PipelineResult<Vec<DatasetRecord>> {
        self.store.find_all(ws.collection, ws.scope(filter)).await
    }

    pub async fn query(
        &self,
        ws: &WorkingSet,
        mut query: RecordQuery,
    ) -> PipelineResult<Vec<DatasetRecord>> {
        query.filter = ws.scope(query.filter);
        self.store.find(ws.collection, &query).await
    }

    pub async fn count(&self, ws: &WorkingSet, filter: RecordFilter) -> PipelineResult<u64> {
        self.store.count(ws.collection, &ws.scope(filter)).await
    }

    /// Add more records to an existing set
    pub async fn insert(
        &self,
        ws: &WorkingSet,
        records: Vec<DatasetRecord>,
    ) -> PipelineResult<u64> {
        let now = Utc::now();
        let records = records
            .into_iter()
            .map(|mut r| {
                r.scratch = Some(ws.id);
                r.staged_at = Some(now);
                r
            })
            .collect();
        self.store.insert_many(ws.collection, records).await
    }

    pub async fn update(&self, ws: &WorkingSet, id: Uuid, fields: FieldMap) -> PipelineResult<bool> {
        let matched = self
            .store
            .count(ws.collection, &ws.scope(RecordFilter::ids(vec![id])))
            .await?;
        if matched == 0 {
            return Ok(false);
        }
        self.store.update_fields(ws.collection, id, fields).await
    }

    pub async fn update_many(
        &self,
        ws: &WorkingSet,
        filter: RecordFilter,
        fields: FieldMap,
    ) -> PipelineResult<u64> {
        self.store
            .update_many(ws.collection, &ws.scope(filter), fields)
            .await
    }

    /// Drop working-set records matching `filter` without promoting them
    pub async fn remove(&self, ws: &WorkingSet, filter: RecordFilter) -> PipelineResult<u64> {
        self.store.delete_many(ws.collection, &ws.scope(filter)).await
    }

    /// Return matching working-set records to the stable pool, replacing
    /// stable records with the same `key` value
    pub async fn promote(
        &self,
        ws: &WorkingSet,
        filter: RecordFilter,
        key: &str,
    ) -> PipelineResult<u64> {
        let promotable = self.records(ws, filter.clone()).await?;
        if promotable.is_empty() {
            return Ok(0);
        }

        let keys: BTreeSet<String> = promotable
            .iter()
            .map(|r| r.get(key).trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        let keys: Vec<String> = keys.into_iter().collect();
        for chunk in keys.chunks(KEY_CHUNK) {
            self.store
                .delete_many(
                    ws.collection,
                    &RecordFilter::stable().and(RecordFilter::is_in(key, chunk.iter().cloned())),
                )
                .await?;
        }

        let origins: Vec<Uuid> = promotable.iter().filter_map(|r| r.origin).collect();
        for chunk in origins.chunks(KEY_CHUNK) {
            self.store
                .delete_many(
                    ws.collection,
                    &RecordFilter::stable().and(RecordFilter::ids(chunk.to_vec())),
                )
                .await?;
        }

        let promoted = self
            .store
            .clear_scratch(ws.collection, &ws.scope(filter))
            .await?;
        info!(
            collection = %ws.collection,
            working_set = %ws.id,
            promoted = promoted,
            "Promoted working set records"
        );
        Ok(promoted)
    }

    /// Delete whatever is still flagged, consuming the set
    pub async fn discard(&self, ws: WorkingSet) -> PipelineResult<u64> {
        let removed = self
            .store
            .delete_many(ws.collection, &RecordFilter::working_set(ws.id))
            .await?;
        debug!(collection = %ws.collection, working_set = %ws.id, removed = removed, "Discarded working set");
        Ok(removed)
    }

    /// Promote what passes `filter`, discard the rest
    pub async fn settle(
        &self,
        ws: WorkingSet,
        filter: RecordFilter,
        key: &str,
    ) -> PipelineResult<(u64, u64)> {
        let promoted = self.promote(&ws, filter, key).await?;
        let discarded = self.discard(ws).await?;
        Ok((promoted, discarded))
    }
}
