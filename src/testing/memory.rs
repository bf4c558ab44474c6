//! In-memory task repository, record store and work queue.

use crate::error::{PipelineError, PipelineResult};
use crate::messaging::{MessagingError, MessagingResult, QueueMessage, WorkQueue};
use crate::models::record::{Collection, DatasetRecord};
use crate::models::task::Task;
use crate::query_builder::{compare_records, RecordFilter, RecordQuery};
use crate::repository::{TaskRepository, TaskUpdate};
use crate::store::{FieldMap, RecordStore};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use uuid::Uuid;

/// Task documents held in a concurrent map
#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    tasks: DashMap<Uuid, Task>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a stored task
    pub fn snapshot(&self, id: Uuid) -> Option<Task> {
        self.tasks.get(&id).map(|t| t.clone())
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn find_by_id(&self, id: Uuid) -> PipelineResult<Option<Task>> {
        Ok(self.snapshot(id))
    }

    async fn insert(&self, task: &Task) -> PipelineResult<()> {
        self.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn update(&self, id: Uuid, update: TaskUpdate) -> PipelineResult<()> {
        let mut entry = self
            .tasks
            .get_mut(&id)
            .ok_or_else(|| PipelineError::not_found("Task", id))?;
        // apply to a copy so a rejected update leaves the document untouched
        let mut task = entry.clone();
        update.apply(&mut task)?;
        *entry = task;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredRecord {
    collection: Collection,
    record: DatasetRecord,
}

/// Dataset records in insertion order, evaluated with the same filter and
/// ordering rules as the SQL backend
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<Vec<StoredRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record of a collection, stable and staged
    pub fn all(&self, collection: Collection) -> Vec<DatasetRecord> {
        self.records
            .read()
            .iter()
            .filter(|s| s.collection == collection)
            .map(|s| s.record.clone())
            .collect()
    }

    pub fn stable(&self, collection: Collection) -> Vec<DatasetRecord> {
        self.all(collection)
            .into_iter()
            .filter(DatasetRecord::is_stable)
            .collect()
    }

    fn for_each_match(
        &self,
        collection: Collection,
        filter: &RecordFilter,
        mut apply: impl FnMut(&mut DatasetRecord),
    ) -> u64 {
        let mut affected = 0;
        for stored in self.records.write().iter_mut() {
            if stored.collection == collection && filter.matches(&stored.record) {
                apply(&mut stored.record);
                affected += 1;
            }
        }
        affected
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find(
        &self,
        collection: Collection,
        query: &RecordQuery,
    ) -> PipelineResult<Vec<DatasetRecord>> {
        let mut matching: Vec<DatasetRecord> = self
            .records
            .read()
            .iter()
            .filter(|s| s.collection == collection && query.filter.matches(&s.record))
            .map(|s| s.record.clone())
            .collect();
        if !query.order.is_empty() {
            matching.sort_by(|a, b| compare_records(a, b, &query.order));
        }
        Ok(query
            .pagination
            .apply(matching.into_iter())
            .into_iter()
            .map(|r| query.apply_projection(r))
            .collect())
    }

    async fn count(&self, collection: Collection, filter: &RecordFilter) -> PipelineResult<u64> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|s| s.collection == collection && filter.matches(&s.record))
            .count() as u64)
    }

    async fn insert_many(
        &self,
        collection: Collection,
        records: Vec<DatasetRecord>,
    ) -> PipelineResult<u64> {
        let inserted = records.len() as u64;
        self.records.write().extend(
            records
                .into_iter()
                .map(|record| StoredRecord { collection, record }),
        );
        Ok(inserted)
    }

    async fn update_fields(
        &self,
        collection: Collection,
        id: Uuid,
        fields: FieldMap,
    ) -> PipelineResult<bool> {
        let updated = self.for_each_match(collection, &RecordFilter::ids(vec![id]), |r| {
            r.fields.extend(fields.clone());
        });
        Ok(updated > 0)
    }

    async fn replace(
        &self,
        collection: Collection,
        id: Uuid,
        fields: FieldMap,
    ) -> PipelineResult<bool> {
        let replaced = self.for_each_match(collection, &RecordFilter::ids(vec![id]), |r| {
            r.fields = fields.clone();
        });
        Ok(replaced > 0)
    }

    async fn update_many(
        &self,
        collection: Collection,
        filter: &RecordFilter,
        fields: FieldMap,
    ) -> PipelineResult<u64> {
        Ok(self.for_each_match(collection, filter, |r| r.fields.extend(fields.clone())))
    }

    async fn delete_many(
        &self,
        collection: Collection,
        filter: &RecordFilter,
    ) -> PipelineResult<u64> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|s| !(s.collection == collection && filter.matches(&s.record)));
        Ok((before - records.len()) as u64)
    }

    async fn clear_scratch(
        &self,
        collection: Collection,
        filter: &RecordFilter,
    ) -> PipelineResult<u64> {
        Ok(self.for_each_match(collection, filter, |r| {
            r.scratch = None;
            r.staged_at = None;
            r.origin = None;
        }))
    }
}

/// Queue with visibility semantics close enough to pgmq for consumer tests
#[derive(Debug, Default)]
pub struct InMemoryWorkQueue {
    queues: Mutex<HashMap<String, VecDeque<QueueMessage>>>,
    in_flight: Mutex<HashSet<i64>>,
    next_id: AtomicI64,
    fail_acknowledge: AtomicBool,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `acknowledge` fail
    pub fn fail_acknowledgements(&self, fail: bool) {
        self.fail_acknowledge.store(fail, Ordering::SeqCst);
    }

    /// Messages waiting to be received
    pub fn pending(&self, queue_name: &str) -> usize {
        self.queues.lock().get(queue_name).map_or(0, VecDeque::len)
    }

    /// Messages received but not yet acknowledged
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn ensure_queue(&self, queue_name: &str) -> MessagingResult<()> {
        self.queues.lock().entry(queue_name.to_string()).or_default();
        Ok(())
    }

    async fn receive(
        &self,
        queue_name: &str,
        _visibility_timeout_seconds: i32,
    ) -> MessagingResult<Option<QueueMessage>> {
        let mut queues = self.queues.lock();
        let queue = queues.get_mut(queue_name).ok_or_else(|| {
            MessagingError::queue_operation(queue_name, "receive", "queue does not exist")
        })?;
        let Some(mut message) = queue.pop_front() else {
            return Ok(None);
        };
        message.read_count += 1;
        self.in_flight.lock().insert(message.msg_id);
        Ok(Some(message))
    }

    async fn acknowledge(&self, queue_name: &str, msg_id: i64) -> MessagingResult<()> {
        if self.fail_acknowledge.load(Ordering::SeqCst) {
            return Err(MessagingError::queue_operation(
                queue_name,
                "delete",
                "acknowledgement rejected",
            ));
        }
        self.in_flight.lock().remove(&msg_id);
        Ok(())
    }

    async fn publish(&self, queue_name: &str, payload: &serde_json::Value) -> MessagingResult<i64> {
        let msg_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.queues
            .lock()
            .entry(queue_name.to_string())
            .or_default()
            .push_back(QueueMessage {
                msg_id,
                read_count: 0,
                payload: payload.clone(),
            });
        Ok(msg_id)
    }
}
