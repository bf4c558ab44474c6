//! Scratch-space protocol over the in-memory store.

mod common;

use common::record;
use pipeline_core::config::ScratchConfig;
use pipeline_core::models::Collection;
use pipeline_core::query_builder::RecordFilter;
use pipeline_core::staging::ScratchSpace;
use pipeline_core::store::{FieldMap, RecordStore};
use pipeline_core::testing::InMemoryRecordStore;
use std::sync::Arc;

fn scratch(store: &Arc<InMemoryRecordStore>, stale_after_seconds: i64) -> ScratchSpace {
    ScratchSpace::new(
        Arc::clone(store) as Arc<dyn RecordStore>,
        &ScratchConfig { stale_after_seconds },
    )
}

#[tokio::test]
async fn test_selection_leaves_stable_originals_untouched() {
    let store = Arc::new(InMemoryRecordStore::new());
    store
        .insert_many(
            Collection::Occurrences,
            vec![
                record(&[("fieldNumber", "1"), ("county", "Lane")]),
                record(&[("fieldNumber", "2"), ("county", "Polk")]),
            ],
        )
        .await
        .unwrap();
    let scratch = scratch(&store, 3600);

    let ws = scratch
        .stage_selection(Collection::Occurrences, &RecordFilter::eq("county", "Lane"))
        .await
        .unwrap();
    assert_eq!(ws.staged(), 1);

    let staged = scratch.records(&ws, RecordFilter::All).await.unwrap();
    scratch
        .update(
            &ws,
            staged[0].id,
            FieldMap::from([("county".to_string(), "Linn".to_string())]),
        )
        .await
        .unwrap();

    // the stable copy keeps its value until promotion
    let stable = store.stable(Collection::Occurrences);
    assert!(stable.iter().any(|r| r.get("county") == "Lane"));

    let (promoted, discarded) = scratch
        .settle(ws, RecordFilter::All, "fieldNumber")
        .await
        .unwrap();
    assert_eq!((promoted, discarded), (1, 0));

    let stable = store.stable(Collection::Occurrences);
    assert_eq!(stable.len(), 2);
    let one = stable.iter().find(|r| r.get("fieldNumber") == "1").unwrap();
    assert_eq!(one.get("county"), "Linn");
}

#[tokio::test]
async fn test_promote_twice_is_a_no_op() {
    let store = Arc::new(InMemoryRecordStore::new());
    let scratch = scratch(&store, 3600);
    let ws = scratch
        .stage_records(
            Collection::Occurrences,
            vec![
                record(&[("fieldNumber", "1")]),
                record(&[("fieldNumber", "2")]),
                record(&[("errorFlags", "date")]),
            ],
        )
        .await
        .unwrap();

    let filter = RecordFilter::not_empty("fieldNumber");
    let first = scratch.promote(&ws, filter.clone(), "fieldNumber").await.unwrap();
    let second = scratch.promote(&ws, filter, "fieldNumber").await.unwrap();
    assert_eq!(first, 2);
    assert_eq!(second, 0);
    assert_eq!(store.stable(Collection::Occurrences).len(), 2);

    assert_eq!(scratch.discard(ws).await.unwrap(), 1);
    assert_eq!(store.all(Collection::Occurrences).len(), 2);
}

#[tokio::test]
async fn test_concurrent_working_sets_are_isolated() {
    let store = Arc::new(InMemoryRecordStore::new());
    let scratch = scratch(&store, 3600);

    let (a, b) = tokio::join!(
        scratch.stage_records(Collection::Occurrences, vec![record(&[("fieldNumber", "1")])]),
        scratch.stage_records(
            Collection::Occurrences,
            vec![record(&[("fieldNumber", "2")]), record(&[("fieldNumber", "3")])],
        ),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.id(), b.id());

    // a fresh run's cleanup does not reach live sets
    assert_eq!(
        scratch.discard_abandoned(Collection::Occurrences).await.unwrap(),
        0
    );
    assert_eq!(scratch.count(&a, RecordFilter::All).await.unwrap(), 1);
    assert_eq!(scratch.count(&b, RecordFilter::All).await.unwrap(), 2);

    scratch.discard(a).await.unwrap();
    assert_eq!(scratch.count(&b, RecordFilter::All).await.unwrap(), 2);
    scratch.settle(b, RecordFilter::All, "fieldNumber").await.unwrap();
    assert_eq!(store.stable(Collection::Occurrences).len(), 2);
}

#[tokio::test]
async fn test_abandoned_sets_are_cleaned_up() {
    let store = Arc::new(InMemoryRecordStore::new());
    // every set is immediately stale
    let eager = scratch(&store, -1);
    let abandoned = eager
        .stage_records(Collection::Determinations, vec![record(&[("fieldNumber", "9")])])
        .await
        .unwrap();
    std::mem::drop(abandoned);

    let removed = eager
        .discard_abandoned(Collection::Determinations)
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(store.all(Collection::Determinations).is_empty());
}

#[tokio::test]
async fn test_promotion_replaces_stable_records_by_key() {
    let store = Arc::new(InMemoryRecordStore::new());
    store
        .insert_many(
            Collection::Occurrences,
            vec![record(&[("fieldNumber", "24000001"), ("sex", "f")])],
        )
        .await
        .unwrap();
    let scratch = scratch(&store, 3600);
    let ws = scratch
        .stage_records(
            Collection::Occurrences,
            vec![record(&[("fieldNumber", "24000001"), ("sex", "m")])],
        )
        .await
        .unwrap();
    scratch.settle(ws, RecordFilter::All, "fieldNumber").await.unwrap();

    let stable = store.stable(Collection::Occurrences);
    assert_eq!(stable.len(), 1);
    assert_eq!(stable[0].get("sex"), "m");
}
