//! Cascading upsert tests: idempotence, stage equivalence, chunk
//! escalation, and terminal failure accounting.

use std::sync::Arc;

use chrono::Utc;

use solana_batch_engine::app::BalanceUpsertEngine;
use solana_batch_engine::domain::{BalanceKey, BalanceRecord};
use solana_batch_engine::test_utils::MockBalanceStore;

const CHUNK: usize = 100;

fn record(index: usize, raw: u64) -> BalanceRecord {
    BalanceRecord::new(format!("owner-{index}"), "mint-A", raw, 6, 500, Utc::now())
}

fn records(count: usize) -> Vec<BalanceRecord> {
    (0..count).map(|i| record(i, (i as u64 + 1) * 10)).collect()
}

fn engine(store: &Arc<MockBalanceStore>) -> BalanceUpsertEngine {
    BalanceUpsertEngine::with_chunk_size(Arc::clone(store) as _, CHUNK)
}

#[tokio::test]
async fn test_bulk_upsert_clean_path() {
    let store = Arc::new(MockBalanceStore::new());
    let summary = engine(&store).upsert_balances(records(250)).await.unwrap();

    assert_eq!(summary.success_count, 250);
    assert_eq!(summary.failure_count, 0);
    assert!(summary.failed_keys.is_empty());
    assert_eq!(store.len(), 250);
    // 250 records at chunk size 100: three conflict-aware statements, no
    // fallback traffic.
    assert_eq!(store.upsert_batch_calls(), 3);
    assert_eq!(store.fetch_existing_calls(), 0);
    assert_eq!(store.single_row_writes(), 0);
}

#[tokio::test]
async fn test_upsert_is_idempotent() {
    let store = Arc::new(MockBalanceStore::new());
    let engine = engine(&store);
    let batch = records(50);

    let first = engine.upsert_balances(batch.clone()).await.unwrap();
    let after_first = store.snapshot();
    let second = engine.upsert_balances(batch).await.unwrap();
    let after_second = store.snapshot();

    assert_eq!(first.success_count, 50);
    assert_eq!(second.success_count, 50);
    assert_eq!(store.len(), 50);
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn test_empty_batch_touches_nothing() {
    let store = Arc::new(MockBalanceStore::new());
    let summary = engine(&store).upsert_balances(vec![]).await.unwrap();

    assert_eq!(summary.success_count, 0);
    assert_eq!(summary.failure_count, 0);
    assert_eq!(store.upsert_batch_calls(), 0);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_unreachable_store_fails_the_whole_call() {
    let store = Arc::new(MockBalanceStore::new());
    store.set_healthy(false);

    let result = engine(&store).upsert_balances(records(10)).await;
    assert!(result.is_err());
    assert_eq!(store.upsert_batch_calls(), 0);
}

#[tokio::test]
async fn test_missing_constraint_falls_back_to_split_stage() {
    let store = Arc::new(MockBalanceStore::new());
    store.fail_upsert_batch();

    let summary = engine(&store).upsert_balances(records(250)).await.unwrap();

    assert_eq!(summary.success_count, 250);
    assert_eq!(summary.failure_count, 0);
    assert_eq!(store.len(), 250);
    // The first bulk chunk reveals the missing constraint; no further bulk
    // attempts are made.
    assert_eq!(store.upsert_batch_calls(), 1);
    // All records were absent: three existence queries, three batch inserts,
    // no update transactions.
    assert_eq!(store.fetch_existing_calls(), 3);
    assert_eq!(store.insert_batch_calls(), 3);
    assert_eq!(store.update_chunk_calls(), 0);
}

#[tokio::test]
async fn test_chunk_transaction_failure_escalates_only_that_chunk() {
    // 250 pre-existing records, chunk size 100, bulk stage forced to fail:
    // the split stage sees three all-update chunks. Poisoning chunk 2 rolls
    // back only its transaction; chunks 1 and 3 stay split-stage successes.
    let store = Arc::new(MockBalanceStore::new());
    let initial = records(250);
    store.seed(initial.clone());
    store.fail_upsert_batch();
    store.fail_chunk_containing_owner("owner-150");

    let refreshed: Vec<BalanceRecord> = initial
        .iter()
        .map(|r| {
            BalanceRecord::new(r.owner.clone(), r.mint.clone(), r.raw_amount + 1, 6, 600, Utc::now())
        })
        .collect();

    let summary = engine(&store).upsert_balances(refreshed).await.unwrap();

    assert_eq!(summary.success_count, 250);
    assert_eq!(summary.failure_count, 0);
    // Three chunks processed by the split stage.
    assert_eq!(store.fetch_existing_calls(), 3);
    assert_eq!(store.update_chunk_calls(), 3);
    // Only chunk 2's 100 records fell through to per-record writes.
    assert_eq!(store.single_row_writes(), 100);
    // Every record carries the refreshed observation.
    for (_, stored) in store.snapshot() {
        assert_eq!(stored.slot, 600);
    }
}

#[tokio::test]
async fn test_existence_query_failure_degrades_to_per_record_reads() {
    let store = Arc::new(MockBalanceStore::new());
    store.seed(records(20));
    store.fail_upsert_batch();
    store.fail_fetch_existing();

    // 20 existing records plus 30 new ones.
    let mut batch = records(50);
    for record in batch.iter_mut().skip(20) {
        record.slot = 600;
    }

    let summary = engine(&store).upsert_balances(batch).await.unwrap();

    assert_eq!(summary.success_count, 50);
    assert_eq!(summary.failure_count, 0);
    assert_eq!(store.len(), 50);
    // Existence resolved per record, then the usual insert/update split.
    assert_eq!(store.insert_batch_calls(), 1);
    assert_eq!(store.update_chunk_calls(), 1);
}

#[tokio::test]
async fn test_stage_equivalence_converges_to_identical_state() {
    // The same input batch must produce the same stored state whether the
    // bulk stage succeeds, the split stage handles it, or everything
    // cascades to per-record writes.
    let batch = records(120);

    let clean = Arc::new(MockBalanceStore::new());
    engine(&clean).upsert_balances(batch.clone()).await.unwrap();

    let no_constraint = Arc::new(MockBalanceStore::new());
    no_constraint.fail_upsert_batch();
    engine(&no_constraint)
        .upsert_balances(batch.clone())
        .await
        .unwrap();

    let fully_degraded = Arc::new(MockBalanceStore::new());
    fully_degraded.fail_upsert_batch();
    fully_degraded.fail_fetch_existing();
    fully_degraded.fail_insert_batch();
    engine(&fully_degraded)
        .upsert_balances(batch)
        .await
        .unwrap();

    assert_eq!(clean.snapshot(), no_constraint.snapshot());
    assert_eq!(clean.snapshot(), fully_degraded.snapshot());
    // The degraded store really did take the per-record path.
    assert_eq!(fully_degraded.single_row_writes(), 120);
}

#[tokio::test]
async fn test_record_exhausting_every_stage_is_reported_failed() {
    let store = Arc::new(MockBalanceStore::new());
    store.fail_upsert_batch();
    store.fail_insert_batch();
    let poisoned = BalanceKey::new("owner-3", "mint-A");
    store.fail_writes_for(poisoned.clone());

    let summary = engine(&store).upsert_balances(records(10)).await.unwrap();

    assert_eq!(summary.success_count, 9);
    assert_eq!(summary.failure_count, 1);
    assert_eq!(summary.failed_keys, vec![poisoned.clone()]);
    assert!(store.snapshot().get(&poisoned).is_none());
}

#[tokio::test]
async fn test_duplicate_keys_collapse_to_highest_slot() {
    let store = Arc::new(MockBalanceStore::new());
    let older = BalanceRecord::new("owner-0", "mint-A", 10, 6, 500, Utc::now());
    let newer = BalanceRecord::new("owner-0", "mint-A", 99, 6, 700, Utc::now());

    let summary = engine(&store)
        .upsert_balances(vec![newer.clone(), older])
        .await
        .unwrap();

    assert_eq!(summary.success_count, 1);
    assert_eq!(store.len(), 1);
    let stored = store
        .snapshot()
        .get(&BalanceKey::new("owner-0", "mint-A"))
        .cloned()
        .unwrap();
    assert_eq!(stored.raw_amount, 99);
    assert_eq!(stored.slot, 700);
}
