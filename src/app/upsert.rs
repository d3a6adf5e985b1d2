//! Cascading batch persistence for balance observations.
//!
//! Writes degrade through three strategies: one conflict-aware bulk upsert,
//! then an existence-check-and-split pass with chunk-scoped update
//! transactions, then unconditional per-record read-then-write. A stage is
//! entered only when the previous one reports a hard failure, and every
//! record reaches exactly one terminal state per invocation.

use std::collections::{HashMap, HashSet, hash_map::Entry};
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::domain::{AppError, BalanceKey, BalanceRecord, BalanceStore, UpsertSummary};

/// Upper bound on the rows touched by any single statement, existence
/// query, or chunk transaction.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpsertStage {
    Bulk,
    SplitAndBatch,
    PerRecord,
}

/// Engine applying the cascade against a [`BalanceStore`].
pub struct BalanceUpsertEngine {
    store: Arc<dyn BalanceStore>,
    chunk_size: usize,
}

impl BalanceUpsertEngine {
    #[must_use]
    pub fn new(store: Arc<dyn BalanceStore>) -> Self {
        Self::with_chunk_size(store, DEFAULT_CHUNK_SIZE)
    }

    #[must_use]
    pub fn with_chunk_size(store: Arc<dyn BalanceStore>, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Upsert a batch of balance observations.
    ///
    /// Returns `Err` only when the store is entirely unreachable before any
    /// write is attempted; per-record failures are reported in the summary.
    /// Duplicate (owner, mint) keys are collapsed first, highest slot wins.
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub async fn upsert_balances(
        &self,
        records: Vec<BalanceRecord>,
    ) -> Result<UpsertSummary, AppError> {
        if records.is_empty() {
            return Ok(UpsertSummary::default());
        }

        self.store.health_check().await?;

        let records = collapse_duplicates(records);
        let mut succeeded: Vec<BalanceKey> = Vec::with_capacity(records.len());
        let mut failed: Vec<BalanceKey> = Vec::new();
        let mut pending = records;
        let mut stage = UpsertStage::Bulk;

        loop {
            match stage {
                UpsertStage::Bulk => {
                    let (ok, remaining) = self.bulk_stage(pending).await;
                    succeeded.extend(ok);
                    pending = remaining;
                    if pending.is_empty() {
                        break;
                    }
                    stage = UpsertStage::SplitAndBatch;
                }
                UpsertStage::SplitAndBatch => {
                    let (ok, remaining) = self.split_stage(pending).await;
                    succeeded.extend(ok);
                    pending = remaining;
                    if pending.is_empty() {
                        break;
                    }
                    stage = UpsertStage::PerRecord;
                }
                UpsertStage::PerRecord => {
                    let (ok, bad) = self.per_record_stage(pending).await;
                    succeeded.extend(ok);
                    failed.extend(bad);
                    break;
                }
            }
        }

        if !failed.is_empty() {
            warn!(
                failed = failed.len(),
                "balance records exhausted every write strategy"
            );
        }

        Ok(UpsertSummary {
            success_count: succeeded.len(),
            failure_count: failed.len(),
            failed_keys: failed,
        })
    }

    /// Conflict-aware bulk upsert, chunked. The first failing chunk ends the
    /// stage: that chunk and everything not yet attempted cascade, since a
    /// hard failure (typically a missing uniqueness guarantee) recurs for
    /// every remaining chunk.
    async fn bulk_stage(
        &self,
        records: Vec<BalanceRecord>,
    ) -> (Vec<BalanceKey>, Vec<BalanceRecord>) {
        let mut succeeded = Vec::new();
        let mut remaining = Vec::new();
        let mut chunks = chunked(records, self.chunk_size).into_iter();

        for chunk in chunks.by_ref() {
            match self.store.upsert_batch(&chunk).await {
                Ok(()) => succeeded.extend(chunk.iter().map(BalanceRecord::key)),
                Err(e) => {
                    warn!(error = %e, "bulk upsert failed; splitting batch");
                    remaining.extend(chunk);
                    break;
                }
            }
        }
        remaining.extend(chunks.flatten());

        (succeeded, remaining)
    }

    /// Per chunk: one existence query, batch-insert the absent rows, apply
    /// updates inside a chunk-scoped transaction. A rolled-back (or
    /// unopenable) transaction sends the chunk's updates onward; atomicity
    /// is never silently downgraded to untransacted updates.
    async fn split_stage(
        &self,
        records: Vec<BalanceRecord>,
    ) -> (Vec<BalanceKey>, Vec<BalanceRecord>) {
        let mut succeeded = Vec::new();
        let mut remaining = Vec::new();

        for chunk in chunked(records, self.chunk_size) {
            let keys: Vec<BalanceKey> = chunk.iter().map(BalanceRecord::key).collect();
            let mut inserts = Vec::new();
            let mut updates = Vec::new();

            match self.store.fetch_existing(&keys).await {
                Ok(existing) => {
                    let existing: HashSet<BalanceKey> = existing.into_iter().collect();
                    for record in chunk {
                        if existing.contains(&record.key()) {
                            updates.push(record);
                        } else {
                            inserts.push(record);
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "existence query failed; resolving per record");
                    for record in chunk {
                        match self.store.get(&record.key()).await {
                            Ok(Some(_)) => updates.push(record),
                            Ok(None) => inserts.push(record),
                            Err(_) => remaining.push(record),
                        }
                    }
                }
            }

            if !inserts.is_empty() {
                match self.store.insert_batch(&inserts).await {
                    Ok(()) => succeeded.extend(inserts.iter().map(BalanceRecord::key)),
                    Err(e) => {
                        warn!(error = %e, count = inserts.len(), "batch insert failed");
                        remaining.extend(inserts);
                    }
                }
            }

            if !updates.is_empty() {
                match self.store.update_chunk(&updates).await {
                    Ok(()) => succeeded.extend(updates.iter().map(BalanceRecord::key)),
                    Err(e) => {
                        warn!(
                            error = %e,
                            count = updates.len(),
                            "chunk update transaction rolled back"
                        );
                        remaining.extend(updates);
                    }
                }
            }
        }

        (succeeded, remaining)
    }

    /// Last resort: unconditional read-then-write per record. Whatever fails
    /// here is terminally failed.
    async fn per_record_stage(
        &self,
        records: Vec<BalanceRecord>,
    ) -> (Vec<BalanceKey>, Vec<BalanceKey>) {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();

        for record in records {
            let key = record.key();
            let result = match self.store.get(&key).await {
                Ok(Some(_)) => self.store.update_one(&record).await,
                Ok(None) => self.store.insert_one(&record).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => succeeded.push(key),
                Err(e) => {
                    debug!(key = %key, error = %e, "per-record write failed");
                    failed.push(key);
                }
            }
        }

        (succeeded, failed)
    }
}

/// Keep one record per (owner, mint) at its first-occurrence position; the
/// observation from the highest slot wins, later elements win ties.
fn collapse_duplicates(records: Vec<BalanceRecord>) -> Vec<BalanceRecord> {
    let mut positions: HashMap<BalanceKey, usize> = HashMap::with_capacity(records.len());
    let mut collapsed: Vec<BalanceRecord> = Vec::with_capacity(records.len());
    for record in records {
        match positions.entry(record.key()) {
            Entry::Occupied(entry) => {
                let position = *entry.get();
                if record.slot >= collapsed[position].slot {
                    collapsed[position] = record;
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(collapsed.len());
                collapsed.push(record);
            }
        }
    }
    collapsed
}

fn chunked<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let mut chunks = Vec::with_capacity(items.len().div_ceil(size.max(1)));
    let mut iter = items.into_iter();
    loop {
        let chunk: Vec<T> = iter.by_ref().take(size.max(1)).collect();
        if chunk.is_empty() {
            break;
        }
        chunks.push(chunk);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(owner: &str, mint: &str, raw: u64, slot: u64) -> BalanceRecord {
        BalanceRecord::new(owner, mint, raw, 6, slot, Utc::now())
    }

    #[test]
    fn test_chunked_partition_sizes() {
        let chunks = chunked((0..250).collect::<Vec<_>>(), 100);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 100);
        assert_eq!(chunks[1].len(), 100);
        assert_eq!(chunks[2].len(), 50);

        assert!(chunked(Vec::<u32>::new(), 100).is_empty());

        let exact = chunked((0..200).collect::<Vec<_>>(), 100);
        assert_eq!(exact.len(), 2);
    }

    #[test]
    fn test_collapse_duplicates_highest_slot_wins() {
        let collapsed = collapse_duplicates(vec![
            record("owner", "mint", 10, 5),
            record("owner", "mint", 20, 9),
            record("owner", "mint", 30, 7),
        ]);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].raw_amount, 20);
        assert_eq!(collapsed[0].slot, 9);
    }

    #[test]
    fn test_collapse_duplicates_ties_prefer_later_element() {
        let collapsed = collapse_duplicates(vec![
            record("owner", "mint", 10, 5),
            record("owner", "mint", 20, 5),
        ]);
        assert_eq!(collapsed[0].raw_amount, 20);
    }

    #[test]
    fn test_collapse_preserves_first_occurrence_order() {
        let collapsed = collapse_duplicates(vec![
            record("a", "mint", 1, 1),
            record("b", "mint", 2, 1),
            record("a", "mint", 3, 9),
            record("c", "mint", 4, 1),
        ]);
        let owners: Vec<&str> = collapsed.iter().map(|r| r.owner.as_str()).collect();
        assert_eq!(owners, ["a", "b", "c"]);
        assert_eq!(collapsed[0].raw_amount, 3);
    }

    #[test]
    fn test_collapse_keeps_distinct_keys() {
        let collapsed = collapse_duplicates(vec![
            record("a", "mint", 1, 1),
            record("b", "mint", 2, 1),
            record("a", "other", 3, 1),
        ]);
        assert_eq!(collapsed.len(), 3);
    }
}
