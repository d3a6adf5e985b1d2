//! Mock implementations for testing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use solana_sdk::signature::Keypair;

use crate::domain::{
    AppError, BalanceKey, BalanceRecord, BalanceStore, BlockchainError, DatabaseError, KeyResolver,
    OperationClient, SignerError,
};

/// Deterministic 32-byte Base58 address for tests.
#[must_use]
pub fn test_address(seed: u8) -> String {
    bs58::encode([seed; 32]).into_string()
}

/// Mock operation client with per-key fault injection and optional latency.
pub struct MockOperationClient {
    /// Destinations (transfers) or owners (fetches) whose calls fail
    fail_keys: Mutex<HashSet<String>>,
    delay: Mutex<Duration>,
    calls: Mutex<Vec<String>>,
    is_healthy: AtomicBool,
    /// Preset balances per owner; owners without a preset synthesize one
    /// record per requested mint
    balances: Mutex<HashMap<String, Vec<BalanceRecord>>>,
    sequence: AtomicUsize,
}

impl MockOperationClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            fail_keys: Mutex::new(HashSet::new()),
            delay: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
            is_healthy: AtomicBool::new(true),
            balances: Mutex::new(HashMap::new()),
            sequence: AtomicUsize::new(0),
        }
    }

    /// Force failures for calls targeting `key` (a destination address for
    /// transfers, an owner address for balance fetches).
    pub fn fail_for(&self, key: impl Into<String>) {
        self.fail_keys.lock().unwrap().insert(key.into());
    }

    /// Apply an artificial latency to every call.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Preset the records returned for one owner.
    pub fn set_balances(&self, owner: impl Into<String>, records: Vec<BalanceRecord>) {
        self.balances.lock().unwrap().insert(owner.into(), records);
    }

    /// Keys of every call made so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    async fn before_call(&self, key: &str) -> Result<(), AppError> {
        self.calls.lock().unwrap().push(key.to_string());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_keys.lock().unwrap().contains(key) {
            return Err(AppError::Blockchain(BlockchainError::TransactionFailed(
                format!("injected failure for {key}"),
            )));
        }
        Ok(())
    }
}

impl Default for MockOperationClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OperationClient for MockOperationClient {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Blockchain(BlockchainError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        Ok(())
    }

    async fn transfer(
        &self,
        _signer: &Keypair,
        to_address: &str,
        _amount: u64,
        _token_mint: Option<&str>,
    ) -> Result<String, AppError> {
        self.before_call(to_address).await?;
        let n = self.sequence.fetch_add(1, Ordering::Relaxed);
        Ok(format!("sig_{n}_{to_address}"))
    }

    async fn fetch_balances(
        &self,
        owner: &str,
        mints: &[String],
    ) -> Result<Vec<BalanceRecord>, AppError> {
        self.before_call(owner).await?;
        if let Some(records) = self.balances.lock().unwrap().get(owner) {
            return Ok(records.clone());
        }
        Ok(mints
            .iter()
            .map(|mint| BalanceRecord::new(owner, mint.clone(), 1_000_000, 6, 100, Utc::now()))
            .collect())
    }
}

/// Mock key resolver mapping owner addresses to generated keypairs.
pub struct MockKeyResolver {
    keys: Mutex<HashMap<String, Arc<Keypair>>>,
}

impl MockKeyResolver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Register a fresh keypair under the given owner address.
    pub fn register(&self, owner: impl Into<String>) {
        self.keys
            .lock()
            .unwrap()
            .insert(owner.into(), Arc::new(Keypair::new()));
    }
}

impl Default for MockKeyResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyResolver for MockKeyResolver {
    fn resolve(&self, owner: &str) -> Result<Arc<Keypair>, AppError> {
        self.keys
            .lock()
            .unwrap()
            .get(owner)
            .cloned()
            .ok_or_else(|| AppError::Signer(SignerError::MissingKey(owner.to_string())))
    }
}

/// Mock balance store with per-primitive fault injection and call counters.
pub struct MockBalanceStore {
    rows: Mutex<HashMap<BalanceKey, BalanceRecord>>,
    is_healthy: AtomicBool,
    fail_upsert_batch: AtomicBool,
    fail_fetch_existing: AtomicBool,
    fail_insert_batch: AtomicBool,
    /// Chunk transactions containing any of these owners roll back
    fail_chunk_owners: Mutex<HashSet<String>>,
    /// Single-row writes for these keys fail
    fail_write_keys: Mutex<HashSet<BalanceKey>>,
    upsert_batch_calls: AtomicUsize,
    fetch_existing_calls: AtomicUsize,
    insert_batch_calls: AtomicUsize,
    update_chunk_calls: AtomicUsize,
    single_row_writes: AtomicUsize,
}

impl MockBalanceStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            is_healthy: AtomicBool::new(true),
            fail_upsert_batch: AtomicBool::new(false),
            fail_fetch_existing: AtomicBool::new(false),
            fail_insert_batch: AtomicBool::new(false),
            fail_chunk_owners: Mutex::new(HashSet::new()),
            fail_write_keys: Mutex::new(HashSet::new()),
            upsert_batch_calls: AtomicUsize::new(0),
            fetch_existing_calls: AtomicUsize::new(0),
            insert_batch_calls: AtomicUsize::new(0),
            update_chunk_calls: AtomicUsize::new(0),
            single_row_writes: AtomicUsize::new(0),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Simulate a store without the (owner, mint) uniqueness guarantee:
    /// every conflict-aware bulk write fails.
    pub fn fail_upsert_batch(&self) {
        self.fail_upsert_batch.store(true, Ordering::Relaxed);
    }

    /// Simulate a store that cannot express the multi-column containment
    /// predicate: every batched existence query fails.
    pub fn fail_fetch_existing(&self) {
        self.fail_fetch_existing.store(true, Ordering::Relaxed);
    }

    pub fn fail_insert_batch(&self) {
        self.fail_insert_batch.store(true, Ordering::Relaxed);
    }

    /// Roll back any chunk transaction containing a record of this owner.
    pub fn fail_chunk_containing_owner(&self, owner: impl Into<String>) {
        self.fail_chunk_owners.lock().unwrap().insert(owner.into());
    }

    /// Fail single-row writes for this key.
    pub fn fail_writes_for(&self, key: BalanceKey) {
        self.fail_write_keys.lock().unwrap().insert(key);
    }

    /// Insert rows directly, bypassing fault injection.
    pub fn seed(&self, records: Vec<BalanceRecord>) {
        let mut rows = self.rows.lock().unwrap();
        for record in records {
            rows.insert(record.key(), record);
        }
    }

    /// Current stored state, for equivalence assertions.
    pub fn snapshot(&self) -> HashMap<BalanceKey, BalanceRecord> {
        self.rows.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().unwrap().is_empty()
    }

    pub fn upsert_batch_calls(&self) -> usize {
        self.upsert_batch_calls.load(Ordering::Relaxed)
    }

    pub fn fetch_existing_calls(&self) -> usize {
        self.fetch_existing_calls.load(Ordering::Relaxed)
    }

    pub fn insert_batch_calls(&self) -> usize {
        self.insert_batch_calls.load(Ordering::Relaxed)
    }

    pub fn update_chunk_calls(&self) -> usize {
        self.update_chunk_calls.load(Ordering::Relaxed)
    }

    pub fn single_row_writes(&self) -> usize {
        self.single_row_writes.load(Ordering::Relaxed)
    }

    fn apply(&self, records: &[BalanceRecord]) {
        let mut rows = self.rows.lock().unwrap();
        for record in records {
            rows.insert(record.key(), record.clone());
        }
    }
}

impl Default for MockBalanceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BalanceStore for MockBalanceStore {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        Ok(())
    }

    async fn upsert_batch(&self, records: &[BalanceRecord]) -> Result<(), AppError> {
        self.upsert_batch_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_upsert_batch.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::ConstraintMissing(
                "no unique constraint matching ON CONFLICT".to_string(),
            )));
        }
        self.apply(records);
        Ok(())
    }

    async fn fetch_existing(&self, keys: &[BalanceKey]) -> Result<Vec<BalanceKey>, AppError> {
        self.fetch_existing_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_fetch_existing.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Query(
                "multi-column containment predicate not supported".to_string(),
            )));
        }
        let rows = self.rows.lock().unwrap();
        Ok(keys
            .iter()
            .filter(|key| rows.contains_key(*key))
            .cloned()
            .collect())
    }

    async fn insert_batch(&self, records: &[BalanceRecord]) -> Result<(), AppError> {
        self.insert_batch_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_insert_batch.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Query(
                "injected insert failure".to_string(),
            )));
        }
        self.apply(records);
        Ok(())
    }

    async fn update_chunk(&self, records: &[BalanceRecord]) -> Result<(), AppError> {
        self.update_chunk_calls.fetch_add(1, Ordering::Relaxed);
        let poisoned = {
            let owners = self.fail_chunk_owners.lock().unwrap();
            records.iter().any(|r| owners.contains(&r.owner))
        };
        if poisoned {
            // Nothing applies: the whole transaction rolls back.
            return Err(AppError::Database(DatabaseError::Transaction(
                "chunk transaction rolled back".to_string(),
            )));
        }
        let mut rows = self.rows.lock().unwrap();
        for record in records {
            // UPDATE semantics: rows that do not exist are untouched.
            if rows.contains_key(&record.key()) {
                rows.insert(record.key(), record.clone());
            }
        }
        Ok(())
    }

    async fn get(&self, key: &BalanceKey) -> Result<Option<BalanceRecord>, AppError> {
        Ok(self.rows.lock().unwrap().get(key).cloned())
    }

    async fn insert_one(&self, record: &BalanceRecord) -> Result<(), AppError> {
        self.single_row_writes.fetch_add(1, Ordering::Relaxed);
        if self.fail_write_keys.lock().unwrap().contains(&record.key()) {
            return Err(AppError::Database(DatabaseError::Query(
                "injected write failure".to_string(),
            )));
        }
        self.rows
            .lock()
            .unwrap()
            .insert(record.key(), record.clone());
        Ok(())
    }

    async fn update_one(&self, record: &BalanceRecord) -> Result<(), AppError> {
        self.single_row_writes.fetch_add(1, Ordering::Relaxed);
        if self.fail_write_keys.lock().unwrap().contains(&record.key()) {
            return Err(AppError::Database(DatabaseError::Query(
                "injected write failure".to_string(),
            )));
        }
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&record.key()) {
            rows.insert(record.key(), record.clone());
        }
        Ok(())
    }
}
