//! Shared test doubles: memory stores with failure injection.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use campaign_ledger::{
    ContentAddress, ContentStore, IndexError, IndexRow, IndexStore, LedgerService,
    MemoryContentStore, MemoryIndexStore, QueryEngine, StoreError, TransactionInput,
};
use parking_lot::Mutex;

pub fn input(user: &str, campaign: &str, amount: f64) -> TransactionInput {
    TransactionInput {
        user_id: Some(user.to_string()),
        sender: Some(format!("{user}@example.org")),
        receipt_id: Some(format!("rcpt-{user}-{campaign}-{amount}")),
        amount: Some(amount),
        campaign_id: Some(campaign.to_string()),
    }
}

/// Wraps [`MemoryContentStore`] with switchable failures and a concurrency gauge.
#[derive(Clone, Default)]
pub struct FlakyContentStore {
    pub inner: MemoryContentStore,
    fail_puts: Arc<AtomicBool>,
    hang_puts: Arc<AtomicBool>,
    broken: Arc<Mutex<HashSet<ContentAddress>>>,
    get_delay: Arc<Mutex<Option<Duration>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    gets: Arc<AtomicUsize>,
}

impl FlakyContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `put` fails as unreachable.
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Every `put` never completes.
    pub fn hang_puts(&self, hang: bool) {
        self.hang_puts.store(hang, Ordering::SeqCst);
    }

    /// `get` for `address` fails as unreachable.
    pub fn break_address(&self, address: &ContentAddress) {
        self.broken.lock().insert(address.clone());
    }

    pub fn delay_gets(&self, delay: Duration) {
        *self.get_delay.lock() = Some(delay);
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentStore for FlakyContentStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<ContentAddress, StoreError> {
        if self.hang_puts.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("connection refused"));
        }
        self.inner.put(bytes).await
    }

    async fn get(&self, address: &ContentAddress) -> Result<Vec<u8>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.get_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = if self.broken.lock().contains(address) {
            Err(StoreError::unavailable(format!("cannot reach block for {address}")))
        } else {
            self.inner.get(address).await
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Wraps [`MemoryIndexStore`] with switchable failures.
#[derive(Clone, Default)]
pub struct FlakyIndexStore {
    pub inner: MemoryIndexStore,
    fail_inserts: Arc<AtomicBool>,
    fail_lists: Arc<AtomicBool>,
    inserts: Arc<AtomicUsize>,
}

impl FlakyIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IndexStore for FlakyIndexStore {
    async fn insert(&self, address: &ContentAddress) -> Result<IndexRow, IndexError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(IndexError::unavailable("relation unreachable"));
        }
        self.inner.insert(address).await
    }

    async fn list_all(&self) -> Result<Vec<IndexRow>, IndexError> {
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(IndexError::unavailable("relation unreachable"));
        }
        self.inner.list_all().await
    }
}

pub struct Harness {
    pub content: FlakyContentStore,
    pub index: FlakyIndexStore,
    pub ledger: Arc<LedgerService>,
    pub queries: QueryEngine,
}

pub fn harness() -> Harness {
    let content = FlakyContentStore::new();
    let index = FlakyIndexStore::new();
    let ledger = LedgerService::new(Arc::new(content.clone()), Arc::new(index.clone()));
    let queries = QueryEngine::new(Arc::new(content.clone()), Arc::new(index.clone()));
    Harness { content, index, ledger: Arc::new(ledger), queries }
}
