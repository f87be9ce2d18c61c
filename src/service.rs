//! Ledger service: the single entry point for recording transactions.
//!
//! Write path for one transaction:
//!
//! ```text
//! validate -> encode -> content store put -> journal -> chain append -> index insert
//! ```
//!
//! Everything from the put onwards runs under one async mutex, so two
//! concurrent calls can never build on the same `latest()` block and index
//! rows are inserted in chain order. A failed put leaves the chain untouched.
//! A failed index insert leaves the block in place and surfaces
//! [`LedgerError::IndexPersist`]; [`LedgerService::reconcile`] repairs the gap.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::chain::{now_millis, Chain, IntegrityViolation};
use crate::error::{IndexError, LedgerError, LedgerResult, StoreError};
use crate::index::IndexStore;
use crate::model::{Block, ContentAddress, TransactionInput};
use crate::storage::BlockJournal;
use crate::store::ContentStore;

/// Upper bounds for a single call to each external store.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub content_store: Duration,
    pub index_store: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { content_store: Duration::from_secs(10), index_store: Duration::from_secs(10) }
    }
}

impl Timeouts {
    pub(crate) async fn store<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> LedgerResult<T> {
        match tokio::time::timeout(self.content_store, call).await {
            Ok(result) => result.map_err(LedgerError::from),
            Err(_) => Err(LedgerError::StoreTimeout { operation: operation.to_string() }),
        }
    }

    pub(crate) async fn index<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, IndexError>>,
    ) -> Result<T, IndexError> {
        tokio::time::timeout(self.index_store, call)
            .await
            .unwrap_or_else(|_| Err(IndexError::timeout(operation)))
    }
}

/// Returned to the caller of [`LedgerService::record_transaction`].
#[derive(Debug, Clone, Serialize)]
pub struct RecordReceipt {
    pub content_address: ContentAddress,
    pub block: Block,
}

/// Outcome of a reconciliation sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// Content addresses referenced by the chain.
    pub chain_addresses: usize,
    /// Index rows present before the sweep.
    pub indexed: usize,
    /// Chain addresses that had no index row.
    pub missing: Vec<ContentAddress>,
    /// Missing addresses that were inserted by this sweep.
    pub reinserted: Vec<ContentAddress>,
}

/// Result of the most recent [`LedgerService::verify`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityCheck {
    /// Chain length at the time of the check.
    pub blocks: usize,
    pub violation: Option<IntegrityViolation>,
}

pub struct LedgerService {
    chain: RwLock<Chain>,
    last_check: RwLock<Option<IntegrityCheck>>,
    append_lock: Mutex<()>,
    content: Arc<dyn ContentStore>,
    index: Arc<dyn IndexStore>,
    journal: Option<BlockJournal>,
    timeouts: Timeouts,
}

impl LedgerService {
    /// A service with a fresh in-memory chain and no journal.
    pub fn new(content: Arc<dyn ContentStore>, index: Arc<dyn IndexStore>) -> Self {
        Self {
            chain: RwLock::new(Chain::new()),
            last_check: RwLock::new(None),
            append_lock: Mutex::new(()),
            content,
            index,
            journal: None,
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Attach a block journal and rebuild the chain from it.
    ///
    /// Fails with [`LedgerError::ChainIntegrity`] if the journaled blocks do
    /// not form a valid chain.
    pub fn with_journal(mut self, journal: BlockJournal) -> LedgerResult<Self> {
        let blocks = journal.load_blocks()?;
        let chain = Chain::rebuild(blocks)?;
        tracing::info!(
            dir = %journal.dir().display(),
            blocks = chain.len(),
            "rebuilt chain from journal",
        );
        self.chain = RwLock::new(chain);
        self.journal = Some(journal);
        Ok(self)
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Validate, store and append one transaction.
    #[tracing::instrument(
        skip(self, input),
        fields(campaign_id = ?input.campaign_id, user_id = ?input.user_id),
    )]
    pub async fn record_transaction(&self, input: TransactionInput) -> LedgerResult<RecordReceipt> {
        let record = input.into_record(now_millis())?;
        let bytes = record.to_bytes()?;

        let _append = self.append_lock.lock().await;

        let content_address = self.timeouts.store("put", self.content.put(bytes)).await?;

        let block = self.chain.read().next_block(content_address.clone(), now_millis())?;
        if let Some(journal) = &self.journal {
            journal.save_block(&block)?;
        }
        self.chain.write().push(block.clone())?;
        tracing::info!(index = block.index, address = %content_address, "block appended");

        let inserted = self.timeouts.index("insert", self.index.insert(&content_address)).await;
        if let Err(source) = inserted {
            tracing::warn!(
                index = block.index,
                address = %content_address,
                error = %source,
                "index row not persisted; chain and index diverge until reconciled",
            );
            return Err(LedgerError::IndexPersist {
                address: content_address.to_string(),
                block_index: block.index,
                source,
            });
        }

        Ok(RecordReceipt { content_address, block })
    }

    /// Walk the whole chain, recomputing hashes and links. The outcome is
    /// kept for [`last_check`](Self::last_check).
    pub fn verify(&self) -> LedgerResult<()> {
        let (blocks, outcome) = {
            let chain = self.chain.read();
            (chain.len(), chain.verify())
        };
        let violation = outcome.err();
        *self.last_check.write() = Some(IntegrityCheck { blocks, violation: violation.clone() });

        match violation {
            None => Ok(()),
            Some(violation) => {
                tracing::error!(
                    index = violation.index,
                    reason = %violation.kind,
                    "chain integrity violated",
                );
                Err(violation.into())
            }
        }
    }

    pub fn last_check(&self) -> Option<IntegrityCheck> {
        self.last_check.read().clone()
    }

    /// Number of blocks, genesis included.
    pub fn chain_len(&self) -> usize {
        self.chain.read().len()
    }

    pub fn latest_block(&self) -> LedgerResult<Block> {
        self.chain.read().latest().cloned()
    }

    /// Snapshot of every block.
    pub fn blocks(&self) -> Vec<Block> {
        self.chain.read().blocks().to_vec()
    }

    /// Insert index rows for chain content addresses the index store lacks.
    ///
    /// Appends are held off for the duration of the sweep.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self) -> LedgerResult<ReconcileReport> {
        let _append = self.append_lock.lock().await;

        let rows = self.timeouts.index("list", self.index.list_all()).await?;
        let indexed: HashSet<ContentAddress> =
            rows.into_iter().map(|r| r.content_address).collect();

        let chain_addresses: Vec<ContentAddress> =
            self.chain.read().content_addresses().cloned().collect();
        let mut seen = HashSet::new();
        let missing: Vec<ContentAddress> = chain_addresses
            .iter()
            .filter(|a| !indexed.contains(*a) && seen.insert(*a))
            .cloned()
            .collect();

        let mut report = ReconcileReport {
            chain_addresses: chain_addresses.len(),
            indexed: indexed.len(),
            missing: missing.clone(),
            reinserted: Vec::new(),
        };

        for address in missing {
            self.timeouts.index("insert", self.index.insert(&address)).await?;
            tracing::info!(address = %address, "reinserted missing index row");
            report.reinserted.push(address);
        }

        Ok(report)
    }

    /// Run [`verify`](Self::verify) every `interval` until the handle is aborted.
    pub fn spawn_periodic_verification(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if service.verify().is_ok() {
                    tracing::debug!(
                        blocks = service.chain_len(),
                        "periodic chain verification passed",
                    );
                }
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn chain_mut(&self) -> parking_lot::RwLockWriteGuard<'_, Chain> {
        self.chain.write()
    }
}
