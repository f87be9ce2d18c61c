//! Tamper-evident transaction ledger for fundraising campaigns.
//!
//! Transaction payloads live in an external content-addressable store. Each
//! stored payload's content address is linked into an in-process, hash-linked
//! [`Chain`] and recorded as a row in an external index store. Queries walk
//! the index rows, fetch each payload back and filter.
//!
//! ```text
//! write:  LedgerService -> ContentStore.put -> Chain.append -> IndexStore.insert
//! read:   QueryEngine   -> IndexStore.list_all -> ContentStore.get (per row) -> filter
//! ```

#![deny(unsafe_code)]

pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod index;
pub mod model;
pub mod query;
pub mod retry;
pub mod routes;
pub mod service;
pub mod storage;
pub mod store;

use std::sync::Arc;

pub use chain::{Chain, IntegrityViolation, ViolationKind};
pub use config::LedgerConfig;
pub use error::{ConfigError, IndexError, LedgerError, LedgerResult, StoreError};
pub use index::{IndexStore, MemoryIndexStore, SupabaseIndexStore};
pub use model::{
    Block, BlockData, ContentAddress, IndexRow, RowId, TransactionInput, TransactionRecord,
};
pub use query::QueryEngine;
pub use routes::AppState;
pub use service::{IntegrityCheck, LedgerService, ReconcileReport, RecordReceipt, Timeouts};
pub use storage::BlockJournal;
pub use store::{ContentStore, IpfsContentStore, MemoryContentStore};

use config::{ContentStoreKind, IndexStoreKind};
use tracing_subscriber::EnvFilter;

/// Log filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_LOG_FILTER: &str = "campaign_ledger=info";

/// Filter from `rust_log` (the `RUST_LOG` value), falling back to
/// [`DEFAULT_LOG_FILTER`].
pub fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Build the service and query engine described by `config`.
///
/// Rebuilds the chain from the block journal when `chain.data_dir` is set.
pub fn build_state(config: &LedgerConfig) -> anyhow::Result<AppState> {
    let content: Arc<dyn ContentStore> = match config.content_store.kind {
        ContentStoreKind::Ipfs => Arc::new(IpfsContentStore::new(&config.content_store)?),
        ContentStoreKind::Memory => Arc::new(MemoryContentStore::new()),
    };
    let index: Arc<dyn IndexStore> = match config.index_store.kind {
        IndexStoreKind::Supabase => Arc::new(SupabaseIndexStore::new(&config.index_store)?),
        IndexStoreKind::Memory => Arc::new(MemoryIndexStore::new()),
    };
    let timeouts = Timeouts {
        content_store: config.content_store.timeout,
        index_store: config.index_store.timeout,
    };

    let mut ledger = LedgerService::new(content.clone(), index.clone()).with_timeouts(timeouts);
    if let Some(dir) = &config.chain.data_dir {
        ledger = ledger.with_journal(BlockJournal::open(dir)?)?;
    }
    let queries = QueryEngine::new(content, index)
        .with_config(&config.query)
        .with_timeouts(timeouts);

    Ok(AppState { ledger: Arc::new(ledger), queries: Arc::new(queries) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_log_overrides_the_default_filter() {
        let filter = log_filter(Some("campaign_ledger=debug"));
        assert_eq!(filter.to_string(), "campaign_ledger=debug");
    }

    #[test]
    fn default_filter_applies_when_rust_log_is_unset_or_empty() {
        assert_eq!(log_filter(None).to_string(), DEFAULT_LOG_FILTER);
        assert_eq!(log_filter(Some("  ")).to_string(), DEFAULT_LOG_FILTER);
    }
}
