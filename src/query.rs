//! Query engine: resolves index rows back into transaction records.
//!
//! Every query lists all index rows, fetches each payload from the content
//! store (at most `fan_out` fetches in flight), decodes it, and then filters.
//! Records come back in index-row order. Amounts are passed through as stored.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use indexmap::IndexSet;

use crate::config::{FetchPolicy, QueryConfig};
use crate::error::{LedgerError, LedgerResult};
use crate::index::IndexStore;
use crate::model::{IndexRow, TransactionRecord};
use crate::service::Timeouts;
use crate::store::ContentStore;

pub struct QueryEngine {
    content: Arc<dyn ContentStore>,
    index: Arc<dyn IndexStore>,
    timeouts: Timeouts,
    fan_out: usize,
    fetch_policy: FetchPolicy,
}

impl QueryEngine {
    pub fn new(content: Arc<dyn ContentStore>, index: Arc<dyn IndexStore>) -> Self {
        let defaults = QueryConfig::default();
        Self {
            content,
            index,
            timeouts: Timeouts::default(),
            fan_out: defaults.fan_out,
            fetch_policy: defaults.fetch_policy,
        }
    }

    pub fn with_config(mut self, config: &QueryConfig) -> Self {
        self.fan_out = config.fan_out.max(1);
        self.fetch_policy = config.fetch_policy;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Lazily resolve every index row, in index-row order.
    ///
    /// The row list is fetched up front; payloads are fetched as the stream is
    /// polled. The stream is finite and cannot be restarted.
    pub async fn stream_all(&self) -> LedgerResult<BoxStream<'_, LedgerResult<TransactionRecord>>> {
        let rows = self.timeouts.index("list", self.index.list_all()).await?;
        tracing::debug!(rows = rows.len(), fan_out = self.fan_out, "resolving index rows");
        Ok(stream::iter(rows).map(move |row| self.fetch(row)).buffered(self.fan_out).boxed())
    }

    /// Every record in the ledger.
    ///
    /// Under [`FetchPolicy::FailFast`] any failed fetch or decode fails the
    /// whole call; under [`FetchPolicy::SkipUnreadable`] the record is left out.
    #[tracing::instrument(skip(self), fields(policy = ?self.fetch_policy))]
    pub async fn list_all(&self) -> LedgerResult<Vec<TransactionRecord>> {
        let records = self.stream_all().await?;
        match self.fetch_policy {
            FetchPolicy::FailFast => records.try_collect().await,
            FetchPolicy::SkipUnreadable => Ok(records
                .filter_map(|result| async move {
                    match result {
                        Ok(record) => Some(record),
                        Err(err) => {
                            tracing::warn!(error = %err, "skipping unreadable ledger record");
                            None
                        }
                    }
                })
                .collect()
                .await),
        }
    }

    /// Records whose campaign id equals `campaign_id` exactly.
    #[tracing::instrument(skip(self))]
    pub async fn by_campaign(&self, campaign_id: &str) -> LedgerResult<Vec<TransactionRecord>> {
        let mut records = self.list_all().await?;
        records.retain(|r| r.campaign_id == campaign_id);
        Ok(records)
    }

    /// Distinct campaigns `user_id` has contributed to, in first-seen order.
    #[tracing::instrument(skip(self))]
    pub async fn campaigns_for_user(&self, user_id: &str) -> LedgerResult<IndexSet<String>> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.campaign_id)
            .collect())
    }

    /// Distinct users who contributed to `campaign_id`, in first-seen order.
    #[tracing::instrument(skip(self))]
    pub async fn users_for_campaign(&self, campaign_id: &str) -> LedgerResult<IndexSet<String>> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|r| r.campaign_id == campaign_id)
            .map(|r| r.user_id)
            .collect())
    }

    async fn fetch(&self, row: IndexRow) -> LedgerResult<TransactionRecord> {
        let bytes = self.timeouts.store("get", self.content.get(&row.content_address)).await?;
        TransactionRecord::from_bytes(&bytes).map_err(|err| match err {
            LedgerError::Serialization { message, source } => LedgerError::Serialization {
                message: format!("{message} {}", row.content_address),
                source,
            },
            other => other,
        })
    }
}
