//! Index store clients.
//!
//! The index store persists one row per content address appended to the
//! chain. The query engine lists these rows to find every payload that belongs
//! to the ledger. Only insert and list are needed; rows are never updated or
//! deleted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::{IndexStoreConfig, RetryConfig};
use crate::error::IndexError;
use crate::model::{ContentAddress, IndexRow, RowId};
use crate::retry::with_retry;

#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Persist a new row for `address`.
    async fn insert(&self, address: &ContentAddress) -> Result<IndexRow, IndexError>;

    /// Every row, in the order the store returns them.
    async fn list_all(&self) -> Result<Vec<IndexRow>, IndexError>;
}

#[async_trait]
impl<S: IndexStore + ?Sized> IndexStore for Arc<S> {
    async fn insert(&self, address: &ContentAddress) -> Result<IndexRow, IndexError> {
        (**self).insert(address).await
    }

    async fn list_all(&self) -> Result<Vec<IndexRow>, IndexError> {
        (**self).list_all().await
    }
}

/// In-process index store. Rows are listed in insertion order.
#[derive(Clone, Default)]
pub struct MemoryIndexStore {
    rows: Arc<RwLock<Vec<IndexRow>>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn insert(&self, address: &ContentAddress) -> Result<IndexRow, IndexError> {
        let mut rows = self.rows.write();
        let row = IndexRow {
            id: Some(RowId::Int(rows.len() as i64 + 1)),
            content_address: address.clone(),
            created_at: None,
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn list_all(&self) -> Result<Vec<IndexRow>, IndexError> {
        Ok(self.rows.read().clone())
    }
}

#[derive(Serialize)]
struct NewRow<'a> {
    #[serde(rename = "ipfsHash")]
    content_address: &'a ContentAddress,
}

/// Client for a Supabase (PostgREST) table with an `ipfsHash` column.
///
/// Listing walks the table in pages of `page_size` rows with `limit`/`offset`
/// until a short page comes back, so the server's `max-rows` cap never
/// truncates the result.
#[derive(Clone)]
pub struct SupabaseIndexStore {
    client: reqwest::Client,
    table_url: String,
    api_key: String,
    page_size: usize,
    order_by: Option<String>,
    retry: RetryConfig,
}

impl SupabaseIndexStore {
    pub fn new(config: &IndexStoreConfig) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| IndexError::unavailable_with_source("failed to build http client", e))?;
        let order_by = config.order_by.trim();
        Ok(Self {
            client,
            table_url: format!("{}/rest/v1/{}", config.url.trim_end_matches('/'), config.table),
            api_key: config.api_key.clone(),
            page_size: config.page_size.max(1),
            order_by: (!order_by.is_empty()).then(|| format!("{order_by}.asc")),
            retry: config.retry.clone(),
        })
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        self.client
            .request(method, &self.table_url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn insert_once(&self, address: &ContentAddress) -> Result<IndexRow, IndexError> {
        let response = self
            .request(reqwest::Method::POST)
            .header("Prefer", "return=representation")
            .json(&NewRow { content_address: address })
            .send()
            .await
            .map_err(|e| map_transport_error("insert", e))?;

        let mut rows: Vec<IndexRow> = decode(response, "insert").await?;
        rows.pop().ok_or_else(|| IndexError::Rejected {
            status: 200,
            message: "insert returned no row".to_string(),
        })
    }

    fn page_query(&self, offset: usize) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("limit", self.page_size.to_string()),
            ("offset", offset.to_string()),
        ];
        if let Some(order) = &self.order_by {
            query.push(("order", order.clone()));
        }
        query
    }

    async fn list_page(&self, offset: usize) -> Result<Vec<IndexRow>, IndexError> {
        let response = self
            .request(reqwest::Method::GET)
            .query(&self.page_query(offset))
            .send()
            .await
            .map_err(|e| map_transport_error("list", e))?;
        decode(response, "list").await
    }
}

#[async_trait]
impl IndexStore for SupabaseIndexStore {
    #[tracing::instrument(skip(self), fields(address = %address))]
    async fn insert(&self, address: &ContentAddress) -> Result<IndexRow, IndexError> {
        with_retry(&self.retry, "index.insert", || self.insert_once(address)).await
    }

    #[tracing::instrument(skip(self), fields(page_size = self.page_size))]
    async fn list_all(&self) -> Result<Vec<IndexRow>, IndexError> {
        let mut rows = Vec::new();
        loop {
            let offset = rows.len();
            let page = with_retry(&self.retry, "index.list", || self.list_page(offset)).await?;
            let short = page.len() < self.page_size;
            rows.extend(page);
            if short {
                break;
            }
        }
        tracing::debug!(rows = rows.len(), "listed index rows");
        Ok(rows)
    }
}

async fn decode(response: reqwest::Response, operation: &str) -> Result<Vec<IndexRow>, IndexError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        let message = message.trim();
        return Err(if status.is_server_error() {
            IndexError::unavailable(format!("index.{operation} returned {status}: {message}"))
        } else {
            IndexError::Rejected { status: status.as_u16(), message: message.to_string() }
        });
    }
    response.json().await.map_err(|e| {
        IndexError::unavailable_with_source(format!("malformed index.{operation} response"), e)
    })
}

fn map_transport_error(operation: &str, e: reqwest::Error) -> IndexError {
    if e.is_timeout() {
        IndexError::timeout(format!("index.{operation}"))
    } else {
        IndexError::unavailable_with_source(format!("index.{operation} request failed"), e)
    }
}
