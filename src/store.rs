//! Content store clients.
//!
//! The content store keeps opaque payload bytes under a content address. The
//! ledger never reimplements it; it only calls [`ContentStore::put`] and
//! [`ContentStore::get`].
//!
//! - [`IpfsContentStore`] talks to an IPFS node over its HTTP API.
//! - [`MemoryContentStore`] keeps payloads in process, addressed by SHA-256.
//!
//! Re-storing identical bytes may return the same address; callers must not
//! assume a fresh address per call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::config::{ContentStoreConfig, RetryConfig};
use crate::crypto::content_digest;
use crate::error::StoreError;
use crate::model::ContentAddress;
use crate::retry::with_retry;

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `bytes` and return their content address.
    async fn put(&self, bytes: Vec<u8>) -> Result<ContentAddress, StoreError>;

    /// Fetch the payload stored under `address`.
    async fn get(&self, address: &ContentAddress) -> Result<Vec<u8>, StoreError>;
}

#[async_trait]
impl<S: ContentStore + ?Sized> ContentStore for Arc<S> {
    async fn put(&self, bytes: Vec<u8>) -> Result<ContentAddress, StoreError> {
        (**self).put(bytes).await
    }

    async fn get(&self, address: &ContentAddress) -> Result<Vec<u8>, StoreError> {
        (**self).get(address).await
    }
}

/// In-process content store. Cheaply cloneable; clones share data.
#[derive(Clone, Default)]
pub struct MemoryContentStore {
    blobs: Arc<RwLock<HashMap<ContentAddress, Vec<u8>>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<ContentAddress, StoreError> {
        let address = ContentAddress::new(content_digest(&bytes));
        self.blobs.write().insert(address.clone(), bytes);
        Ok(address)
    }

    async fn get(&self, address: &ContentAddress) -> Result<Vec<u8>, StoreError> {
        self.blobs
            .read()
            .get(address)
            .cloned()
            .ok_or_else(|| StoreError::not_found(address.as_str()))
    }
}

#[derive(Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

/// Client for the IPFS HTTP API (`/api/v0/add`, `/api/v0/cat`).
#[derive(Clone)]
pub struct IpfsContentStore {
    client: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
}

impl IpfsContentStore {
    pub fn new(config: &ContentStoreConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| StoreError::unavailable_with_source("failed to build http client", e))?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            retry: config.retry.clone(),
        })
    }

    async fn add_once(&self, bytes: &[u8]) -> Result<ContentAddress, StoreError> {
        let part = Part::bytes(bytes.to_vec()).file_name("transaction.json");
        let form = Form::new().part("file", part);
        let response = self
            .client
            .post(format!("{}/api/v0/add", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| map_transport_error("add", e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(map_status("add", status, message, None));
        }
        let body: AddResponse = response
            .json()
            .await
            .map_err(|e| StoreError::unavailable_with_source("malformed add response", e))?;
        Ok(ContentAddress::new(body.hash))
    }

    async fn cat_once(&self, address: &ContentAddress) -> Result<Vec<u8>, StoreError> {
        let response = self
            .client
            .post(format!("{}/api/v0/cat", self.base_url))
            .query(&[("arg", address.as_str())])
            .send()
            .await
            .map_err(|e| map_transport_error("cat", e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(map_status("cat", status, message, Some(address)));
        }
        let bytes = response.bytes().await.map_err(|e| map_transport_error("cat", e))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ContentStore for IpfsContentStore {
    #[tracing::instrument(skip(self, bytes), fields(len = bytes.len()))]
    async fn put(&self, bytes: Vec<u8>) -> Result<ContentAddress, StoreError> {
        with_retry(&self.retry, "ipfs.add", || self.add_once(&bytes)).await
    }

    #[tracing::instrument(skip(self), fields(address = %address))]
    async fn get(&self, address: &ContentAddress) -> Result<Vec<u8>, StoreError> {
        with_retry(&self.retry, "ipfs.cat", || self.cat_once(address)).await
    }
}

fn map_transport_error(operation: &str, e: reqwest::Error) -> StoreError {
    if e.is_timeout() {
        StoreError::timeout(format!("ipfs.{operation}"))
    } else {
        StoreError::unavailable_with_source(format!("ipfs.{operation} request failed"), e)
    }
}

fn map_status(
    operation: &str,
    status: reqwest::StatusCode,
    message: String,
    address: Option<&ContentAddress>,
) -> StoreError {
    // The IPFS API reports unknown or unresolvable CIDs as 404 or as a 500
    // whose message says so.
    let missing = status == reqwest::StatusCode::NOT_FOUND
        || message.contains("not found")
        || message.contains("invalid path");
    match address {
        Some(address) if missing => StoreError::not_found(address.as_str()),
        _ if status.is_server_error() => StoreError::unavailable(format!(
            "ipfs.{operation} returned {status}: {}",
            message.trim()
        )),
        _ => StoreError::Rejected { status: status.as_u16(), message: message.trim().to_string() },
    }
}
