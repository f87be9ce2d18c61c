//! Error types for the ledger core and its two external collaborators.
//!
//! Each boundary has its own error enum:
//!
//! - [`StoreError`] - content store client (`put`/`get` of payload bytes)
//! - [`IndexError`] - index store client (`insert`/`list_all` of index rows)
//! - [`LedgerError`] - the core (validation, append, query, verify)
//! - [`ConfigError`] - configuration loading and validation
//!
//! Client errors convert into [`LedgerError`] at the core boundary. The
//! conversion for index errors depends on where they happen: a failed insert
//! after a chain append is an [`LedgerError::IndexPersist`], every other index
//! failure is an [`LedgerError::IndexUnavailable`].

use std::sync::Arc;

use axum::http::StatusCode;
use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result alias for core ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors produced by a [`ContentStore`](crate::store::ContentStore).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("content store unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The store did not answer within the configured time limit.
    #[error("content store timed out during {operation}")]
    Timeout { operation: String },

    /// No payload is stored under the address.
    #[error("content not found: {address}")]
    NotFound { address: String },

    /// The store answered but refused the request.
    #[error("content store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl StoreError {
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into(), source: None }
    }

    #[must_use]
    pub fn unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unavailable { message: message.into(), source: Some(Arc::new(source)) }
    }

    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout { operation: operation.into() }
    }

    #[must_use]
    pub fn not_found(address: impl Into<String>) -> Self {
        Self::NotFound { address: address.into() }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

/// Errors produced by an [`IndexStore`](crate::index::IndexStore).
#[derive(Debug, Clone, Error)]
pub enum IndexError {
    #[error("index store unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("index store timed out during {operation}")]
    Timeout { operation: String },

    #[error("index store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl IndexError {
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into(), source: None }
    }

    #[must_use]
    pub fn unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unavailable { message: message.into(), source: Some(Arc::new(source)) }
    }

    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout { operation: operation.into() }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

/// Errors surfaced by the ledger core.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Caller input was missing or malformed. No side effects occurred.
    #[error("invalid transaction: {field} {reason}")]
    Validation { field: &'static str, reason: String },

    /// The content store could not be reached. On the write path no block
    /// was appended; on the read path the whole query was aborted.
    #[error("content store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    #[error("content store timed out during {operation}")]
    StoreTimeout { operation: String },

    #[error("content not found: {address}")]
    NotFound { address: String },

    #[error("index store unavailable: {0}")]
    IndexUnavailable(#[source] IndexError),

    /// The block was appended to the chain but its index row could not be
    /// written. The chain and the index have diverged until reconciled.
    #[error("block {block_index} appended but index row for {address} was not persisted: {source}")]
    IndexPersist {
        address: String,
        block_index: u64,
        #[source]
        source: IndexError,
    },

    /// Recomputed hashes or linkage do not match. The chain history can no
    /// longer be trusted.
    #[error("chain integrity violated at block {index}: {reason}")]
    ChainIntegrity { index: u64, reason: String },

    #[error("serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("block journal error: {0}")]
    Journal(#[from] std::io::Error),
}

impl LedgerError {
    #[must_use]
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation { field, reason: reason.into() }
    }

    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Stable machine-readable kind, used in HTTP error bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::StoreTimeout { .. } => "store_timeout",
            Self::NotFound { .. } => "not_found",
            Self::IndexUnavailable(_) => "index_unavailable",
            Self::IndexPersist { .. } => "index_persist",
            Self::ChainIntegrity { .. } => "chain_integrity",
            Self::Serialization { .. } => "serialization",
            Self::Journal(_) => "journal",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::StoreUnavailable(_) | Self::IndexUnavailable(_) | Self::IndexPersist { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Self::StoreTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::ChainIntegrity { .. } | Self::Serialization { .. } | Self::Journal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout { operation } => Self::StoreTimeout { operation },
            StoreError::NotFound { address } => Self::NotFound { address },
            other => Self::StoreUnavailable(other),
        }
    }
}

impl From<IndexError> for LedgerError {
    fn from(err: IndexError) -> Self {
        Self::IndexUnavailable(err)
    }
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
