//! Data model for campaign transactions, index rows and the blocks that link them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::canonical_digest;
use crate::error::{LedgerError, LedgerResult};

/// `previousHash` of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Opaque identifier returned by the content store for a stored payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentAddress(String);

impl ContentAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentAddress {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Caller input for a new transaction. Every field is optional here so that
/// missing fields surface as validation errors instead of decode errors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionInput {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub receipt_id: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default, rename = "campaigns_id", alias = "campaign_id")]
    pub campaign_id: Option<String>,
}

impl TransactionInput {
    /// Validate the input and stamp it with the server-assigned `timestamp`
    /// (milliseconds since the epoch).
    pub fn into_record(self, timestamp: i64) -> LedgerResult<TransactionRecord> {
        let user_id = required("user_id", self.user_id)?;
        let sender = required("sender", self.sender)?;
        let receipt_id = required("receipt_id", self.receipt_id)?;
        let campaign_id = required("campaigns_id", self.campaign_id)?;
        let amount = match self.amount {
            None => return Err(LedgerError::validation("amount", "is required")),
            Some(a) if !a.is_finite() => {
                return Err(LedgerError::validation("amount", "must be a finite number"))
            }
            Some(a) if a <= 0.0 => {
                return Err(LedgerError::validation("amount", "must be greater than zero"))
            }
            Some(a) => a,
        };

        Ok(TransactionRecord {
            user_id,
            sender,
            receipt_id,
            amount,
            campaign_id,
            timestamp,
        })
    }
}

fn required(field: &'static str, value: Option<String>) -> LedgerResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        Some(_) => Err(LedgerError::validation(field, "must not be empty")),
        None => Err(LedgerError::validation(field, "is required")),
    }
}

/// One value transfer towards a campaign. Immutable once stored.
///
/// Field names on the wire match the payloads already held in the content
/// store (`campaigns_id` in particular).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub user_id: String,
    pub sender: String,
    pub receipt_id: String,
    #[serde(deserialize_with = "amount_from_number_or_string")]
    pub amount: f64,
    #[serde(rename = "campaigns_id")]
    pub campaign_id: String,
    /// Milliseconds since the epoch, assigned at write time.
    #[serde(default)]
    pub timestamp: i64,
}

impl TransactionRecord {
    /// Canonical byte encoding: compact JSON with fields in declaration order.
    pub fn to_bytes(&self) -> LedgerResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| LedgerError::serialization_with_source("encode transaction", e))
    }

    pub fn from_bytes(bytes: &[u8]) -> LedgerResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| LedgerError::serialization_with_source("decode transaction", e))
    }
}

/// Older payloads may carry the amount as posted, including numeric strings.
fn amount_from_number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Amount {
        Number(f64),
        Text(String),
    }

    match Amount::deserialize(deserializer)? {
        Amount::Number(n) => Ok(n),
        Amount::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("amount {s:?} is not a number"))),
    }
}

/// Primary key of an index row. Tables keyed by UUID and by serial both occur.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
    Int(i64),
    Text(String),
}

/// Persisted record of one content address belonging to the ledger.
///
/// Only `ipfsHash` is required to decode a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RowId>,
    #[serde(rename = "ipfsHash")]
    pub content_address: ContentAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Payload reference carried by a block. Empty for genesis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    #[serde(rename = "ipfsHash", default, skip_serializing_if = "Option::is_none")]
    pub content_address: Option<ContentAddress>,
}

impl BlockData {
    pub fn referencing(address: ContentAddress) -> Self {
        Self { content_address: Some(address) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Position in the chain; genesis is 0.
    pub index: u64,
    /// Block creation time in milliseconds since the epoch.
    pub timestamp: i64,
    pub data: BlockData,
    pub previous_hash: String,
    pub hash: String,
}

impl Block {
    /// Build a block and seal it with its computed hash.
    pub fn new(index: u64, timestamp: i64, data: BlockData, previous_hash: String) -> Self {
        let mut block = Self { index, timestamp, data, previous_hash, hash: String::new() };
        block.hash = compute_block_hash(&block);
        block
    }

    pub fn content_address(&self) -> Option<&ContentAddress> {
        self.data.content_address.as_ref()
    }
}

/// Compute a block hash from its header fields.
/// Included: index, timestamp, data (content address or empty), previous_hash.
pub fn compute_block_hash(b: &Block) -> String {
    let data = b.content_address().map(ContentAddress::as_str).unwrap_or_default();
    canonical_digest(&[
        &b.index.to_le_bytes(),
        &b.timestamp.to_le_bytes(),
        data.as_bytes(),
        b.previous_hash.as_bytes(),
    ])
}
