//! The hash-linked chain of blocks.
//!
//! A [`Chain`] always starts with the deterministic genesis block. Every later
//! block at position `i` satisfies:
//!
//! - `block[i].index == i`
//! - `block[i].previous_hash == block[i - 1].hash`
//! - `block[i].hash == compute_block_hash(block[i])`
//!
//! The chain itself does no locking; the owner serializes appends (see
//! [`LedgerService`](crate::service::LedgerService)).

use std::fmt;

use time::OffsetDateTime;

use crate::error::{LedgerError, LedgerResult};
use crate::model::{compute_block_hash, Block, BlockData, ContentAddress, GENESIS_PREVIOUS_HASH};

/// First offending block found by [`Chain::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityViolation {
    pub index: u64,
    pub kind: ViolationKind,
}

impl IntegrityViolation {
    pub fn new(index: u64, kind: ViolationKind) -> Self {
        Self { index, kind }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// Genesis differs from the well-known genesis block.
    Genesis,
    /// Stored index does not match the block's position.
    IndexMismatch,
    /// `previous_hash` does not match the predecessor's hash.
    LinkMismatch,
    /// Stored hash does not recompute from the block's fields.
    HashMismatch,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Genesis => "genesis block mismatch",
            Self::IndexMismatch => "index does not match position",
            Self::LinkMismatch => "previous hash mismatch",
            Self::HashMismatch => "block hash mismatch",
        };
        f.write_str(s)
    }
}

impl From<IntegrityViolation> for LedgerError {
    fn from(v: IntegrityViolation) -> Self {
        LedgerError::ChainIntegrity { index: v.index, reason: v.kind.to_string() }
    }
}

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[derive(Debug, Clone)]
pub struct Chain {
    blocks: Vec<Block>,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    /// A chain holding only the genesis block.
    pub fn new() -> Self {
        Self { blocks: vec![Self::genesis()] }
    }

    /// The fixed first block: index 0, epoch timestamp, no data.
    /// Identical across restarts.
    pub fn genesis() -> Block {
        Block::new(0, 0, BlockData::default(), GENESIS_PREVIOUS_HASH.to_string())
    }

    /// Rebuild a chain from previously appended blocks (genesis excluded),
    /// in index order. The result is verified before it is returned.
    pub fn rebuild(appended: Vec<Block>) -> LedgerResult<Self> {
        let mut blocks = Vec::with_capacity(appended.len() + 1);
        blocks.push(Self::genesis());
        blocks.extend(appended);
        let chain = Self { blocks };
        chain.verify()?;
        Ok(chain)
    }

    pub fn latest(&self) -> LedgerResult<&Block> {
        self.blocks.last().ok_or_else(|| LedgerError::ChainIntegrity {
            index: 0,
            reason: "chain has not been initialized".to_string(),
        })
    }

    /// Number of blocks, genesis included.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always false for a chain built through this type's constructors.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn get(&self, index: u64) -> Option<&Block> {
        usize::try_from(index).ok().and_then(|i| self.blocks.get(i))
    }

    /// Content addresses referenced by the chain, in block order.
    pub fn content_addresses(&self) -> impl Iterator<Item = &ContentAddress> {
        self.blocks.iter().filter_map(Block::content_address)
    }

    /// Construct (without adding) the block that would follow `latest()`.
    pub fn next_block(&self, data_ref: ContentAddress, timestamp: i64) -> LedgerResult<Block> {
        let latest = self.latest()?;
        Ok(Block::new(
            latest.index + 1,
            timestamp,
            BlockData::referencing(data_ref),
            latest.hash.clone(),
        ))
    }

    /// Add a block built by [`next_block`](Self::next_block). Rejects blocks
    /// that do not link onto the current tip.
    pub fn push(&mut self, block: Block) -> LedgerResult<()> {
        let latest = self.latest()?;
        if block.index != latest.index + 1 {
            return Err(IntegrityViolation::new(block.index, ViolationKind::IndexMismatch).into());
        }
        if block.previous_hash != latest.hash {
            return Err(IntegrityViolation::new(block.index, ViolationKind::LinkMismatch).into());
        }
        if compute_block_hash(&block) != block.hash {
            return Err(IntegrityViolation::new(block.index, ViolationKind::HashMismatch).into());
        }
        self.blocks.push(block);
        Ok(())
    }

    /// Append a block referencing `data_ref`, stamped with the current time.
    pub fn append(&mut self, data_ref: ContentAddress) -> LedgerResult<Block> {
        self.append_at(data_ref, now_millis())
    }

    pub fn append_at(&mut self, data_ref: ContentAddress, timestamp: i64) -> LedgerResult<Block> {
        let block = self.next_block(data_ref, timestamp)?;
        self.push(block.clone())?;
        Ok(block)
    }

    /// Walk the chain from genesis, recomputing every hash and link.
    /// Returns the first offending block on mismatch. O(n).
    pub fn verify(&self) -> Result<(), IntegrityViolation> {
        let Some(genesis) = self.blocks.first() else {
            return Err(IntegrityViolation::new(0, ViolationKind::Genesis));
        };
        if *genesis != Self::genesis() {
            return Err(IntegrityViolation::new(0, ViolationKind::Genesis));
        }

        for (pos, pair) in self.blocks.windows(2).enumerate() {
            let (prev, block) = (&pair[0], &pair[1]);
            let expected_index = pos as u64 + 1;
            if block.index != expected_index {
                return Err(IntegrityViolation::new(expected_index, ViolationKind::IndexMismatch));
            }
            if block.previous_hash != prev.hash {
                return Err(IntegrityViolation::new(expected_index, ViolationKind::LinkMismatch));
            }
            if compute_block_hash(block) != block.hash {
                return Err(IntegrityViolation::new(expected_index, ViolationKind::HashMismatch));
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.verify().is_ok()
    }

    #[cfg(test)]
    pub(crate) fn blocks_mut(&mut self) -> &mut Vec<Block> {
        &mut self.blocks
    }
}
