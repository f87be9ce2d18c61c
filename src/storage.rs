//! Disk journal for appended blocks (JSON per file).
//!
//! Only blocks after genesis are written; genesis is rebuilt from its fixed
//! definition. A block is on disk before it joins the in-memory chain.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Block;

#[derive(Debug, Clone)]
pub struct BlockJournal {
    dir: PathBuf,
}

impl BlockJournal {
    /// Open (creating if needed) a journal rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a block as `block_<index>.json` and fsync it.
    pub fn save_block(&self, block: &Block) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(block)?;
        let tmp = self.dir.join(format!("block_{}.json.tmp", block.index));
        let mut f = File::create(&tmp)?;
        f.write_all(&json)?;
        f.sync_all()?;
        fs::rename(&tmp, block_path(&self.dir, block.index))?;
        Ok(())
    }

    /// Load every journaled block, sorted by index.
    ///
    /// An unparseable `.json` file fails the whole load.
    pub fn load_blocks(&self) -> std::io::Result<Vec<Block>> {
        let mut out = vec![];
        for entry in fs::read_dir(&self.dir)? {
            let p = entry?.path();
            if p.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let mut f = File::open(&p)?;
            let mut buf = String::new();
            f.read_to_string(&mut buf)?;
            let block: Block = serde_json::from_str(&buf).map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("{}: {e}", p.display()),
                )
            })?;
            out.push(block);
        }
        out.sort_by_key(|b| b.index);
        Ok(out)
    }
}

/// Ensure that the given directory exists (create recursively if needed).
fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Compute the JSON filename for a block index.
fn block_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("block_{index}.json"))
}
