//! Binds one [`Index`] and one [`BlockStore`] behind a single read-write
//! lock, giving callers prefix-rollup `track` and positionally-aligned
//! `fetch`.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::debug;

use crate::block::BlockStore;
use crate::error::{Result, StrataError, Subsystem};
use crate::index::{Index, IndexNode};
use crate::point::Point;

const BLOCK_FILE: &str = "block";
const INDEX_FILE: &str = "index";

struct EpochInner {
    index: Index,
    block: BlockStore,
    closed: bool,
}

/// One time partition: an index mapping field paths to record
/// identifiers, and a block store holding the accumulated points for those
/// records.
///
/// `track` and `fetch` take the lock in read mode, so they run
/// concurrently with each other; `close` takes it in write mode to
/// exclude everything else while the underlying files are released.
pub struct Epoch {
    dir: PathBuf,
    lock: RwLock<EpochInner>,
}

impl Epoch {
    /// Opens the epoch directory at `dir`. In read-write mode, the
    /// directory (and its block/index files) are created if absent; in
    /// read-only mode an absent directory is a [`StrataError::NotFound`].
    pub fn open(dir: impl Into<PathBuf>, record_size: usize, read_only: bool) -> Result<Self> {
        let dir = dir.into();
        if !dir.exists() {
            if read_only {
                return Err(StrataError::NotFound { subsystem: Subsystem::Epoch, path: dir });
            }
            std::fs::create_dir_all(&dir)
                .map_err(|source| StrataError::Io { subsystem: Subsystem::Epoch, path: dir.clone(), source })?;
        }

        let index = Index::open(dir.join(INDEX_FILE), read_only)?;
        let block = BlockStore::open(dir.join(BLOCK_FILE), record_size, read_only)?;
        debug!(dir = %dir.display(), read_only, "epoch open");
        Ok(Self { dir, lock: RwLock::new(EpochInner { index, block, closed: false }) })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Accumulates `(total, count)` at `pid` on `fields`, and on every
    /// prefix of `fields` -- a single measurement on `["a","b","c"]` rolls
    /// up into the `["a"]`, `["a","b"]`, and `["a","b","c"]` streams.
    pub fn track(&self, pid: u16, fields: &[String], total: f64, count: f64) -> Result<()> {
        let inner = self.lock.read();
        if inner.closed {
            return Err(StrataError::Closed { subsystem: Subsystem::Epoch });
        }
        for end in 1..=fields.len() {
            let node = inner.index.ensure(&fields[..end])?;
            inner.block.track(node.record_id, pid, total, count)?;
        }
        Ok(())
    }

    /// Resolves `fields` (which may contain wildcard segments) against the
    /// index, then fetches `[from, to)` for every matching node. The
    /// returned series and nodes are positionally aligned.
    pub fn fetch(&self, from: u16, to: u16, fields: &[String]) -> Result<(Vec<Vec<Point>>, Vec<IndexNode>)> {
        let inner = self.lock.read();
        if inner.closed {
            return Err(StrataError::Closed { subsystem: Subsystem::Epoch });
        }
        let nodes = inner.index.find(fields)?;
        let mut series = Vec::with_capacity(nodes.len());
        for node in &nodes {
            series.push(inner.block.fetch(node.record_id, from, to)?);
        }
        Ok((series, nodes))
    }

    /// Flushes the block store, then the index. Block data references
    /// record identifiers the index assigns, so flushing the block first
    /// bounds the window in which a crash could orphan block records.
    pub fn sync(&self) -> Result<()> {
        let inner = self.lock.read();
        if inner.closed {
            return Err(StrataError::Closed { subsystem: Subsystem::Epoch });
        }
        inner.block.sync()?;
        inner.index.sync()?;
        Ok(())
    }

    /// Closes the block store, then the index. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.lock.write();
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        debug!(dir = %self.dir.display(), "epoch close");
        let block_result = inner.block.close();
        let index_result = inner.index.close();
        block_result?;
        index_result
    }
}
