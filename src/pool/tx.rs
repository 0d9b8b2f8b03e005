//! Undo-logged transactions over the pool region.

use super::arena::BlockInfo;
use super::journal::Journal;
use super::PoolOffset;
use crate::error::PoolResult;

/// A single pool transaction.
///
/// Every logged write first snapshots the bytes it is about to overwrite,
/// in memory and, for file-backed pools, in the on-disk [`Journal`].
/// [`Transaction::rollback`] replays the snapshots in reverse order,
/// restoring the region byte for byte. Index updates are staged and only
/// handed back by [`Transaction::finish`].
pub(crate) struct Transaction<'a> {
    region: &'a mut [u8],
    journal: Option<&'a mut Journal>,
    undo: Vec<(usize, Vec<u8>)>,
    staged: Vec<(PoolOffset, BlockInfo)>,
}

/// What a finished transaction leaves behind: enough to undo its writes
/// and the index updates to apply if it commits.
pub(crate) struct TxLog {
    undo: Vec<(usize, Vec<u8>)>,
    pub staged: Vec<(PoolOffset, BlockInfo)>,
}

impl TxLog {
    pub(crate) fn restore(self, region: &mut [u8]) {
        restore(region, self.undo);
    }
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(region: &'a mut [u8], journal: Option<&'a mut Journal>) -> Self {
        Self {
            region,
            journal,
            undo: Vec::new(),
            staged: Vec::new(),
        }
    }

    pub(crate) fn read(&self, at: usize, len: usize) -> &[u8] {
        &self.region[at..at + len]
    }

    pub(crate) fn read_u64(&self, at: usize) -> u64 {
        let mut word = [0u8; 8];
        word.copy_from_slice(self.read(at, 8));
        u64::from_le_bytes(word)
    }

    /// Mutable access to a range, logged for undo.
    pub(crate) fn bytes_mut(&mut self, at: usize, len: usize) -> PoolResult<&mut [u8]> {
        let original = &self.region[at..at + len];
        if let Some(journal) = self.journal.as_deref_mut() {
            journal.append(at as u64, original)?;
        }
        self.undo.push((at, original.to_vec()));
        Ok(&mut self.region[at..at + len])
    }

    pub(crate) fn write(&mut self, at: usize, data: &[u8]) -> PoolResult<()> {
        self.bytes_mut(at, data.len())?.copy_from_slice(data);
        Ok(())
    }

    pub(crate) fn write_u64(&mut self, at: usize, value: u64) -> PoolResult<()> {
        self.write(at, &value.to_le_bytes())
    }

    pub(crate) fn zero(&mut self, at: usize, len: usize) -> PoolResult<()> {
        self.bytes_mut(at, len)?.fill(0);
        Ok(())
    }

    /// Zero a range without logging it. Only for bytes no committed state
    /// can reach: a payload that was free or beyond the cursor before this
    /// transaction began.
    pub(crate) fn zero_unreachable(&mut self, at: usize, len: usize) {
        self.region[at..at + len].fill(0);
    }

    pub(crate) fn stage(&mut self, payload: PoolOffset, block: BlockInfo) {
        self.staged.push((payload, block));
    }

    /// Staged block, if this transaction already touched `payload`.
    pub(crate) fn staged(&self, payload: PoolOffset) -> Option<BlockInfo> {
        self.staged
            .iter()
            .rev()
            .find(|(offset, _)| *offset == payload)
            .map(|(_, block)| *block)
    }

    /// Release the region, keeping the undo log and the staged updates.
    pub(crate) fn finish(self) -> TxLog {
        TxLog {
            undo: self.undo,
            staged: self.staged,
        }
    }

    pub(crate) fn rollback(self) {
        restore(self.region, self.undo);
    }
}

fn restore(region: &mut [u8], undo: Vec<(usize, Vec<u8>)>) {
    for (at, original) in undo.into_iter().rev() {
        region[at..at + original.len()].copy_from_slice(&original);
    }
}
