//! Memory-mapped first-fit arena implementing [`ObjectPool`].
//!
//! Region layout (all integers little-endian):
//!
//! ```text
//! 0        8          16           24         32       64
//! | magic  | capacity | root off   | root size | cursor | reserved |
//! 64: [block header (32 bytes) | payload (16-byte padded)] ...
//! ```
//!
//! A block header holds the padded payload capacity, the requested size,
//! the type number and [`BlockFlags`]. Pool offsets always point at a
//! payload. The root descriptor fields in the pool header are the pool's
//! well-known anchor.
//!
//! File-backed pools keep a rollback journal next to the pool file (see
//! [`journal`](super::journal)). Opening a pool replays any journal left
//! by a transaction that did not reach its commit point, so after a crash
//! the image is either the state before that transaction or the state
//! after it.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use log::{debug, info, trace, warn};
use memmap2::MmapMut;
use parking_lot::Mutex;

use super::fault::FaultInjector;
use super::journal::{journal_path, Journal};
use super::tx::{Transaction, TxLog};
use super::{ObjectPool, PoolOffset, RootDescriptor, TypeNum, ROOT_TYPE_NUM};
use crate::error::{PoolError, PoolResult};

pub const POOL_MAGIC: &[u8; 8] = b"PMROOT01";
pub const POOL_HEADER_LEN: u64 = 64;
pub const BLOCK_HEADER_LEN: u64 = 32;

const ALIGN: u64 = 16;
const SCRUB_LEN: u64 = 16;

const CAPACITY_AT: usize = 8;
const ROOT_OFFSET_AT: usize = 16;
const ROOT_SIZE_AT: usize = 24;
const CURSOR_AT: usize = 32;

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct BlockFlags: u32 {
        const ALLOCATED = 0b0001;
    }
}

/// In-memory copy of a block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockInfo {
    pub capacity: u64,
    pub size: u64,
    pub type_num: TypeNum,
    pub allocated: bool,
}

impl BlockInfo {
    fn encode(&self) -> [u8; BLOCK_HEADER_LEN as usize] {
        let mut bytes = [0u8; BLOCK_HEADER_LEN as usize];
        let flags = if self.allocated {
            BlockFlags::ALLOCATED
        } else {
            BlockFlags::empty()
        };
        bytes[0..8].copy_from_slice(&self.capacity.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.size.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.type_num.to_le_bytes());
        bytes[20..24].copy_from_slice(&flags.bits().to_le_bytes());
        bytes
    }

    fn decode(bytes: &[u8]) -> Self {
        let flags = BlockFlags::from_bits_truncate(read_u32(bytes, 20));
        Self {
            capacity: read_u64(bytes, 0),
            size: read_u64(bytes, 8),
            type_num: read_u32(bytes, 16),
            allocated: flags.contains(BlockFlags::ALLOCATED),
        }
    }
}

/// Point-in-time usage figures for an [`ArenaPool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: u64,
    /// High-water mark of the bump cursor
    pub cursor: u64,
    pub live_objects: usize,
    pub free_blocks: usize,
    /// Sum of requested sizes of live allocations
    pub allocated_bytes: u64,
}

#[derive(Debug)]
struct ArenaInner {
    map: MmapMut,
    index: BTreeMap<PoolOffset, BlockInfo>,
    /// Backing file; `None` for anonymous pools
    path: Option<PathBuf>,
    journal: Option<Journal>,
}

impl ArenaInner {
    /// Run `f` as one transaction. Staged index updates are applied only
    /// once the writes are durable. On any error, including a failed flush,
    /// every logged write is undone and the index is left as it was.
    fn transaction<R>(
        &mut self,
        faults: &FaultInjector,
        f: impl FnOnce(&mut Transaction<'_>, &BTreeMap<PoolOffset, BlockInfo>) -> PoolResult<R>,
    ) -> PoolResult<R> {
        let mut tx = Transaction::new(&mut self.map[..], self.journal.as_mut());
        let outcome = f(&mut tx, &self.index);
        let log = tx.finish();

        match outcome.and_then(|value| self.commit(faults).map(|()| value)) {
            Ok(value) => {
                self.index.extend(log.staged);
                Ok(value)
            }
            Err(err) => {
                self.abort(log);
                Err(err)
            }
        }
    }

    /// Flush the region, then clear the journal. Clearing the journal is the
    /// commit point of a file-backed transaction.
    fn commit(&mut self, faults: &FaultInjector) -> PoolResult<()> {
        if faults.take_sync_failure() {
            return Err(PoolError::Io(io::Error::other("injected sync failure")));
        }
        if let Some(journal) = self.journal.as_mut() {
            self.map.flush()?;
            journal.clear()?;
        }
        Ok(())
    }

    fn abort(&mut self, log: TxLog) {
        log.restore(&mut self.map[..]);
        if let Some(journal) = self.journal.as_mut() {
            // The journal still leads back to the restored image; it may only
            // be cleared once that image is on media.
            let durable = self
                .map
                .flush()
                .map_err(PoolError::from)
                .and_then(|()| journal.clear());
            if let Err(err) = durable {
                warn!("Rolled back transaction is not durable yet: {err}");
            }
        }
    }

    fn persist(&self) -> PoolResult<()> {
        if self.journal.is_some() {
            self.map.flush()?;
        }
        Ok(())
    }

    fn live_block(&self, offset: PoolOffset) -> PoolResult<BlockInfo> {
        self.index
            .get(&offset)
            .copied()
            .filter(|block| block.allocated)
            .ok_or(PoolError::ObjectNotFound(offset))
    }
}

/// Reference [`ObjectPool`] backed by a single memory map.
///
/// Every operation takes the pool lock, so transactions are serialized
/// against each other and against readers.
///
/// # Examples
///
/// ```
/// use pmroot::pool::{ArenaPool, ObjectPool, GENERIC_TYPE_NUM};
///
/// let pool = ArenaPool::anonymous(64 * 1024).unwrap();
/// let object = pool.allocate(GENERIC_TYPE_NUM, 24).unwrap();
///
/// assert_eq!(pool.objects_of_type(GENERIC_TYPE_NUM), vec![object]);
/// pool.free(object).unwrap();
/// assert!(pool.objects_of_type(GENERIC_TYPE_NUM).is_empty());
/// ```
#[derive(Debug)]
pub struct ArenaPool {
    inner: Mutex<ArenaInner>,
    faults: FaultInjector,
}

impl ArenaPool {
    /// Smallest capacity that can hold one 16-byte object.
    pub const MIN_CAPACITY: u64 = POOL_HEADER_LEN + BLOCK_HEADER_LEN + ALIGN;

    /// Create a pool over anonymous memory. Contents do not outlive the
    /// process.
    pub fn anonymous(capacity: u64) -> PoolResult<Self> {
        let len = checked_len(capacity)?;
        let mut map = MmapMut::map_anon(len)?;
        format_region(&mut map, capacity);
        debug!("Created anonymous pool of {} bytes", capacity);
        Ok(Self::from_parts(map, BTreeMap::new(), None, None))
    }

    /// Create and format a new pool file. Fails if `path` already exists.
    pub fn create(path: impl AsRef<Path>, capacity: u64) -> PoolResult<Self> {
        let path = path.as_ref();
        checked_len(capacity)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.set_len(capacity)?;
        // SAFETY: the file was just created by us and is only mapped here.
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        format_region(&mut map, capacity);
        map.flush()?;

        // A journal left behind by an earlier pool at this path is stale.
        let mut journal = Journal::open(journal_path(path))?;
        journal.clear()?;

        info!("Created pool {} ({} bytes)", path.display(), capacity);
        Ok(Self::from_parts(
            map,
            BTreeMap::new(),
            Some(path.to_path_buf()),
            Some(journal),
        ))
    }

    /// Map an existing pool file, roll back any unfinished transaction and
    /// rebuild the allocation index.
    pub fn open(path: impl AsRef<Path>) -> PoolResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        // SAFETY: the pool file is owned by this process for its lifetime.
        let mut map = unsafe { MmapMut::map_mut(&file)? };

        let mut journal = Journal::open(journal_path(path))?;
        if !journal.is_empty() {
            let replayed = journal.roll_back(&mut map[..])?;
            map.flush()?;
            journal.clear()?;
            warn!(
                "Rolled back unfinished transaction in {} ({} journal record(s))",
                path.display(),
                replayed
            );
        }

        let (index, uncommitted_tail) = load_index(&map)?;
        if let Some(cursor) = uncommitted_tail {
            warn!(
                "Discarding uncommitted allocation tail in {} (cursor reset to {:#x})",
                path.display(),
                cursor
            );
            map[CURSOR_AT..CURSOR_AT + 8].copy_from_slice(&cursor.to_le_bytes());
            map.flush()?;
        }

        info!(
            "Opened pool {} ({} bytes, {} blocks)",
            path.display(),
            map.len(),
            index.len()
        );
        Ok(Self::from_parts(
            map,
            index,
            Some(path.to_path_buf()),
            Some(journal),
        ))
    }

    fn from_parts(
        map: MmapMut,
        index: BTreeMap<PoolOffset, BlockInfo>,
        path: Option<PathBuf>,
        journal: Option<Journal>,
    ) -> Self {
        Self {
            inner: Mutex::new(ArenaInner {
                map,
                index,
                path,
                journal,
            }),
            faults: FaultInjector::new(),
        }
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Backing file, if the pool is file-backed.
    pub fn path(&self) -> Option<PathBuf> {
        self.inner.lock().path.clone()
    }

    /// Flush the whole region to its backing file.
    pub fn flush(&self) -> PoolResult<()> {
        self.inner.lock().persist()
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        let mut stats = PoolStats {
            capacity: inner.map.len() as u64,
            cursor: read_u64(&inner.map, CURSOR_AT),
            ..PoolStats::default()
        };
        for block in inner.index.values() {
            if block.allocated {
                stats.live_objects += 1;
                stats.allocated_bytes += block.size;
            } else {
                stats.free_blocks += 1;
            }
        }
        stats
    }

    /// Copy of a live object's payload.
    pub fn read_bytes(&self, offset: PoolOffset) -> PoolResult<Vec<u8>> {
        self.with_object(offset, <[u8]>::to_vec)
    }
}

impl ObjectPool for ArenaPool {
    fn capacity(&self) -> u64 {
        self.inner.lock().map.len() as u64
    }

    fn root(&self) -> Option<RootDescriptor> {
        let inner = self.inner.lock();
        let offset = read_u64(&inner.map, ROOT_OFFSET_AT);
        (offset != 0).then(|| RootDescriptor {
            offset,
            size: read_u64(&inner.map, ROOT_SIZE_AT),
        })
    }

    fn install_root(&self, size: u64) -> PoolResult<RootDescriptor> {
        let faults = &self.faults;
        let descriptor = self.inner.lock().transaction(faults, |tx, index| {
            let existing = tx.read_u64(ROOT_OFFSET_AT);
            if existing != 0 {
                return Err(PoolError::RootAlreadyExists(existing));
            }
            let offset = allocate_in(tx, index, faults, ROOT_TYPE_NUM, size)?;
            tx.write_u64(ROOT_SIZE_AT, size)?;
            tx.write_u64(ROOT_OFFSET_AT, offset)?;
            Ok(RootDescriptor { offset, size })
        })?;
        debug!(
            "Installed root descriptor at {:#x} ({} bytes)",
            descriptor.offset, descriptor.size
        );
        Ok(descriptor)
    }

    fn allocate(&self, type_num: TypeNum, size: u64) -> PoolResult<PoolOffset> {
        let faults = &self.faults;
        self.inner
            .lock()
            .transaction(faults, |tx, index| allocate_in(tx, index, faults, type_num, size))
    }

    fn objects_of_type(&self, type_num: TypeNum) -> Vec<PoolOffset> {
        self.inner
            .lock()
            .index
            .iter()
            .filter(|(_, block)| block.allocated && block.type_num == type_num)
            .map(|(offset, _)| *offset)
            .collect()
    }

    fn with_object<R>(&self, offset: PoolOffset, f: impl FnOnce(&[u8]) -> R) -> PoolResult<R> {
        let inner = self.inner.lock();
        let block = inner.live_block(offset)?;
        let start = offset as usize;
        Ok(f(&inner.map[start..start + block.size as usize]))
    }

    fn update<R>(
        &self,
        offset: PoolOffset,
        f: impl FnOnce(&mut [u8]) -> PoolResult<R>,
    ) -> PoolResult<R> {
        let mut inner = self.inner.lock();
        let block = inner.live_block(offset)?;
        inner.transaction(&self.faults, |tx, _| {
            f(tx.bytes_mut(offset as usize, block.size as usize)?)
        })
    }

    fn free_if(
        &self,
        offset: PoolOffset,
        predicate: impl FnOnce(&[u8]) -> bool,
    ) -> PoolResult<bool> {
        let faults = &self.faults;
        let mut inner = self.inner.lock();
        let block = inner.live_block(offset)?;
        let freed = inner.transaction(faults, |tx, _| {
            if tx.read_u64(ROOT_OFFSET_AT) == offset {
                return Err(PoolError::TransactionAborted(format!(
                    "root region at {offset:#x} cannot be freed"
                )));
            }
            if !predicate(tx.read(offset as usize, block.size as usize)) {
                return Ok(false);
            }
            tx.zero(offset as usize, SCRUB_LEN.min(block.capacity) as usize)?;
            if faults.take_free_failure(offset) {
                return Err(PoolError::ReclaimFailed {
                    offset,
                    reason: "injected fault before commit".into(),
                });
            }
            let released = BlockInfo {
                allocated: false,
                ..block
            };
            tx.write(block_start(offset), &released.encode())?;
            tx.stage(offset, released);
            Ok(true)
        })?;
        if freed {
            trace!("Freed object at {:#x} ({} bytes)", offset, block.size);
        }
        Ok(freed)
    }
}

/// Allocate inside an open transaction: first-fit over freed blocks,
/// splitting when the remainder can hold another block, else bump.
///
/// Block headers are written before the cursor moves.
fn allocate_in(
    tx: &mut Transaction<'_>,
    index: &BTreeMap<PoolOffset, BlockInfo>,
    faults: &FaultInjector,
    type_num: TypeNum,
    size: u64,
) -> PoolResult<PoolOffset> {
    let failed = |reason: &str| PoolError::AllocationFailed {
        requested: size,
        reason: reason.to_string(),
    };
    if size == 0 {
        return Err(failed("zero-sized allocation"));
    }
    if faults.take_allocation_failure() {
        return Err(failed("injected fault"));
    }
    let padded = align_up(size).ok_or_else(|| failed("size overflow"))?;

    let reusable = index
        .iter()
        .find(|(payload, block)| {
            !block.allocated && block.capacity >= padded && tx.staged(**payload).is_none()
        })
        .map(|(payload, block)| (*payload, *block));

    let (payload, capacity, new_cursor) = match reusable {
        Some((payload, free)) => {
            let spare = free.capacity - padded;
            if spare >= BLOCK_HEADER_LEN + ALIGN {
                let rest = BlockInfo {
                    capacity: spare - BLOCK_HEADER_LEN,
                    size: 0,
                    type_num: free.type_num,
                    allocated: false,
                };
                let rest_payload = payload + padded + BLOCK_HEADER_LEN;
                tx.write(block_start(rest_payload), &rest.encode())?;
                tx.stage(rest_payload, rest);
                (payload, padded, None)
            } else {
                (payload, free.capacity, None)
            }
        }
        None => {
            let cursor = tx.read_u64(CURSOR_AT);
            let pool_capacity = tx.read_u64(CAPACITY_AT);
            let end = cursor
                .checked_add(BLOCK_HEADER_LEN + padded)
                .filter(|end| *end <= pool_capacity)
                .ok_or_else(|| failed("pool exhausted"))?;
            (cursor + BLOCK_HEADER_LEN, padded, Some(end))
        }
    };

    let block = BlockInfo {
        capacity,
        size,
        type_num,
        allocated: true,
    };
    tx.write(block_start(payload), &block.encode())?;
    // The payload was free or past the cursor, so no committed state sees it.
    tx.zero_unreachable(payload as usize, capacity as usize);
    tx.stage(payload, block);
    if let Some(end) = new_cursor {
        tx.write_u64(CURSOR_AT, end)?;
    }
    Ok(payload)
}

fn format_region(map: &mut [u8], capacity: u64) {
    map[..POOL_HEADER_LEN as usize].fill(0);
    map[0..8].copy_from_slice(POOL_MAGIC);
    map[CAPACITY_AT..CAPACITY_AT + 8].copy_from_slice(&capacity.to_le_bytes());
    map[CURSOR_AT..CURSOR_AT + 8].copy_from_slice(&POOL_HEADER_LEN.to_le_bytes());
}

/// Validate the pool header and walk every block up to the cursor.
///
/// If everything from a block boundary up to the cursor is zero, that span
/// was reserved by an allocation that never wrote its header. It is dropped
/// and the returned cursor says where the walk stopped.
fn load_index(map: &[u8]) -> PoolResult<(BTreeMap<PoolOffset, BlockInfo>, Option<u64>)> {
    let invalid = |msg: String| PoolError::InvalidPool(msg);
    if (map.len() as u64) < POOL_HEADER_LEN || &map[0..8] != POOL_MAGIC {
        return Err(invalid("missing pool magic".into()));
    }
    let capacity = read_u64(map, CAPACITY_AT);
    if capacity != map.len() as u64 {
        return Err(invalid(format!(
            "recorded capacity {capacity} does not match mapped length {}",
            map.len()
        )));
    }
    let cursor = read_u64(map, CURSOR_AT);
    if cursor < POOL_HEADER_LEN || cursor > capacity {
        return Err(invalid(format!("cursor {cursor} out of bounds")));
    }

    let mut index = BTreeMap::new();
    let mut at = POOL_HEADER_LEN;
    let mut uncommitted_tail = None;
    while at < cursor {
        let payload = at + BLOCK_HEADER_LEN;
        if payload > cursor {
            return Err(invalid(format!("truncated block header at {at:#x}")));
        }
        if map[at as usize..cursor as usize].iter().all(|byte| *byte == 0) {
            uncommitted_tail = Some(at);
            break;
        }
        let block = BlockInfo::decode(&map[at as usize..payload as usize]);
        let end = payload.checked_add(block.capacity);
        if block.capacity == 0
            || block.capacity % ALIGN != 0
            || block.size > block.capacity
            || end.is_none_or(|end| end > cursor)
        {
            return Err(invalid(format!("corrupt block header at {at:#x}")));
        }
        index.insert(payload, block);
        at = payload + block.capacity;
    }

    let root = read_u64(map, ROOT_OFFSET_AT);
    if root != 0 && !index.get(&root).is_some_and(|block| block.allocated) {
        return Err(invalid(format!("root descriptor points at {root:#x}, not a live block")));
    }
    Ok((index, uncommitted_tail))
}

fn checked_len(capacity: u64) -> PoolResult<usize> {
    if capacity < ArenaPool::MIN_CAPACITY {
        return Err(PoolError::InvalidPool(format!(
            "capacity {capacity} is below the minimum of {}",
            ArenaPool::MIN_CAPACITY
        )));
    }
    usize::try_from(capacity)
        .map_err(|_| PoolError::InvalidPool(format!("capacity {capacity} exceeds address space")))
}

fn align_up(size: u64) -> Option<u64> {
    size.checked_add(ALIGN - 1).map(|n| n & !(ALIGN - 1))
}

fn block_start(payload: PoolOffset) -> usize {
    (payload - BLOCK_HEADER_LEN) as usize
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(word)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::GENERIC_TYPE_NUM;

    fn pool() -> ArenaPool {
        ArenaPool::anonymous(16 * 1024).unwrap()
    }

    #[test]
    fn allocations_are_zeroed_and_listed_in_offset_order() {
        let pool = pool();
        let a = pool.allocate(GENERIC_TYPE_NUM, 24).unwrap();
        let b = pool.allocate(GENERIC_TYPE_NUM, 8).unwrap();
        let other = pool.allocate(7, 8).unwrap();

        assert_eq!(a, POOL_HEADER_LEN + BLOCK_HEADER_LEN);
        assert!(b > a);
        assert_eq!(pool.objects_of_type(GENERIC_TYPE_NUM), vec![a, b]);
        assert_eq!(pool.objects_of_type(7), vec![other]);
        assert_eq!(pool.read_bytes(a).unwrap(), vec![0u8; 24]);
    }

    #[test]
    fn exhaustion_fails_without_moving_the_cursor() {
        let pool = ArenaPool::anonymous(ArenaPool::MIN_CAPACITY).unwrap();
        let before = pool.stats();
        let err = pool.allocate(GENERIC_TYPE_NUM, 64).unwrap_err();
        assert!(matches!(err, PoolError::AllocationFailed { requested: 64, .. }));
        assert_eq!(pool.stats(), before);
        assert!(pool.allocate(GENERIC_TYPE_NUM, 16).is_ok());
    }

    #[test]
    fn freed_blocks_are_reused_and_split() {
        let pool = pool();
        let big = pool.allocate(GENERIC_TYPE_NUM, 256).unwrap();
        let tail = pool.allocate(GENERIC_TYPE_NUM, 16).unwrap();
        pool.free(big).unwrap();

        let small = pool.allocate(GENERIC_TYPE_NUM, 32).unwrap();
        assert_eq!(small, big);
        let rest = pool.allocate(GENERIC_TYPE_NUM, 64).unwrap();
        assert_eq!(rest, big + 32 + BLOCK_HEADER_LEN);
        assert!(rest < tail);
    }

    #[test]
    fn update_rolls_back_on_error() {
        let pool = pool();
        let obj = pool.allocate(GENERIC_TYPE_NUM, 16).unwrap();
        let result: PoolResult<()> = pool.update(obj, |bytes| {
            bytes.fill(0xFF);
            Err(PoolError::TransactionAborted("test".into()))
        });
        assert!(result.is_err());
        assert_eq!(pool.read_bytes(obj).unwrap(), vec![0u8; 16]);
    }

    #[test]
    fn injected_free_failure_restores_scrubbed_header() {
        let pool = pool();
        let obj = pool.allocate(GENERIC_TYPE_NUM, 32).unwrap();
        pool.update(obj, |bytes| {
            bytes.fill(0xAB);
            Ok(())
        })
        .unwrap();

        pool.faults().fail_next_frees(1);
        let err = pool.free(obj).unwrap_err();
        assert!(matches!(err, PoolError::ReclaimFailed { offset, .. } if offset == obj));
        assert_eq!(pool.read_bytes(obj).unwrap(), vec![0xAB; 32]);
        assert_eq!(pool.objects_of_type(GENERIC_TYPE_NUM), vec![obj]);
    }

    #[test]
    fn free_if_leaves_object_when_predicate_fails() {
        let pool = pool();
        let obj = pool.allocate(GENERIC_TYPE_NUM, 16).unwrap();
        assert!(!pool.free_if(obj, |_| false).unwrap());
        assert!(pool.free_if(obj, |_| true).unwrap());
        assert!(matches!(pool.free(obj), Err(PoolError::ObjectNotFound(o)) if o == obj));
    }

    #[test]
    fn root_is_installed_once_and_cannot_be_freed() {
        let pool = pool();
        assert!(pool.root().is_none());
        let root = pool.install_root(4096).unwrap();
        assert_eq!(pool.root(), Some(root));
        assert!(matches!(
            pool.install_root(64),
            Err(PoolError::RootAlreadyExists(o)) if o == root.offset
        ));
        assert!(pool.free(root.offset).is_err());
        assert!(pool.objects_of_type(GENERIC_TYPE_NUM).is_empty());
    }

    #[test]
    fn failed_root_install_leaves_no_descriptor() {
        let pool = pool();
        pool.faults().fail_next_allocations(1);
        assert!(matches!(
            pool.install_root(128),
            Err(PoolError::AllocationFailed { .. })
        ));
        assert!(pool.root().is_none());
        assert_eq!(pool.stats().cursor, POOL_HEADER_LEN);
    }

    #[test]
    fn file_backed_pool_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.pm");

        let (root, obj) = {
            let pool = ArenaPool::create(&path, 32 * 1024).unwrap();
            let root = pool.install_root(512).unwrap();
            let obj = pool.allocate(GENERIC_TYPE_NUM, 16).unwrap();
            pool.update(obj, |bytes| {
                bytes[0] = 7;
                Ok(())
            })
            .unwrap();
            (root, obj)
        };

        let reopened = ArenaPool::open(&path).unwrap();
        assert_eq!(reopened.root(), Some(root));
        assert_eq!(reopened.objects_of_type(GENERIC_TYPE_NUM), vec![obj]);
        assert_eq!(reopened.read_bytes(obj).unwrap()[0], 7);
        assert_eq!(reopened.path(), Some(path));
    }

    #[test]
    fn opening_garbage_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.pm");
        std::fs::write(&path, vec![0x5Au8; 4096]).unwrap();
        assert!(matches!(ArenaPool::open(&path), Err(PoolError::InvalidPool(_))));
    }

    #[test]
    fn tiny_capacities_are_rejected() {
        assert!(matches!(
            ArenaPool::anonymous(32),
            Err(PoolError::InvalidPool(_))
        ));
    }

    /// Run `body` as a transaction on `pool`, flush everything it wrote and
    /// stop before the commit point, as if the process died there.
    fn interrupt<F>(pool: ArenaPool, body: F)
    where
        F: FnOnce(
            &mut Transaction<'_>,
            &BTreeMap<PoolOffset, BlockInfo>,
            &FaultInjector,
        ) -> PoolResult<()>,
    {
        let faults = FaultInjector::new();
        let mut inner = pool.inner.into_inner();
        {
            let ArenaInner {
                map,
                index,
                journal,
                ..
            } = &mut inner;
            let mut tx = Transaction::new(&mut map[..], journal.as_mut());
            body(&mut tx, &*index, &faults).unwrap();
        }
        inner.map.flush().unwrap();
    }

    fn file_pool(dir: &tempfile::TempDir) -> (PathBuf, ArenaPool) {
        let path = dir.path().join("crash.pm");
        let pool = ArenaPool::create(&path, 32 * 1024).unwrap();
        (path, pool)
    }

    #[test]
    fn interrupted_free_is_rolled_back_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let (path, pool) = file_pool(&dir);
        pool.install_root(256).unwrap();
        let obj = pool.allocate(GENERIC_TYPE_NUM, 32).unwrap();
        pool.update(obj, |bytes| {
            bytes.fill(0xAB);
            Ok(())
        })
        .unwrap();
        drop(pool);

        let pool = ArenaPool::open(&path).unwrap();
        interrupt(
            pool,
            move |tx, index, _| {
                let block = index[&obj];
                tx.zero(obj as usize, SCRUB_LEN as usize)?;
                let released = BlockInfo {
                    allocated: false,
                    ..block
                };
                tx.write(block_start(obj), &released.encode())
            },
        );
        assert!(std::fs::metadata(journal_path(&path)).unwrap().len() > 0);

        let reopened = ArenaPool::open(&path).unwrap();
        assert_eq!(reopened.objects_of_type(GENERIC_TYPE_NUM), vec![obj]);
        assert_eq!(reopened.read_bytes(obj).unwrap(), vec![0xAB; 32]);
        assert_eq!(std::fs::metadata(journal_path(&path)).unwrap().len(), 0);
    }

    #[test]
    fn interrupted_allocation_leaves_no_block_behind() {
        let dir = tempfile::tempdir().unwrap();
        let (path, pool) = file_pool(&dir);
        let root = pool.install_root(128).unwrap();
        let obj = pool.allocate(GENERIC_TYPE_NUM, 16).unwrap();
        let before = pool.stats();

        interrupt(
            pool,
            |tx, index, faults| allocate_in(tx, index, faults, GENERIC_TYPE_NUM, 64).map(|_| ()),
        );

        let reopened = ArenaPool::open(&path).unwrap();
        assert_eq!(reopened.stats(), before);
        assert_eq!(reopened.root(), Some(root));
        assert_eq!(reopened.objects_of_type(GENERIC_TYPE_NUM), vec![obj]);
        assert_eq!(
            reopened.allocate(GENERIC_TYPE_NUM, 64).unwrap(),
            before.cursor + BLOCK_HEADER_LEN
        );
    }

    #[test]
    fn interrupted_root_install_leaves_no_root() {
        let dir = tempfile::tempdir().unwrap();
        let (path, pool) = file_pool(&dir);

        interrupt(
            pool,
            |tx, index, faults| {
                let offset = allocate_in(tx, index, faults, ROOT_TYPE_NUM, 512)?;
                tx.write_u64(ROOT_SIZE_AT, 512)?;
                tx.write_u64(ROOT_OFFSET_AT, offset)
            },
        );

        let reopened = ArenaPool::open(&path).unwrap();
        assert!(reopened.root().is_none());
        assert_eq!(reopened.stats().cursor, POOL_HEADER_LEN);
        assert_eq!(reopened.install_root(512).unwrap().size, 512);
    }

    #[test]
    fn failed_commit_leaves_object_live_and_unchanged() {
        let pool = pool();
        let obj = pool.allocate(GENERIC_TYPE_NUM, 32).unwrap();
        pool.update(obj, |bytes| {
            bytes.fill(0x11);
            Ok(())
        })
        .unwrap();

        pool.faults().fail_next_syncs(1);
        assert!(matches!(pool.free(obj), Err(PoolError::Io(_))));
        assert_eq!(pool.objects_of_type(GENERIC_TYPE_NUM), vec![obj]);
        assert_eq!(pool.read_bytes(obj).unwrap(), vec![0x11; 32]);

        pool.faults().fail_next_syncs(1);
        let before = pool.stats();
        assert!(pool.allocate(GENERIC_TYPE_NUM, 16).is_err());
        assert_eq!(pool.stats(), before);
    }

    #[test]
    fn failed_commit_on_file_pool_clears_journal() {
        let dir = tempfile::tempdir().unwrap();
        let (path, pool) = file_pool(&dir);
        let obj = pool.allocate(GENERIC_TYPE_NUM, 16).unwrap();

        pool.faults().fail_next_syncs(1);
        assert!(pool.free(obj).is_err());
        assert_eq!(std::fs::metadata(journal_path(&path)).unwrap().len(), 0);
        drop(pool);

        let reopened = ArenaPool::open(&path).unwrap();
        assert_eq!(reopened.objects_of_type(GENERIC_TYPE_NUM), vec![obj]);
    }

    #[test]
    fn stale_journal_is_discarded_on_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.pm");
        std::fs::write(journal_path(&path), b"leftover").unwrap();

        let pool = ArenaPool::create(&path, 16 * 1024).unwrap();
        assert_eq!(std::fs::metadata(journal_path(&path)).unwrap().len(), 0);
        drop(pool);
        assert!(ArenaPool::open(&path).is_ok());
    }
}
