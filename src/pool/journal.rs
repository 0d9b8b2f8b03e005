//! Rollback journal for file-backed pools.
//!
//! Before a transaction overwrites any byte of the mapped region, the
//! original bytes are appended here and synced. The journal is truncated
//! once the transaction's writes are flushed, which is the commit point. A
//! non-empty journal found on open belongs to a transaction that never
//! committed; replaying it in reverse restores the pre-transaction image.
//!
//! Record layout (little-endian):
//!
//! ```text
//! | region offset u64 | length u64 | crc32 u32 | original bytes |
//! ```
//!
//! The checksum covers the offset, the length and the bytes. Records are
//! synced before the write they describe, so a torn record at the tail
//! guards a write that never happened and is dropped.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{PoolError, PoolResult};

const RECORD_HEADER_LEN: usize = 20;

/// Journal file next to a pool file: `app.pool` keeps `app.pool.journal`.
pub(crate) fn journal_path(pool_path: &Path) -> PathBuf {
    let mut name = pool_path.as_os_str().to_owned();
    name.push(".journal");
    PathBuf::from(name)
}

#[derive(Debug)]
pub(crate) struct Journal {
    file: File,
    path: PathBuf,
    len: u64,
}

impl Journal {
    /// Open or create the journal at `path`, keeping whatever it holds.
    pub(crate) fn open(path: impl Into<PathBuf>) -> PoolResult<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, path, len })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Durably record the bytes currently at `at` before they change.
    pub(crate) fn append(&mut self, at: u64, original: &[u8]) -> PoolResult<()> {
        let record = encode_record(at, original);
        self.file.write_all(&record)?;
        self.file.sync_data()?;
        self.len += record.len() as u64;
        Ok(())
    }

    /// Drop every record. After this returns the pool image on media is the
    /// committed one.
    pub(crate) fn clear(&mut self) -> PoolResult<()> {
        if self.len == 0 {
            return Ok(());
        }
        self.file.set_len(0)?;
        self.file.sync_data()?;
        self.len = 0;
        Ok(())
    }

    /// Undo an unfinished transaction in `region`. Returns how many records
    /// were applied. The journal itself is left untouched; callers clear it
    /// once the restored region is flushed.
    pub(crate) fn roll_back(&mut self, region: &mut [u8]) -> PoolResult<usize> {
        let records = self.records()?;
        for (at, original) in records.iter().rev() {
            let end = at
                .checked_add(original.len())
                .filter(|end| *end <= region.len())
                .ok_or_else(|| {
                    PoolError::InvalidPool(format!(
                        "journal record at {at:#x} ({} bytes) lies outside the pool",
                        original.len()
                    ))
                })?;
            region[*at..end].copy_from_slice(original);
        }
        if !records.is_empty() {
            debug!(
                "Replayed {} journal record(s) from {}",
                records.len(),
                self.path.display()
            );
        }
        Ok(records.len())
    }

    fn records(&mut self) -> PoolResult<Vec<(usize, Vec<u8>)>> {
        let mut raw = Vec::with_capacity(self.len as usize);
        let mut reader = File::open(&self.path)?;
        reader.read_to_end(&mut raw)?;

        let mut records = Vec::new();
        let mut rest = &raw[..];
        while let Some((record, tail)) = decode_record(rest) {
            records.push(record);
            rest = tail;
        }
        if !rest.is_empty() {
            warn!(
                "Ignoring {} torn byte(s) at the end of {}",
                rest.len(),
                self.path.display()
            );
        }
        Ok(records)
    }
}

fn encode_record(at: u64, original: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(RECORD_HEADER_LEN + original.len());
    record.extend_from_slice(&at.to_le_bytes());
    record.extend_from_slice(&(original.len() as u64).to_le_bytes());
    let crc = checksum(&record[..16], original);
    record.extend_from_slice(&crc.to_le_bytes());
    record.extend_from_slice(original);
    record
}

fn decode_record(bytes: &[u8]) -> Option<((usize, Vec<u8>), &[u8])> {
    let header = bytes.get(..RECORD_HEADER_LEN)?;
    let at = u64::from_le_bytes(header[0..8].try_into().ok()?);
    let len = u64::from_le_bytes(header[8..16].try_into().ok()?);
    let crc = u32::from_le_bytes(header[16..20].try_into().ok()?);

    let end = RECORD_HEADER_LEN.checked_add(usize::try_from(len).ok()?)?;
    let original = bytes.get(RECORD_HEADER_LEN..end)?;
    if checksum(&header[..16], original) != crc {
        return None;
    }
    Some(((usize::try_from(at).ok()?, original.to_vec()), &bytes[end..]))
}

fn checksum(header: &[u8], original: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header);
    hasher.update(original);
    hasher.finalize()
}
