//! Write index a client keeps in its superblock region.
//!
//! ```text
//! metadata_offset
//! ┌────────────┬─────────────────┬─────────────────┬─────
//! │ count: u64 │ WriteIndexEntry │ WriteIndexEntry │ ...
//! └────────────┴─────────────────┴─────────────────┴─────
//! ```
//!
//! The client appends one entry per write and bumps `count`. A sync drains
//! the entries on the server side and sets `count` back to zero. The client
//! does not append while its sync RPC is outstanding.

use std::sync::atomic::{AtomicU64, Ordering};

use zerocopy::{FromBytes, IntoBytes};

use super::{SharedMemoryRegion, ShmError};
use crate::metadata::Gfid;

/// One write recorded by the client
#[repr(C)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    zerocopy::FromBytes,
    zerocopy::IntoBytes,
    zerocopy::KnownLayout,
    zerocopy::Immutable,
)]
pub struct WriteIndexEntry {
    pub gfid: u64,
    /// Offset of the write within the file
    pub file_pos: u64,
    /// Offset of the data within the client's log
    pub log_pos: u64,
    pub length: u64,
}

const _: () = assert!(std::mem::size_of::<WriteIndexEntry>() == 32);

impl WriteIndexEntry {
    pub const SIZE: usize = std::mem::size_of::<WriteIndexEntry>();

    pub fn new(gfid: Gfid, file_pos: u64, log_pos: u64, length: u64) -> Self {
        Self {
            gfid,
            file_pos,
            log_pos,
            length,
        }
    }

    /// First file offset past this write
    pub fn end(&self) -> u64 {
        self.file_pos.saturating_add(self.length)
    }
}

const COUNT_SIZE: usize = std::mem::size_of::<u64>();

/// View of the write index inside a superblock region
pub struct WriteIndex<'a> {
    region: &'a SharedMemoryRegion,
    offset: usize,
    capacity: usize,
}

impl<'a> WriteIndex<'a> {
    /// Locate the index occupying `size` bytes at `offset` of `region`
    pub fn open(region: &'a SharedMemoryRegion, offset: usize, size: usize) -> Result<Self, ShmError> {
        if offset % std::mem::align_of::<AtomicU64>() != 0 {
            return Err(ShmError::MisalignedIndex {
                name: region.name().to_string(),
                offset,
            });
        }
        let fits = size >= COUNT_SIZE
            && offset
                .checked_add(size)
                .is_some_and(|end| end <= region.size());
        if !fits {
            return Err(ShmError::IndexOutOfBounds {
                name: region.name().to_string(),
                offset,
                size,
                region_size: region.size(),
            });
        }
        Ok(Self {
            region,
            offset,
            capacity: (size - COUNT_SIZE) / WriteIndexEntry::SIZE,
        })
    }

    /// Number of entries the index area can hold
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn count(&self) -> &AtomicU64 {
        // SAFETY: `open` checked that the counter lies inside the mapping and
        // is 8-byte aligned (mappings are page aligned).
        unsafe { &*(self.region.as_ptr().add(self.offset) as *const AtomicU64) }
    }

    /// Entry count as published by the client
    pub fn pending(&self) -> u64 {
        self.count().load(Ordering::Acquire)
    }

    /// Copy out the recorded entries. A count past capacity is clamped.
    pub fn entries(&self) -> Vec<WriteIndexEntry> {
        let n = self.pending().min(self.capacity as u64) as usize;
        // SAFETY: the records lie inside the index area checked by `open`.
        let records = unsafe { self.region.bytes_from(self.offset + COUNT_SIZE) };
        records[..n * WriteIndexEntry::SIZE]
            .chunks_exact(WriteIndexEntry::SIZE)
            .filter_map(|chunk| WriteIndexEntry::read_from_bytes(chunk).ok())
            .collect()
    }

    /// Append one entry, as the client does after a write
    pub fn push(&self, entry: WriteIndexEntry) -> Result<(), ShmError> {
        let n = self.pending() as usize;
        if n >= self.capacity {
            return Err(ShmError::IndexFull {
                name: self.region.name().to_string(),
                capacity: self.capacity,
            });
        }
        let at = self.offset + COUNT_SIZE + n * WriteIndexEntry::SIZE;
        // SAFETY: `n < capacity`, so the record ends inside the index area.
        unsafe {
            std::ptr::copy_nonoverlapping(
                entry.as_bytes().as_ptr(),
                self.region.as_ptr().add(at),
                WriteIndexEntry::SIZE,
            );
        }
        self.count().store(n as u64 + 1, Ordering::Release);
        Ok(())
    }

    /// Mark every entry consumed
    pub fn clear(&self) {
        self.count().store(0, Ordering::Release);
    }
}
