//! Metadata key/value store interface and an in-memory implementation.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{FileAttributes, Gfid};
use crate::error::Status;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata not found for gfid {0}")]
    NotFound(Gfid),

    #[error("file {0} is laminated")]
    Laminated(Gfid),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MetadataError {
    pub fn status(&self) -> Status {
        match self {
            MetadataError::NotFound(_) => Status::NotFound,
            MetadataError::Laminated(_) => Status::Laminated,
            MetadataError::Internal(_) => Status::Failure,
        }
    }
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// Key/value store of file attributes keyed by gfid
pub trait MetadataStore: Send + Sync {
    fn get(&self, gfid: Gfid) -> MetadataResult<FileAttributes>;

    /// Store `attrs`.
    ///
    /// For an existing entry the name, mode, ownership and times are merged;
    /// the size is taken from `attrs` only with `set_size` and lamination only
    /// with `set_laminate`. A laminated entry can never be un-laminated or
    /// resized. A missing entry is created with size 0 and not laminated
    /// unless the respective flag is set.
    fn set(&self, attrs: &FileAttributes, set_size: bool, set_laminate: bool) -> MetadataResult<()>;

    /// Update the size of an existing entry
    fn set_size(&self, gfid: Gfid, size: u64) -> MetadataResult<()>;

    /// Grow an existing entry to at least `size` bytes; returns the new size.
    /// Never shrinks. Growing a laminated entry fails.
    fn extend_size(&self, gfid: Gfid, size: u64) -> MetadataResult<u64>;

    /// Mark an existing entry laminated (idempotent)
    fn laminate(&self, gfid: Gfid) -> MetadataResult<()>;

    fn remove(&self, gfid: Gfid) -> MetadataResult<()>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    entries: RwLock<HashMap<Gfid, FileAttributes>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn get(&self, gfid: Gfid) -> MetadataResult<FileAttributes> {
        self.entries
            .read()
            .get(&gfid)
            .cloned()
            .ok_or(MetadataError::NotFound(gfid))
    }

    fn set(&self, attrs: &FileAttributes, set_size: bool, set_laminate: bool) -> MetadataResult<()> {
        let mut entries = self.entries.write();
        match entries.get_mut(&attrs.gfid) {
            Some(existing) => {
                if existing.is_laminated {
                    if set_laminate && !attrs.is_laminated {
                        return Err(MetadataError::Laminated(attrs.gfid));
                    }
                    if set_size && attrs.size != existing.size {
                        return Err(MetadataError::Laminated(attrs.gfid));
                    }
                }
                existing.filename.clone_from(&attrs.filename);
                existing.mode = attrs.mode;
                existing.uid = attrs.uid;
                existing.gid = attrs.gid;
                existing.atime = attrs.atime;
                existing.mtime = attrs.mtime;
                existing.ctime = attrs.ctime;
                if set_size {
                    existing.size = attrs.size;
                }
                if set_laminate {
                    existing.is_laminated |= attrs.is_laminated;
                }
            }
            None => {
                let mut entry = attrs.clone();
                if !set_size {
                    entry.size = 0;
                }
                if !set_laminate {
                    entry.is_laminated = false;
                }
                entries.insert(attrs.gfid, entry);
            }
        }
        Ok(())
    }

    fn set_size(&self, gfid: Gfid, size: u64) -> MetadataResult<()> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(&gfid).ok_or(MetadataError::NotFound(gfid))?;
        if entry.is_laminated {
            return Err(MetadataError::Laminated(gfid));
        }
        entry.size = size;
        Ok(())
    }

    fn extend_size(&self, gfid: Gfid, size: u64) -> MetadataResult<u64> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(&gfid).ok_or(MetadataError::NotFound(gfid))?;
        if size > entry.size {
            if entry.is_laminated {
                return Err(MetadataError::Laminated(gfid));
            }
            entry.size = size;
        }
        Ok(entry.size)
    }

    fn laminate(&self, gfid: Gfid) -> MetadataResult<()> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(&gfid).ok_or(MetadataError::NotFound(gfid))?;
        entry.is_laminated = true;
        Ok(())
    }

    fn remove(&self, gfid: Gfid) -> MetadataResult<()> {
        self.entries
            .write()
            .remove(&gfid)
            .map(|_| ())
            .ok_or(MetadataError::NotFound(gfid))
    }
}
