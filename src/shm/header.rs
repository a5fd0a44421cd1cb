//! Control block at the start of a client's receive-buffer region.
//!
//! The header is a binary contract between two processes, so its layout is
//! `repr(C)` with a fixed field order and is stamped with a magic number and
//! a layout version. The lock is a process-shared pthread mutex: a
//! language-local lock would not be visible to the client process.

use std::cell::UnsafeCell;
use std::ptr::addr_of_mut;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};

use super::{SharedMemoryRegion, ShmError};
use crate::constants::{SHM_HEADER_MAGIC, SHM_HEADER_VERSION};

/// Lifecycle state of the receive buffer contents
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Nothing pending
    Empty = 0,
    /// Client has written, server has not consumed
    HoldingData = 1,
    /// As `HoldingData`, and the writer will refill after this batch
    HoldingDataWithMoreToCome = 2,
}

impl BufferState {
    pub fn from_raw(v: i32) -> Option<Self> {
        match v {
            0 => Some(BufferState::Empty),
            1 => Some(BufferState::HoldingData),
            2 => Some(BufferState::HoldingDataWithMoreToCome),
            _ => None,
        }
    }
}

/// Shared buffer header (lives at offset 0 of the receive-buffer region)
#[repr(C)]
pub struct SharedBufferHeader {
    /// Magic number for validation
    magic: AtomicU32,
    /// Layout version
    version: AtomicU32,
    /// Process-shared mutex guarding the fields below
    lock: UnsafeCell<libc::pthread_mutex_t>,
    /// Number of pending index/request entries
    entry_count: AtomicU64,
    /// Bytes currently occupied in the region
    byte_count: AtomicU64,
    /// [`BufferState`] as raw i32
    state: AtomicI32,
}

// SAFETY: all fields are either atomics or the pthread mutex, which is
// designed for concurrent use across threads and processes.
unsafe impl Sync for SharedBufferHeader {}

impl SharedBufferHeader {
    /// Size of the header in bytes
    pub const SIZE: usize = std::mem::size_of::<SharedBufferHeader>();

    /// Initialize the header at the start of `region`.
    ///
    /// Sets `entry_count = 0`, `byte_count = 0`, `state = EMPTY` and
    /// constructs the lock unlocked. A lock construction failure is logged
    /// and does not fail the call; `Ok(false)` is returned in that case.
    pub fn initialize(region: &SharedMemoryRegion) -> Result<bool, ShmError> {
        Self::initialize_with(region, init_process_shared_mutex)
    }

    /// As [`initialize`](Self::initialize), constructing the lock with `init_lock`
    pub(crate) fn initialize_with(
        region: &SharedMemoryRegion,
        init_lock: LockInit,
    ) -> Result<bool, ShmError> {
        Self::check_fits(region)?;
        let hdr = region.as_ptr() as *mut SharedBufferHeader;

        // SAFETY: the region is page aligned and large enough for the header;
        // the worker for this client has not started yet so nobody on the
        // server side touches the header concurrently.
        let rc = unsafe {
            addr_of_mut!((*hdr).magic).write(AtomicU32::new(SHM_HEADER_MAGIC));
            addr_of_mut!((*hdr).version).write(AtomicU32::new(SHM_HEADER_VERSION));
            addr_of_mut!((*hdr).entry_count).write(AtomicU64::new(0));
            addr_of_mut!((*hdr).byte_count).write(AtomicU64::new(0));
            addr_of_mut!((*hdr).state).write(AtomicI32::new(BufferState::Empty as i32));
            init_lock(addr_of_mut!((*hdr).lock) as *mut libc::pthread_mutex_t)
        };

        if rc != 0 {
            tracing::error!(
                "shared buffer header mutex initialization failed for {} ({})",
                region.name(),
                std::io::Error::from_raw_os_error(rc)
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// View an already initialized header, validating magic and version
    pub fn open(region: &SharedMemoryRegion) -> Result<&SharedBufferHeader, ShmError> {
        Self::check_fits(region)?;
        // SAFETY: size checked above, mapping is page aligned.
        let hdr = unsafe { &*(region.as_ptr() as *const SharedBufferHeader) };
        if hdr.magic.load(Ordering::Acquire) != SHM_HEADER_MAGIC {
            return Err(ShmError::InvalidMagic);
        }
        let version = hdr.version.load(Ordering::Acquire);
        if version != SHM_HEADER_VERSION {
            return Err(ShmError::VersionMismatch {
                found: version,
                expected: SHM_HEADER_VERSION,
            });
        }
        Ok(hdr)
    }

    fn check_fits(region: &SharedMemoryRegion) -> Result<(), ShmError> {
        if region.size() < Self::SIZE {
            return Err(ShmError::RegionTooSmall {
                name: region.name().to_string(),
                size: region.size(),
                required: Self::SIZE,
            });
        }
        Ok(())
    }

    /// Acquire the header lock
    pub fn lock(&self) -> Result<HeaderGuard<'_>, ShmError> {
        // SAFETY: the mutex was initialized by `initialize`.
        let rc = unsafe { libc::pthread_mutex_lock(self.lock.get()) };
        if rc != 0 {
            return Err(ShmError::LockFailed(std::io::Error::from_raw_os_error(rc)));
        }
        Ok(HeaderGuard { header: self })
    }
}

/// Locked view of the header fields
pub struct HeaderGuard<'a> {
    header: &'a SharedBufferHeader,
}

impl HeaderGuard<'_> {
    pub fn entry_count(&self) -> u64 {
        self.header.entry_count.load(Ordering::Acquire)
    }

    pub fn set_entry_count(&self, count: u64) {
        self.header.entry_count.store(count, Ordering::Release);
    }

    pub fn byte_count(&self) -> u64 {
        self.header.byte_count.load(Ordering::Acquire)
    }

    pub fn set_byte_count(&self, bytes: u64) {
        self.header.byte_count.store(bytes, Ordering::Release);
    }

    pub fn state(&self) -> Option<BufferState> {
        BufferState::from_raw(self.header.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: BufferState) {
        self.header.state.store(state as i32, Ordering::Release);
    }

    /// Reset to the freshly attached state
    pub fn reset(&self) {
        self.set_entry_count(0);
        self.set_byte_count(0);
        self.set_state(BufferState::Empty);
    }
}

impl Drop for HeaderGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: we hold the lock.
        unsafe {
            libc::pthread_mutex_unlock(self.header.lock.get());
        }
    }
}

/// Constructor for the header lock; returns a pthread error code
pub(crate) type LockInit = unsafe fn(*mut libc::pthread_mutex_t) -> libc::c_int;

/// Initialize a pthread mutex usable from several processes
///
/// Returns the pthread error code (0 on success).
unsafe fn init_process_shared_mutex(mutex: *mut libc::pthread_mutex_t) -> libc::c_int {
    let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
    let rc = libc::pthread_mutexattr_init(&mut attr);
    if rc != 0 {
        return rc;
    }
    let rc = libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
    if rc != 0 {
        libc::pthread_mutexattr_destroy(&mut attr);
        return rc;
    }
    let rc = libc::pthread_mutex_init(mutex, &attr);
    libc::pthread_mutexattr_destroy(&mut attr);
    rc
}
