//! POSIX shared memory region handle.
//!
//! The client normally creates its regions before mounting; the server
//! attaches to whatever exists under the agreed name and creates the region
//! itself only when the client has not done so yet. Whoever created the
//! region is responsible for unlinking it.

use std::ffi::CString;
use std::io;
use std::ptr::NonNull;

use super::ShmError;

/// A mapped POSIX shared memory region
pub struct SharedMemoryRegion {
    /// Normalized shared memory name (leading '/')
    name: String,
    /// Base pointer to mapped region
    base_ptr: NonNull<u8>,
    /// Mapped size in bytes
    size: usize,
    /// Whether this handle created (and will unlink) the shared memory object
    is_owner: bool,
}

// SAFETY: the mapping is process-shared, not thread-specific. Concurrent
// access to the contents is coordinated through the shared buffer header lock.
unsafe impl Send for SharedMemoryRegion {}

// SAFETY: see above; the handle itself is immutable after construction.
unsafe impl Sync for SharedMemoryRegion {}

impl SharedMemoryRegion {
    /// Attach to the region `name`, creating it when it does not exist yet.
    ///
    /// The region is grown to `size` bytes if the existing object is smaller.
    pub fn attach_or_create(name: &str, size: usize) -> Result<Self, ShmError> {
        let shm_name = Self::normalize_name(name);
        if shm_name.len() < 2 || shm_name[1..].contains('/') {
            return Err(ShmError::InvalidName(name.to_string()));
        }
        if size == 0 {
            return Err(ShmError::InvalidSize {
                name: shm_name,
                size,
            });
        }
        let c_name =
            CString::new(shm_name.as_str()).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // Try to create first so we know whether we own the object
        let mut is_owner = true;
        let mut fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            )
        };
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EEXIST) {
                return Err(ShmError::OpenFailed {
                    name: shm_name,
                    source: err,
                });
            }
            is_owner = false;
            fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
            if fd < 0 {
                return Err(ShmError::OpenFailed {
                    name: shm_name,
                    source: io::Error::last_os_error(),
                });
            }
        }

        let cleanup = |fd: libc::c_int| unsafe {
            libc::close(fd);
            if is_owner {
                libc::shm_unlink(c_name.as_ptr());
            }
        };

        // Grow the object if needed; never shrink a client-created region
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut stat) } < 0 {
            let err = io::Error::last_os_error();
            cleanup(fd);
            return Err(ShmError::OpenFailed {
                name: shm_name,
                source: err,
            });
        }
        if (stat.st_size as usize) < size {
            let ret = unsafe { libc::ftruncate(fd, size as libc::off_t) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                cleanup(fd);
                return Err(ShmError::TruncateFailed {
                    name: shm_name,
                    source: err,
                });
            }
        }

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            cleanup(fd);
            return Err(ShmError::MmapFailed {
                name: shm_name,
                source: err,
            });
        }

        // Close fd (mmap keeps reference)
        unsafe { libc::close(fd) };

        let base_ptr = NonNull::new(ptr as *mut u8).ok_or_else(|| ShmError::MmapFailed {
            name: shm_name.clone(),
            source: io::Error::new(io::ErrorKind::Other, "mmap returned null"),
        })?;

        tracing::debug!(
            "Attached shared memory {} ({} bytes, owner={})",
            shm_name,
            size,
            is_owner
        );

        Ok(Self {
            name: shm_name,
            base_ptr,
            size,
            is_owner,
        })
    }

    /// Normalize shared memory name (ensure it starts with '/')
    fn normalize_name(name: &str) -> String {
        if name.starts_with('/') {
            name.to_string()
        } else {
            format!("/{}", name)
        }
    }

    /// Get the shared memory name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the mapped size
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether this handle created the shared memory object
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    /// Base address of the mapping
    pub fn as_ptr(&self) -> *mut u8 {
        self.base_ptr.as_ptr()
    }

    /// Region contents past the first `offset` bytes
    ///
    /// # Safety
    /// The caller must hold whatever lock protects this part of the region
    /// against concurrent writes by the peer process.
    pub unsafe fn bytes_from(&self, offset: usize) -> &[u8] {
        let offset = offset.min(self.size);
        std::slice::from_raw_parts(self.base_ptr.as_ptr().add(offset), self.size - offset)
    }
}

impl Drop for SharedMemoryRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base_ptr.as_ptr() as *mut libc::c_void, self.size);
        }

        if self.is_owner {
            if let Ok(c_name) = CString::new(self.name.as_str()) {
                unsafe {
                    libc::shm_unlink(c_name.as_ptr());
                }
            }
        }
        tracing::debug!("Released shared memory {}", self.name);
    }
}

impl std::fmt::Debug for SharedMemoryRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemoryRegion")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("is_owner", &self.is_owner)
            .finish()
    }
}
