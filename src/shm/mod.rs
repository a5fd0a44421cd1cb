//! Shared memory regions shared between the server and its local clients.
//!
//! Each mounted client owns two POSIX shared memory regions that the server
//! attaches to:
//!
//! ```text
//! superblock region      raw file data (log-I/O engine) + WriteIndex at
//!                        metadata_offset
//! receive-buffer region  ┌────────────────────┬──────────────────────────┐
//!                        │ SharedBufferHeader │ read reply / index slices │
//!                        └────────────────────┴──────────────────────────┘
//! ```
//!
//! Region names are a pure function of `(prefix, role, app_id, client_id)`
//! so a client and the server always agree on them.

pub mod header;
pub mod index;
pub mod region;

pub use header::{BufferState, HeaderGuard, SharedBufferHeader};
pub use index::{WriteIndex, WriteIndexEntry};
pub use region::SharedMemoryRegion;

use crate::session::{AppId, ClientId};

/// Error type for shared memory operations
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    #[error("failed to open shared memory {name}: {source}")]
    OpenFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to size shared memory {name}: {source}")]
    TruncateFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to map shared memory {name}: {source}")]
    MmapFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid shared memory name: {0:?}")]
    InvalidName(String),

    #[error("invalid shared memory size {size} for {name}")]
    InvalidSize { name: String, size: usize },

    #[error("region {name} is {size} bytes, header needs {required}")]
    RegionTooSmall {
        name: String,
        size: usize,
        required: usize,
    },

    #[error("failed to acquire shared buffer header lock: {0}")]
    LockFailed(#[source] std::io::Error),

    #[error("invalid shared buffer header magic")]
    InvalidMagic,

    #[error("shared buffer header version {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("write index in {name} at offset {offset} is not 8-byte aligned")]
    MisalignedIndex { name: String, offset: usize },

    #[error("write index of {size} bytes at offset {offset} does not fit {name} ({region_size} bytes)")]
    IndexOutOfBounds {
        name: String,
        offset: usize,
        size: usize,
        region_size: usize,
    },

    #[error("write index in {name} is full ({capacity} entries)")]
    IndexFull { name: String, capacity: usize },
}

/// Which of a client's two regions a name refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionRole {
    Superblock,
    ReceiveBuffer,
}

impl RegionRole {
    fn tag(self) -> &'static str {
        match self {
            RegionRole::Superblock => "super",
            RegionRole::ReceiveBuffer => "recv",
        }
    }
}

/// Deterministic region name for `(role, app_id, client_id)`
pub fn region_name(prefix: &str, role: RegionRole, app_id: AppId, client_id: ClientId) -> String {
    format!("{}-{}-{}-{}", prefix, role.tag(), app_id, client_id)
}
