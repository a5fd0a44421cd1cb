//! Global constants for the burstbuf server
//!
//! Values shared between the session layer, the shared-memory contract and
//! the RPC facade live here so the client-facing numbers stay in one place.

/// Maximum number of clients a single application may bind on one server
///
/// Client ids index directly into the per-application slot array, so any
/// `client_id >= MAX_APP_CLIENTS` is rejected at mount time.
pub const MAX_APP_CLIENTS: usize = 256;

/// Default prefix for shared memory region names
pub const DEFAULT_SHM_PREFIX: &str = "burstbuf";

/// Magic number stamped into every shared buffer header ("BBUF")
pub const SHM_HEADER_MAGIC: u32 = 0x4242_5546;

/// Shared buffer header layout version
///
/// Bump whenever a field of [`crate::shm::SharedBufferHeader`] moves or
/// changes size.
pub const SHM_HEADER_VERSION: u32 = 1;

/// Default size of one read-reply slice in the receive buffer (1 MiB)
pub const DEFAULT_READ_SLICE_SIZE: usize = 1 << 20;

/// Number of batched read entries that fit in a slice of `slice_size` bytes
///
/// This is the value reported to clients at mount time so they can size
/// their `mread` batches.
#[inline]
pub fn batch_read_entries_per_slice(slice_size: usize) -> u64 {
    (slice_size / std::mem::size_of::<crate::rpc::types::ReadRequestEntry>()) as u64
}
