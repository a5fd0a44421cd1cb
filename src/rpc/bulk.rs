//! Pulling a batch of read requests from client memory.

use zerocopy::FromBytes;

use super::transport::{BulkAccess, BulkHandle, BulkRegistration, Transport};
use super::types::ReadRequestEntry;
use crate::error::{ServerError, ServerResult};

/// Local copy of a client's bulk buffer.
///
/// Holds the buffer and its transport registration; the registration is freed
/// when the batch is dropped, whichever way the handler exits.
pub struct PulledBatch<'t> {
    transport: &'t dyn Transport,
    registration: Option<BulkRegistration>,
    buffer: Vec<u8>,
}

/// Reject a batch whose sizes do not fit together, before any memory is
/// allocated for it.
///
/// `max_entries` is the per-slice limit handed to the client at mount; the
/// batch may neither hold more entries than that nor span more bytes than
/// that many entries occupy.
pub fn check_batch_size(request_count: u32, byte_size: u64, max_entries: u64) -> ServerResult<()> {
    let count = u64::from(request_count);
    if count > max_entries {
        return Err(ServerError::InvalidArgument(format!(
            "{} read requests exceed the per-slice limit of {}",
            count, max_entries
        )));
    }
    let entry_size = ReadRequestEntry::SIZE as u64;
    let needed = count.checked_mul(entry_size).ok_or_else(|| {
        ServerError::InvalidArgument(format!("{} read requests overflow", count))
    })?;
    if byte_size < needed {
        return Err(ServerError::InvalidArgument(format!(
            "bulk buffer holds {} bytes, {} entries need {}",
            byte_size, count, needed
        )));
    }
    let limit = max_entries.saturating_mul(entry_size);
    if byte_size > limit {
        return Err(ServerError::InvalidArgument(format!(
            "bulk buffer of {} bytes exceeds the slice limit of {}",
            byte_size, limit
        )));
    }
    Ok(())
}

impl<'t> PulledBatch<'t> {
    /// Allocate `byte_size` bytes, register them write-only and pull the
    /// remote buffer into them. Blocks until the pull completes.
    ///
    /// `byte_size` must not exceed the length of `remote`.
    pub fn pull(
        transport: &'t dyn Transport,
        remote: &BulkHandle,
        byte_size: u64,
    ) -> ServerResult<Self> {
        if byte_size > remote.len {
            return Err(ServerError::InvalidArgument(format!(
                "bulk size {} exceeds remote buffer of {} bytes",
                byte_size, remote.len
            )));
        }
        let len = usize::try_from(byte_size).map_err(|_| {
            ServerError::InvalidArgument(format!("bulk size {} too large", byte_size))
        })?;

        let registration = transport
            .bulk_register(byte_size, BulkAccess::WriteOnly)
            .map_err(ServerError::Bulk)?;
        let mut batch = PulledBatch {
            transport,
            registration: Some(registration),
            buffer: vec![0u8; len],
        };

        transport
            .bulk_pull(remote, &registration, &mut batch.buffer)
            .map_err(|e| {
                tracing::error!("bulk pull of {} bytes failed: {}", byte_size, e);
                ServerError::Bulk(e)
            })?;
        Ok(batch)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Decode the first `count` contiguous read-request records
    pub fn entries(&self, count: u32) -> ServerResult<Vec<ReadRequestEntry>> {
        let needed = count as usize * ReadRequestEntry::SIZE;
        if self.buffer.len() < needed {
            return Err(ServerError::InvalidArgument(format!(
                "bulk buffer holds {} bytes, {} entries need {}",
                self.buffer.len(),
                count,
                needed
            )));
        }
        self.buffer[..needed]
            .chunks_exact(ReadRequestEntry::SIZE)
            .map(|chunk| {
                ReadRequestEntry::read_from_bytes(chunk).map_err(|_| {
                    ServerError::Failure("malformed read request record".to_string())
                })
            })
            .collect()
    }
}

impl Drop for PulledBatch<'_> {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            self.transport.bulk_free(registration);
        }
    }
}
