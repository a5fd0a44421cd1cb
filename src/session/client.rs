use std::sync::Arc;

use super::ClientId;
use crate::logio::LogIoContext;
use crate::rpc::transport::RemoteAddress;
use crate::shm::SharedMemoryRegion;
use crate::worker::WorkerHandle;

/// State of one client slot within an application
#[derive(Debug, Default)]
pub enum ClientSlot {
    /// Free for a mount
    #[default]
    Unbound,
    /// Mounted client with its resources
    Bound(ClientSession),
    /// Unmount has been acknowledged but resources are still being released
    Draining,
}

impl ClientSlot {
    pub fn is_bound(&self) -> bool {
        matches!(self, ClientSlot::Bound(_))
    }

    pub fn as_bound(&self) -> Option<&ClientSession> {
        match self {
            ClientSlot::Bound(session) => Some(session),
            _ => None,
        }
    }

    /// Move a bound session out, leaving the slot `Draining`
    pub fn begin_drain(&mut self) -> Option<ClientSession> {
        match std::mem::replace(self, ClientSlot::Draining) {
            ClientSlot::Bound(session) => Some(session),
            other => {
                *self = other;
                None
            }
        }
    }
}

/// Server-side record of a mounted client
///
/// Every resource is optional: mount runs all of its steps even after a
/// failure, so a bound session may hold only some of them.
#[derive(Debug)]
pub struct ClientSession {
    /// Equal to the client id
    pub rank: ClientId,
    /// Client's global rank, for log messages only
    pub debug_rank: i32,
    /// Shared with the worker, which drains the write index from it
    pub superblock: Option<Arc<SharedMemoryRegion>>,
    pub receive_buffer: Option<SharedMemoryRegion>,
    pub remote_address: Option<RemoteAddress>,
    pub logio: Option<LogIoContext>,
    pub worker: Option<WorkerHandle>,
}

impl ClientSession {
    pub fn new(rank: ClientId, debug_rank: i32) -> Self {
        Self {
            rank,
            debug_rank,
            superblock: None,
            receive_buffer: None,
            remote_address: None,
            logio: None,
            worker: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_drain_only_from_bound() {
        let mut slot = ClientSlot::Unbound;
        assert!(slot.begin_drain().is_none());
        assert!(matches!(slot, ClientSlot::Unbound));

        let mut slot = ClientSlot::Bound(ClientSession::new(2, 17));
        let session = slot.begin_drain().unwrap();
        assert_eq!(session.rank, 2);
        assert_eq!(session.debug_rank, 17);
        assert!(matches!(slot, ClientSlot::Draining));

        assert!(slot.begin_drain().is_none());
        assert!(matches!(slot, ClientSlot::Draining));
    }
}
