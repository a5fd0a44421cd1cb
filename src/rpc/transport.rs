//! Transport operations the RPC handlers depend on.
//!
//! Connection setup and the wire format are the transport's business; the
//! handlers only need incoming requests, address lookup and one-sided bulk
//! pulls.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::{RpcRequest, RpcResponse};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("address lookup failed for {0:?}")]
    AddressLookup(String),

    #[error("unknown bulk handle {0}")]
    UnknownBulkHandle(u64),

    #[error("bulk length mismatch: remote {remote} bytes, local {local} bytes")]
    LengthMismatch { remote: u64, local: u64 },

    #[error("bulk registration {0} does not permit this access")]
    AccessDenied(u64),

    #[error("transport failure: {0}")]
    Failed(String),
}

/// Resolved address of a remote client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddress {
    pub id: u64,
    pub uri: String,
}

/// Remote memory handle received in a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkHandle {
    pub key: u64,
    pub len: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAccess {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl BulkAccess {
    pub fn writable(self) -> bool {
        matches!(self, BulkAccess::WriteOnly | BulkAccess::ReadWrite)
    }
}

/// Local memory registered for bulk transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkRegistration {
    pub id: u64,
    pub len: u64,
    pub access: BulkAccess,
}

/// Sends the reply for one request back to its caller
pub type Responder = Box<dyn FnOnce(RpcResponse) + Send>;

/// A request received from a client, with the way back
pub struct IncomingRpc {
    pub request: RpcRequest,
    pub respond: Responder,
}

impl std::fmt::Debug for IncomingRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingRpc")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

pub trait Transport: Send + Sync {
    /// Wait up to `timeout` for the next client request
    fn recv_request(&self, timeout: Duration) -> Result<Option<IncomingRpc>, TransportError>;

    fn lookup_address(&self, uri: &str) -> Result<RemoteAddress, TransportError>;

    fn free_address(&self, addr: RemoteAddress);

    /// Register `len` bytes of local memory
    fn bulk_register(&self, len: u64, access: BulkAccess)
        -> Result<BulkRegistration, TransportError>;

    /// Copy the remote buffer behind `remote` into `local`, blocking until done
    fn bulk_pull(
        &self,
        remote: &BulkHandle,
        registration: &BulkRegistration,
        local: &mut [u8],
    ) -> Result<(), TransportError>;

    fn bulk_free(&self, registration: BulkRegistration);
}
