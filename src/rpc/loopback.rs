//! In-process transport.
//!
//! Requests submitted by a local caller and bulk buffers "exposed" by it stand
//! in for client traffic and client memory, which lets the daemon and the
//! tests drive every handler without a network.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;

use super::transport::{
    BulkAccess, BulkHandle, BulkRegistration, IncomingRpc, RemoteAddress, Responder, Transport,
    TransportError,
};
use super::types::{RpcRequest, RpcResponse};

pub struct LoopbackTransport {
    next_id: AtomicU64,
    addresses: DashMap<u64, String>,
    exposed: DashMap<u64, Vec<u8>>,
    registrations: DashMap<u64, BulkRegistration>,
    registrations_made: AtomicU64,
    inbox_tx: flume::Sender<IncomingRpc>,
    inbox_rx: flume::Receiver<IncomingRpc>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (inbox_tx, inbox_rx) = flume::unbounded();
        Self {
            next_id: AtomicU64::new(0),
            addresses: DashMap::new(),
            exposed: DashMap::new(),
            registrations: DashMap::new(),
            registrations_made: AtomicU64::new(0),
            inbox_tx,
            inbox_rx,
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Queue `request` as if a client had sent it. The reply arrives on the
    /// returned channel once a server has dispatched it.
    pub fn submit(&self, request: RpcRequest) -> flume::Receiver<RpcResponse> {
        let (reply_tx, reply_rx) = flume::bounded(1);
        let respond: Responder = Box::new(move |response| {
            // The caller may have stopped waiting
            let _ = reply_tx.send(response);
        });
        if self.inbox_tx.send(IncomingRpc { request, respond }).is_err() {
            tracing::error!("loopback request queue is closed");
        }
        reply_rx
    }

    /// Make `data` pullable through the returned handle
    pub fn expose(&self, data: Vec<u8>) -> BulkHandle {
        let key = self.next_id();
        let len = data.len() as u64;
        self.exposed.insert(key, data);
        BulkHandle { key, len }
    }

    pub fn withdraw(&self, handle: &BulkHandle) -> Option<Vec<u8>> {
        self.exposed.remove(&handle.key).map(|(_, data)| data)
    }

    /// Registrations not yet freed
    pub fn outstanding_registrations(&self) -> usize {
        self.registrations.len()
    }

    /// Registrations ever made, freed or not
    pub fn total_registrations(&self) -> u64 {
        self.registrations_made.load(Ordering::Relaxed)
    }

    /// Addresses looked up and not yet freed
    pub fn outstanding_addresses(&self) -> usize {
        self.addresses.len()
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("addresses", &self.addresses.len())
            .field("exposed", &self.exposed.len())
            .field("registrations", &self.registrations.len())
            .field("queued_requests", &self.inbox_rx.len())
            .finish()
    }
}

impl Transport for LoopbackTransport {
    fn recv_request(&self, timeout: Duration) -> Result<Option<IncomingRpc>, TransportError> {
        match self.inbox_rx.recv_timeout(timeout) {
            Ok(rpc) => Ok(Some(rpc)),
            Err(flume::RecvTimeoutError::Timeout) => Ok(None),
            Err(flume::RecvTimeoutError::Disconnected) => {
                Err(TransportError::Failed("request queue closed".to_string()))
            }
        }
    }

    fn lookup_address(&self, uri: &str) -> Result<RemoteAddress, TransportError> {
        match uri.split_once("://") {
            Some((scheme, rest)) if !scheme.is_empty() && !rest.is_empty() => {
                let id = self.next_id();
                self.addresses.insert(id, uri.to_string());
                Ok(RemoteAddress {
                    id,
                    uri: uri.to_string(),
                })
            }
            _ => Err(TransportError::AddressLookup(uri.to_string())),
        }
    }

    fn free_address(&self, addr: RemoteAddress) {
        if self.addresses.remove(&addr.id).is_none() {
            tracing::warn!("free of unknown address {} ({})", addr.id, addr.uri);
        }
    }

    fn bulk_register(
        &self,
        len: u64,
        access: BulkAccess,
    ) -> Result<BulkRegistration, TransportError> {
        let registration = BulkRegistration {
            id: self.next_id(),
            len,
            access,
        };
        self.registrations.insert(registration.id, registration);
        self.registrations_made.fetch_add(1, Ordering::Relaxed);
        Ok(registration)
    }

    fn bulk_pull(
        &self,
        remote: &BulkHandle,
        registration: &BulkRegistration,
        local: &mut [u8],
    ) -> Result<(), TransportError> {
        if !registration.access.writable() {
            return Err(TransportError::AccessDenied(registration.id));
        }
        if !self.registrations.contains_key(&registration.id) {
            return Err(TransportError::Failed(format!(
                "registration {} is not active",
                registration.id
            )));
        }
        let source = self
            .exposed
            .get(&remote.key)
            .ok_or(TransportError::UnknownBulkHandle(remote.key))?;
        if (source.len() as u64) < local.len() as u64 || registration.len < local.len() as u64 {
            return Err(TransportError::LengthMismatch {
                remote: source.len() as u64,
                local: local.len() as u64,
            });
        }
        local.copy_from_slice(&source[..local.len()]);
        Ok(())
    }

    fn bulk_free(&self, registration: BulkRegistration) {
        self.registrations.remove(&registration.id);
    }
}
