use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{AppId, ClientId, ClientSlot};
use crate::constants::MAX_APP_CLIENTS;
use crate::error::{ServerError, ServerResult};

/// Application-wide configuration supplied by the first mounting client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Size of each client's receive-buffer region
    pub receive_buffer_size: usize,
    /// Size of each client's superblock region
    pub superblock_size: usize,
    /// Offset of the index entries within a client's data region
    pub metadata_offset: usize,
    /// Size of the index entry area
    pub metadata_size: usize,
    /// Directory holding spill-over files
    pub spill_directory: PathBuf,
    /// Expected number of clients on this node
    pub clients_per_node: u32,
}

/// Per-application server state
pub struct ApplicationSession {
    app_id: AppId,
    config: AppConfig,
    slots: Box<[Mutex<ClientSlot>]>,
    /// Mounts that have not yet been matched by an unmount
    active_clients: AtomicUsize,
}

impl ApplicationSession {
    pub fn new(app_id: AppId, config: AppConfig) -> Self {
        let slots = (0..MAX_APP_CLIENTS)
            .map(|_| Mutex::new(ClientSlot::Unbound))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            app_id,
            config,
            slots,
            active_clients: AtomicUsize::new(0),
        }
    }

    pub fn app_id(&self) -> AppId {
        self.app_id
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Slot for `client_id`; ids beyond the slot array are rejected
    pub fn slot(&self, client_id: ClientId) -> ServerResult<&Mutex<ClientSlot>> {
        self.slots.get(client_id as usize).ok_or_else(|| {
            ServerError::InvalidArgument(format!(
                "client_id {} out of range (max {})",
                client_id,
                MAX_APP_CLIENTS - 1
            ))
        })
    }

    /// Iterate over all slots with their client ids
    pub fn slots(&self) -> impl Iterator<Item = (ClientId, &Mutex<ClientSlot>)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| (i as ClientId, slot))
    }

    /// Number of slots currently bound to a client
    pub fn bound_clients(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.lock().is_bound())
            .count()
    }

    pub(crate) fn active_clients(&self) -> usize {
        self.active_clients.load(Ordering::Acquire)
    }

    pub(crate) fn acquire_client(&self) {
        self.active_clients.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the number of active clients left
    pub(crate) fn release_client(&self) -> usize {
        let prev = self
            .active_clients
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        prev.saturating_sub(1)
    }
}

impl std::fmt::Debug for ApplicationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationSession")
            .field("app_id", &self.app_id)
            .field("config", &self.config)
            .field("active_clients", &self.active_clients())
            .finish()
    }
}
