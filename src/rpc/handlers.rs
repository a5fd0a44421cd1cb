//! Server-side RPC handlers.
//!
//! Handlers are plain `&self` methods and may be called concurrently from any
//! transport thread. No slot lock is held while a handler waits for a worker.

use std::path::PathBuf;
use std::sync::Arc;

use super::bulk::{check_batch_size, PulledBatch};
use super::transport::Transport;
use super::types::*;
use crate::config::ServerConfig;
use crate::constants::{batch_read_entries_per_slice, MAX_APP_CLIENTS};
use crate::error::{status_of, ServerError, ServerResult, Status};
use crate::logio::{LogIoEngine, LogIoParams};
use crate::metadata::MetadataStore;
use crate::session::{
    attach, AppConfig, AppId, ApplicationSession, ClientId, ClientSession, ClientSlot,
    SessionRegistry,
};
use crate::worker::{ClientContext, RequestEngine, WorkerHandle, WorkerSender};

/// Handler tunables taken from the server configuration
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub shm_prefix: String,
    pub read_slice_size: usize,
    pub worker_queue_depth: usize,
}

impl HandlerSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            shm_prefix: config.shm.name_prefix.clone(),
            read_slice_size: config.session.read_slice_size,
            worker_queue_depth: config.worker.command_queue_depth,
        }
    }
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

/// Shared state handed to every RPC handler
pub struct RpcHandlerContext {
    settings: HandlerSettings,
    registry: SessionRegistry,
    transport: Arc<dyn Transport>,
    metadata: Arc<dyn MetadataStore>,
    logio: Arc<dyn LogIoEngine>,
    engine: Arc<dyn RequestEngine>,
}

/// Mount step that can fail without aborting the mount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountStep {
    /// Request validation and slot reservation
    Admission,
    ResolveAddress,
    AttachShm,
    InitLogIo,
    StartWorker,
}

/// Outcome of a mount, with every step that failed
#[derive(Debug)]
pub struct MountReport {
    pub failures: Vec<(MountStep, ServerError)>,
    pub max_batch_read_entries_per_slice: u64,
}

impl MountReport {
    /// Status of the first failed step, or success
    pub fn status(&self) -> Status {
        self.failures
            .first()
            .map(|(_, e)| e.status())
            .unwrap_or(Status::Success)
    }

    pub fn response(&self) -> MountResponse {
        MountResponse {
            ret: self.status().code(),
            max_batch_read_entries_per_slice: self.max_batch_read_entries_per_slice,
        }
    }

    fn rejected(error: ServerError, max: u64) -> Self {
        Self {
            failures: vec![(MountStep::Admission, error)],
            max_batch_read_entries_per_slice: max,
        }
    }
}

impl RpcHandlerContext {
    pub fn new(
        settings: HandlerSettings,
        registry: SessionRegistry,
        transport: Arc<dyn Transport>,
        metadata: Arc<dyn MetadataStore>,
        logio: Arc<dyn LogIoEngine>,
        engine: Arc<dyn RequestEngine>,
    ) -> Self {
        Self {
            settings,
            registry,
            transport,
            metadata,
            logio,
            engine,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &HandlerSettings {
        &self.settings
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    // ========================================================================
    // Session RPCs
    // ========================================================================

    pub fn handle_mount(&self, req: &MountRequest) -> MountResponse {
        let report = self.mount(req);
        for (step, e) in &report.failures {
            tracing::error!(
                "mount app={} client={} (rank {}): {:?} failed: {}",
                req.app_id,
                req.client_id,
                req.debug_rank,
                step,
                e
            );
        }
        report.response()
    }

    /// Mount a client, running every step even after a failure
    pub fn mount(&self, req: &MountRequest) -> MountReport {
        let max = batch_read_entries_per_slice(self.settings.read_slice_size);

        if req.client_id as usize >= MAX_APP_CLIENTS {
            return MountReport::rejected(
                ServerError::InvalidArgument(format!(
                    "client_id {} out of range (max {})",
                    req.client_id,
                    MAX_APP_CLIENTS - 1
                )),
                max,
            );
        }

        let config = AppConfig {
            receive_buffer_size: req.receive_buffer_size,
            superblock_size: req.superblock_size,
            metadata_offset: req.metadata_offset,
            metadata_size: req.metadata_size,
            spill_directory: PathBuf::from(&req.spill_directory),
            clients_per_node: req.clients_per_node,
        };
        let app = self.registry.acquire(req.app_id, &config);

        let slot = match app.slot(req.client_id) {
            Ok(slot) => slot,
            Err(e) => {
                self.registry.release(req.app_id);
                return MountReport::rejected(e, max);
            }
        };
        let mut slot = slot.lock();
        if !matches!(*slot, ClientSlot::Unbound) {
            drop(slot);
            self.registry.release(req.app_id);
            return MountReport::rejected(
                ServerError::Busy {
                    app_id: req.app_id,
                    client_id: req.client_id,
                },
                max,
            );
        }

        let mut failures = Vec::new();
        let mut session = ClientSession::new(req.client_id, req.debug_rank);

        match self.transport.lookup_address(&req.client_address) {
            Ok(addr) => session.remote_address = Some(addr),
            Err(e) => failures.push((MountStep::ResolveAddress, ServerError::AddressResolution(e))),
        }

        if let Err(e) = attach(&self.settings.shm_prefix, &app, req.client_id, &mut session) {
            failures.push((MountStep::AttachShm, e.into()));
        }

        let params = LogIoParams {
            app_id: req.app_id,
            client_id: req.client_id,
            shmem_size: req.logio_shmem_size,
            spill_size: req.logio_spill_size,
            spill_dir: app.config().spill_directory.clone(),
        };
        match self.logio.init_client(&params) {
            Ok(ctx) => session.logio = Some(ctx),
            Err(e) => failures.push((MountStep::InitLogIo, e.into())),
        }

        let ctx = ClientContext {
            app_id: req.app_id,
            client_id: req.client_id,
            superblock: session.superblock.clone(),
            metadata_offset: app.config().metadata_offset,
            metadata_size: app.config().metadata_size,
        };
        match WorkerHandle::spawn(ctx, self.engine.clone(), self.settings.worker_queue_depth) {
            Ok(worker) => session.worker = Some(worker),
            Err(e) => failures.push((MountStep::StartWorker, e)),
        }

        *slot = ClientSlot::Bound(session);
        tracing::info!(
            "Mounted app={} client={} (rank {}), {} step(s) failed",
            req.app_id,
            req.client_id,
            req.debug_rank,
            failures.len()
        );

        MountReport {
            failures,
            max_batch_read_entries_per_slice: max,
        }
    }

    /// Unmount a client. `respond` is invoked with the success reply before
    /// any resource is released.
    pub fn handle_unmount(&self, req: &UnmountRequest, respond: impl FnOnce(StatusResponse)) {
        let drained = self.begin_unmount(req.app_id, req.client_id);
        respond(StatusResponse::success());

        let Some((app, session)) = drained else {
            return;
        };
        self.teardown(session);
        if let Ok(slot) = app.slot(req.client_id) {
            *slot.lock() = ClientSlot::Unbound;
        }
        self.registry.release(req.app_id);
        tracing::info!("Unmounted app={} client={}", req.app_id, req.client_id);
    }

    fn begin_unmount(
        &self,
        app_id: AppId,
        client_id: ClientId,
    ) -> Option<(Arc<ApplicationSession>, ClientSession)> {
        let Some(app) = self.registry.get(app_id) else {
            tracing::error!("unmount for unknown app_id={}", app_id);
            return None;
        };
        let session = match app.slot(client_id) {
            Ok(slot) => slot.lock().begin_drain(),
            Err(e) => {
                tracing::error!("unmount app={}: {}", app_id, e);
                return None;
            }
        };
        match session {
            Some(session) => Some((app, session)),
            None => {
                tracing::error!(
                    "unmount for app={} client={} which is not mounted",
                    app_id,
                    client_id
                );
                None
            }
        }
    }

    /// Release everything a client session owns
    fn teardown(&self, mut session: ClientSession) {
        if let Some(worker) = session.worker.take() {
            worker.stop();
        }
        drop(session.receive_buffer.take());
        if let Some(addr) = session.remote_address.take() {
            self.transport.free_address(addr);
        }
        self.logio
            .release_client(session.logio.take(), session.superblock.take());
    }

    /// Tear down every mounted client of every application
    pub fn shutdown(&self) -> usize {
        let mut released = 0;
        for app in self.registry.sessions() {
            for (client_id, slot) in app.slots() {
                let Some(session) = slot.lock().begin_drain() else {
                    continue;
                };
                self.teardown(session);
                *slot.lock() = ClientSlot::Unbound;
                self.registry.release(app.app_id());
                tracing::debug!("Released app={} client={}", app.app_id(), client_id);
                released += 1;
            }
        }
        tracing::info!("Released {} client session(s) at shutdown", released);
        released
    }

    // ========================================================================
    // Metadata RPCs
    // ========================================================================

    pub fn handle_meta_get(&self, req: &MetaGetRequest) -> MetaGetResponse {
        match self.metadata.get(req.gfid) {
            Ok(attrs) => MetaGetResponse::success(attrs),
            Err(e) => {
                tracing::debug!("metaget gfid={}: {}", req.gfid, e);
                MetaGetResponse::error(e.status())
            }
        }
    }

    pub fn handle_meta_set(&self, req: &MetaSetRequest) -> StatusResponse {
        let result = self
            .metadata
            .set(&req.attrs, req.create, req.create)
            .map_err(ServerError::from);
        self.status_response("metaset", result)
    }

    // ========================================================================
    // Worker-forwarded RPCs
    // ========================================================================

    pub fn handle_sync(&self, req: &SyncRequest) -> StatusResponse {
        let result = self
            .worker_for(req.app_id, req.client_id)
            .and_then(|w| w.sync());
        self.status_response("sync", result)
    }

    pub fn handle_filesize(&self, req: &FilesizeRequest) -> FilesizeResponse {
        match self
            .worker_for(req.app_id, req.client_id)
            .and_then(|w| w.filesize(req.gfid))
        {
            Ok(size) => FilesizeResponse::success(size),
            Err(e) => {
                tracing::error!("filesize gfid={}: {}", req.gfid, e);
                FilesizeResponse::error(e.status())
            }
        }
    }

    pub fn handle_truncate(&self, req: &TruncateRequest) -> StatusResponse {
        let result = self
            .worker_for(req.app_id, req.client_id)
            .and_then(|w| w.truncate(req.gfid, req.filesize));
        self.status_response("truncate", result)
    }

    pub fn handle_unlink(&self, req: &UnlinkRequest) -> StatusResponse {
        let result = self
            .worker_for(req.app_id, req.client_id)
            .and_then(|w| w.unlink(req.gfid));
        self.status_response("unlink", result)
    }

    pub fn handle_laminate(&self, req: &LaminateRequest) -> StatusResponse {
        let result = self
            .worker_for(req.app_id, req.client_id)
            .and_then(|w| w.laminate(req.gfid));
        self.status_response("laminate", result)
    }

    /// Queue a single read; the reply only confirms acceptance
    pub fn handle_read(&self, req: &ReadRequest) -> StatusResponse {
        let entry = ReadRequestEntry::new(req.gfid, req.offset, req.length);
        let result = self
            .worker_for(req.app_id, req.client_id)
            .and_then(|w| w.read(entry));
        self.status_response("read", result)
    }

    pub fn handle_mread(&self, req: &MreadRequest) -> StatusResponse {
        let result = self.mread(req);
        self.status_response("mread", result)
    }

    /// Nothing is allocated or registered until the client is known to be
    /// mounted and the batch sizes check out.
    fn mread(&self, req: &MreadRequest) -> ServerResult<()> {
        let worker = self.worker_for(req.app_id, req.client_id)?;
        check_batch_size(
            req.request_count,
            req.byte_size,
            batch_read_entries_per_slice(self.settings.read_slice_size),
        )?;
        let batch = PulledBatch::pull(self.transport.as_ref(), &req.bulk_handle, req.byte_size)?;
        let entries = batch.entries(req.request_count)?;
        tracing::trace!(
            "mread app={} client={}: {} entries",
            req.app_id,
            req.client_id,
            entries.len()
        );
        worker.batched_read(entries)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Command sender of a mounted client's worker
    fn worker_for(&self, app_id: AppId, client_id: ClientId) -> ServerResult<WorkerSender> {
        let not_mounted = || ServerError::NotMounted { app_id, client_id };
        let app = self.registry.get(app_id).ok_or_else(not_mounted)?;
        let slot = app.slot(client_id)?.lock();
        let session = slot.as_bound().ok_or_else(not_mounted)?;
        session
            .worker
            .as_ref()
            .map(WorkerHandle::sender)
            .ok_or(ServerError::WorkerGone { app_id, client_id })
    }

    fn status_response(&self, op: &str, result: ServerResult<()>) -> StatusResponse {
        if let Err(e) = &result {
            tracing::error!("{} failed: {}", op, e);
        }
        StatusResponse {
            ret: status_of(&result),
        }
    }
}
