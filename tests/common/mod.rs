//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use burstbuf::logio::{LogIoContext, LogIoEngine, LogIoError, LogIoParams, SpillFileLogIo};
use burstbuf::metadata::MemoryMetadataStore;
use burstbuf::rpc::types::MountRequest;
use burstbuf::rpc::{HandlerSettings, LoopbackTransport, RpcHandlerContext};
use burstbuf::session::{AppId, ClientId, EvictionPolicy, SessionRegistry};
use burstbuf::shm::SharedMemoryRegion;
use burstbuf::worker::LocalEngine;

/// Log-I/O engine that refuses every client and counts releases
#[derive(Debug, Default)]
pub struct FailingLogIo {
    pub releases: AtomicUsize,
    pub superblocks_released: AtomicUsize,
}

impl LogIoEngine for FailingLogIo {
    fn init_client(&self, params: &LogIoParams) -> Result<LogIoContext, LogIoError> {
        Err(LogIoError::InvalidSize(format!(
            "no log space for app={} client={}",
            params.app_id, params.client_id
        )))
    }

    fn release_client(
        &self,
        _ctx: Option<LogIoContext>,
        superblock: Option<Arc<SharedMemoryRegion>>,
    ) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if superblock.is_some() {
            self.superblocks_released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Server context plus handles on its in-process collaborators
pub struct TestServer {
    pub ctx: Arc<RpcHandlerContext>,
    pub transport: Arc<LoopbackTransport>,
    pub store: Arc<MemoryMetadataStore>,
    pub engine: Arc<LocalEngine>,
    pub prefix: String,
    pub spill_dir: PathBuf,
}

/// Unique name component so parallel tests never share regions
pub fn unique_tag(test_name: &str) -> String {
    format!(
        "bbtest_{}_{}_{}",
        test_name,
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    )
}

impl TestServer {
    pub fn new(test_name: &str) -> Self {
        Self::with_policy(test_name, EvictionPolicy::Retain)
    }

    pub fn with_policy(test_name: &str, policy: EvictionPolicy) -> Self {
        Self::build(test_name, policy, Arc::new(SpillFileLogIo::new(true)))
    }

    pub fn with_logio(test_name: &str, logio: Arc<dyn LogIoEngine>) -> Self {
        Self::build(test_name, EvictionPolicy::Retain, logio)
    }

    fn build(test_name: &str, policy: EvictionPolicy, logio: Arc<dyn LogIoEngine>) -> Self {
        let prefix = unique_tag(test_name);
        let spill_dir = std::env::temp_dir().join(&prefix);
        let transport = Arc::new(LoopbackTransport::new());
        let store = Arc::new(MemoryMetadataStore::new());
        let engine = Arc::new(LocalEngine::new(store.clone()));
        let settings = HandlerSettings {
            shm_prefix: prefix.clone(),
            ..HandlerSettings::default()
        };
        let ctx = Arc::new(RpcHandlerContext::new(
            settings,
            SessionRegistry::new(policy),
            transport.clone(),
            store.clone(),
            logio,
            engine.clone(),
        ));
        Self {
            ctx,
            transport,
            store,
            engine,
            prefix,
            spill_dir,
        }
    }

    pub fn mount_request(&self, app_id: AppId, client_id: ClientId) -> MountRequest {
        MountRequest {
            app_id,
            client_id,
            debug_rank: client_id as i32,
            receive_buffer_size: 4096,
            superblock_size: 1 << 20,
            metadata_offset: 0,
            metadata_size: 4096,
            spill_directory: self.spill_dir.to_string_lossy().into_owned(),
            clients_per_node: 4,
            client_address: format!("loop://client-{}", client_id),
            logio_shmem_size: 1 << 20,
            logio_spill_size: 0,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.ctx.shutdown();
        let _ = std::fs::remove_dir_all(&self.spill_dir);
    }
}
