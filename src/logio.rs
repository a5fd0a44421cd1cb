//! Log-structured I/O engine interface.
//!
//! A client's writes land in its superblock region and, once that fills, in a
//! per-client spill file. The server only sets up and tears down the
//! per-client context; data placement belongs to the engine.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::session::{AppId, ClientId};
use crate::shm::SharedMemoryRegion;

/// Log-I/O errors
#[derive(Debug, thiserror::Error)]
pub enum LogIoError {
    #[error("invalid log-I/O size: {0}")]
    InvalidSize(String),

    #[error("spill file {path:?}: {source}")]
    Spill {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Parameters for a client's log-I/O context, taken from the mount request
#[derive(Debug, Clone)]
pub struct LogIoParams {
    pub app_id: AppId,
    pub client_id: ClientId,
    /// Bytes of the superblock region used for log data
    pub shmem_size: u64,
    /// Size of the spill file
    pub spill_size: u64,
    pub spill_dir: PathBuf,
}

/// Per-client log-I/O state
#[derive(Debug)]
pub struct LogIoContext {
    spill_path: Option<PathBuf>,
    spill_file: Option<File>,
    shmem_size: u64,
}

impl LogIoContext {
    pub fn spill_path(&self) -> Option<&Path> {
        self.spill_path.as_deref()
    }

    pub fn shmem_size(&self) -> u64 {
        self.shmem_size
    }
}

/// Log-I/O engine used by the server to manage client contexts
pub trait LogIoEngine: Send + Sync {
    /// Create the context for a mounting client
    fn init_client(&self, params: &LogIoParams) -> Result<LogIoContext, LogIoError>;

    /// Release a client's context together with its superblock region
    fn release_client(
        &self,
        ctx: Option<LogIoContext>,
        superblock: Option<Arc<SharedMemoryRegion>>,
    );
}

/// Engine backed by one spill file per client
#[derive(Debug, Default)]
pub struct SpillFileLogIo {
    /// Remove spill files on release
    remove_on_release: bool,
}

impl SpillFileLogIo {
    pub fn new(remove_on_release: bool) -> Self {
        Self { remove_on_release }
    }

    pub fn spill_file_name(app_id: AppId, client_id: ClientId) -> String {
        format!("spill_{}_{}.log", app_id, client_id)
    }
}

impl LogIoEngine for SpillFileLogIo {
    fn init_client(&self, params: &LogIoParams) -> Result<LogIoContext, LogIoError> {
        if params.shmem_size == 0 && params.spill_size == 0 {
            return Err(LogIoError::InvalidSize(
                "both shmem and spill sizes are zero".to_string(),
            ));
        }

        if params.spill_size == 0 {
            return Ok(LogIoContext {
                spill_path: None,
                spill_file: None,
                shmem_size: params.shmem_size,
            });
        }

        fs::create_dir_all(&params.spill_dir).map_err(|source| LogIoError::Spill {
            path: params.spill_dir.clone(),
            source,
        })?;

        let path = params
            .spill_dir
            .join(Self::spill_file_name(params.app_id, params.client_id));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .and_then(|f| f.set_len(params.spill_size).map(|_| f))
            .map_err(|source| LogIoError::Spill {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(
            "Created spill file {:?} ({} bytes) for app={} client={}",
            path,
            params.spill_size,
            params.app_id,
            params.client_id
        );

        Ok(LogIoContext {
            spill_path: Some(path),
            spill_file: Some(file),
            shmem_size: params.shmem_size,
        })
    }

    fn release_client(
        &self,
        ctx: Option<LogIoContext>,
        superblock: Option<Arc<SharedMemoryRegion>>,
    ) {
        if let Some(region) = superblock {
            if Arc::strong_count(&region) > 1 {
                tracing::warn!("superblock {} is still referenced at release", region.name());
            }
        }
        let Some(mut ctx) = ctx else {
            return;
        };
        drop(ctx.spill_file.take());
        if self.remove_on_release {
            if let Some(path) = ctx.spill_path.take() {
                if let Err(e) = fs::remove_file(&path) {
                    tracing::warn!("Failed to remove spill file {:?}: {}", path, e);
                }
            }
        }
    }
}
