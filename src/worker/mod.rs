//! Per-client request manager thread.
//!
//! Each mounted client gets one worker thread. RPC handlers talk to it only
//! through a command channel and wait for the reply on a one-shot channel;
//! the thread's join handle is owned by the client session.

pub mod engine;

pub use engine::{ClientContext, LocalEngine, RequestEngine};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::{ServerError, ServerResult};
use crate::metadata::Gfid;
use crate::rpc::types::ReadRequestEntry;
use crate::session::{AppId, ClientId};

pub type WorkerId = u64;

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Commands accepted by a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Publish the client's pending write index entries
    Sync,
    Read(ReadRequestEntry),
    BatchedRead(Vec<ReadRequestEntry>),
    Filesize(Gfid),
    Truncate { gfid: Gfid, size: u64 },
    Unlink(Gfid),
    Laminate(Gfid),
    /// Finish the loop and let the thread exit
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Done,
    Size(u64),
}

struct Envelope {
    command: Command,
    reply: flume::Sender<ServerResult<Reply>>,
}

/// Owning handle of a running worker
pub struct WorkerHandle {
    id: WorkerId,
    sender: WorkerSender,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Start the worker thread for `ctx`
    pub fn spawn(
        ctx: ClientContext,
        engine: Arc<dyn RequestEngine>,
        queue_depth: usize,
    ) -> ServerResult<Self> {
        let (app_id, client_id) = (ctx.app_id, ctx.client_id);
        let start_failed = |reason: String| ServerError::WorkerStart {
            app_id,
            client_id,
            reason,
        };
        engine
            .prepare(&ctx)
            .map_err(|e| start_failed(e.to_string()))?;

        let id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = flume::bounded::<Envelope>(queue_depth.max(1));
        let join = thread::Builder::new()
            .name(format!("reqmgr-{}-{}", app_id, client_id))
            .spawn(move || run(id, ctx, engine, rx))
            .map_err(|e| start_failed(e.to_string()))?;

        tracing::debug!(
            "Started request manager {} for app={} client={}",
            id,
            app_id,
            client_id
        );

        Ok(Self {
            id,
            sender: WorkerSender {
                app_id,
                client_id,
                tx,
            },
            join: Some(join),
        })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn sender(&self) -> WorkerSender {
        self.sender.clone()
    }

    /// Send `Exit` and wait for the thread to finish
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        if let Err(e) = self.sender.call(Command::Exit) {
            tracing::warn!("request manager {} did not accept exit: {}", self.id, e);
        }
        if join.join().is_err() {
            tracing::error!("request manager {} panicked", self.id);
        }
        tracing::debug!("Stopped request manager {}", self.id);
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("app_id", &self.sender.app_id)
            .field("client_id", &self.sender.client_id)
            .field("running", &self.join.is_some())
            .finish()
    }
}

/// Cloneable command sender for a worker
#[derive(Clone)]
pub struct WorkerSender {
    app_id: AppId,
    client_id: ClientId,
    tx: flume::Sender<Envelope>,
}

impl WorkerSender {
    /// Send `command` and block until the worker replies
    pub fn call(&self, command: Command) -> ServerResult<Reply> {
        let gone = || ServerError::WorkerGone {
            app_id: self.app_id,
            client_id: self.client_id,
        };
        let (reply_tx, reply_rx) = flume::bounded(1);
        self.tx
            .send(Envelope {
                command,
                reply: reply_tx,
            })
            .map_err(|_| gone())?;
        reply_rx.recv().map_err(|_| gone())?
    }

    pub fn sync(&self) -> ServerResult<()> {
        self.call(Command::Sync).map(|_| ())
    }

    pub fn read(&self, entry: ReadRequestEntry) -> ServerResult<()> {
        self.call(Command::Read(entry)).map(|_| ())
    }

    pub fn batched_read(&self, entries: Vec<ReadRequestEntry>) -> ServerResult<()> {
        self.call(Command::BatchedRead(entries)).map(|_| ())
    }

    pub fn filesize(&self, gfid: Gfid) -> ServerResult<u64> {
        match self.call(Command::Filesize(gfid))? {
            Reply::Size(size) => Ok(size),
            Reply::Done => Err(ServerError::Failure(
                "filesize produced no size".to_string(),
            )),
        }
    }

    pub fn truncate(&self, gfid: Gfid, size: u64) -> ServerResult<()> {
        self.call(Command::Truncate { gfid, size }).map(|_| ())
    }

    pub fn unlink(&self, gfid: Gfid) -> ServerResult<()> {
        self.call(Command::Unlink(gfid)).map(|_| ())
    }

    pub fn laminate(&self, gfid: Gfid) -> ServerResult<()> {
        self.call(Command::Laminate(gfid)).map(|_| ())
    }
}

fn run(
    id: WorkerId,
    ctx: ClientContext,
    engine: Arc<dyn RequestEngine>,
    rx: flume::Receiver<Envelope>,
) {
    while let Ok(Envelope { command, reply }) = rx.recv() {
        let exit = command == Command::Exit;
        let result = match command {
            Command::Sync => engine.sync(&ctx).map(|_| Reply::Done),
            Command::Read(entry) => engine.read(&ctx, entry).map(|_| Reply::Done),
            Command::BatchedRead(entries) => {
                engine.batched_read(&ctx, entries).map(|_| Reply::Done)
            }
            Command::Filesize(gfid) => engine.filesize(&ctx, gfid).map(Reply::Size),
            Command::Truncate { gfid, size } => {
                engine.truncate(&ctx, gfid, size).map(|_| Reply::Done)
            }
            Command::Unlink(gfid) => engine.unlink(&ctx, gfid).map(|_| Reply::Done),
            Command::Laminate(gfid) => engine.laminate(&ctx, gfid).map(|_| Reply::Done),
            Command::Exit => Ok(Reply::Done),
        };
        if let Err(e) = &result {
            tracing::debug!("request manager {} command failed: {}", id, e);
        }
        // The caller may have given up waiting
        let _ = reply.send(result);
        if exit {
            break;
        }
    }
    tracing::trace!(
        "request manager {} for app={} client={} exiting",
        id,
        ctx.app_id,
        ctx.client_id
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{FileAttributes, MemoryMetadataStore, MetadataStore};

    fn ctx() -> ClientContext {
        ClientContext {
            app_id: 1,
            client_id: 0,
            superblock: None,
            metadata_offset: 0,
            metadata_size: 0,
        }
    }

    struct RefusingEngine;

    impl RequestEngine for RefusingEngine {
        fn prepare(&self, _ctx: &ClientContext) -> ServerResult<()> {
            Err(ServerError::Failure("no capacity".to_string()))
        }
        fn sync(&self, _ctx: &ClientContext) -> ServerResult<u64> {
            Ok(0)
        }
        fn read(&self, _ctx: &ClientContext, _entry: ReadRequestEntry) -> ServerResult<()> {
            Ok(())
        }
        fn batched_read(
            &self,
            _ctx: &ClientContext,
            _entries: Vec<ReadRequestEntry>,
        ) -> ServerResult<()> {
            Ok(())
        }
        fn filesize(&self, _ctx: &ClientContext, _gfid: Gfid) -> ServerResult<u64> {
            Ok(0)
        }
        fn truncate(&self, _ctx: &ClientContext, _gfid: Gfid, _size: u64) -> ServerResult<()> {
            Ok(())
        }
        fn unlink(&self, _ctx: &ClientContext, _gfid: Gfid) -> ServerResult<()> {
            Ok(())
        }
        fn laminate(&self, _ctx: &ClientContext, _gfid: Gfid) -> ServerResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_prepare_is_a_start_error() {
        let err = WorkerHandle::spawn(ctx(), Arc::new(RefusingEngine), 1).unwrap_err();
        assert!(matches!(
            &err,
            ServerError::WorkerStart {
                app_id: 1,
                client_id: 0,
                ..
            }
        ));
        assert_eq!(err.status(), crate::error::Status::WorkerStartError);
        assert!(err.to_string().contains("no capacity"));
    }

    #[test]
    fn test_commands_round_trip_through_worker() {
        let store = Arc::new(MemoryMetadataStore::new());
        let mut attrs = FileAttributes::new(7, "/w", 0o644);
        attrs.size = 4096;
        store.set(&attrs, true, true).unwrap();

        let engine = Arc::new(LocalEngine::new(store.clone()));
        let worker = WorkerHandle::spawn(ctx(), engine, 4).unwrap();
        let sender = worker.sender();

        assert_eq!(sender.filesize(7).unwrap(), 4096);
        sender.truncate(7, 10).unwrap();
        assert_eq!(sender.filesize(7).unwrap(), 10);
        sender.laminate(7).unwrap();
        assert!(store.get(7).unwrap().is_laminated);
        sender.unlink(7).unwrap();
        assert!(store.get(7).is_err());

        worker.stop();
        assert!(matches!(
            sender.sync(),
            Err(ServerError::WorkerGone { .. })
        ));
    }

    #[test]
    fn test_worker_ids_are_unique() {
        let engine: Arc<dyn RequestEngine> =
            Arc::new(LocalEngine::new(Arc::new(MemoryMetadataStore::new())));
        let a = WorkerHandle::spawn(ctx(), engine.clone(), 1).unwrap();
        let b = WorkerHandle::spawn(ctx(), engine, 1).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_drop_stops_thread() {
        let engine = Arc::new(LocalEngine::new(Arc::new(MemoryMetadataStore::new())));
        let worker = WorkerHandle::spawn(ctx(), engine, 1).unwrap();
        let sender = worker.sender();
        drop(worker);
        assert!(sender.sync().is_err());
    }
}
