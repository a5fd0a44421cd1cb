use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ServerError, ServerResult};
use crate::metadata::{Gfid, MetadataStore};
use crate::rpc::types::ReadRequestEntry;
use crate::session::{AppId, ClientId};
use crate::shm::{SharedMemoryRegion, WriteIndex};

/// What a worker knows about its client
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub app_id: AppId,
    pub client_id: ClientId,
    /// Superblock holding the client's write index
    pub superblock: Option<Arc<SharedMemoryRegion>>,
    pub metadata_offset: usize,
    /// Bytes reserved for the write index; 0 when the client keeps none
    pub metadata_size: usize,
}

/// Servicing logic run on the worker thread
pub trait RequestEngine: Send + Sync {
    /// Per-client setup, run before the worker thread starts
    fn prepare(&self, _ctx: &ClientContext) -> ServerResult<()> {
        Ok(())
    }

    /// Publish pending write index entries; returns how many were consumed
    fn sync(&self, ctx: &ClientContext) -> ServerResult<u64>;

    fn read(&self, ctx: &ClientContext, entry: ReadRequestEntry) -> ServerResult<()>;

    fn batched_read(&self, ctx: &ClientContext, entries: Vec<ReadRequestEntry>)
        -> ServerResult<()>;

    fn filesize(&self, ctx: &ClientContext, gfid: Gfid) -> ServerResult<u64>;

    fn truncate(&self, ctx: &ClientContext, gfid: Gfid, size: u64) -> ServerResult<()>;

    fn unlink(&self, ctx: &ClientContext, gfid: Gfid) -> ServerResult<()>;

    fn laminate(&self, ctx: &ClientContext, gfid: Gfid) -> ServerResult<()>;
}

/// Engine that serves everything from the local metadata store
pub struct LocalEngine {
    store: Arc<dyn MetadataStore>,
    /// Reads accepted per client, in arrival order
    dispatched: Mutex<Vec<(AppId, ClientId, ReadRequestEntry)>>,
}

impl LocalEngine {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store,
            dispatched: Mutex::new(Vec::new()),
        }
    }

    /// Reads dispatched for `(app_id, client_id)` so far
    pub fn dispatched_reads(&self, app_id: AppId, client_id: ClientId) -> Vec<ReadRequestEntry> {
        self.dispatched
            .lock()
            .iter()
            .filter(|(a, c, _)| *a == app_id && *c == client_id)
            .map(|(_, _, e)| *e)
            .collect()
    }

    fn write_index(ctx: &ClientContext) -> ServerResult<Option<WriteIndex<'_>>> {
        if ctx.metadata_size == 0 {
            return Ok(None);
        }
        let region = ctx.superblock.as_deref().ok_or_else(|| {
            ServerError::Failure(format!(
                "no superblock attached for app={} client={}",
                ctx.app_id, ctx.client_id
            ))
        })?;
        Ok(Some(WriteIndex::open(
            region,
            ctx.metadata_offset,
            ctx.metadata_size,
        )?))
    }
}

impl RequestEngine for LocalEngine {
    fn prepare(&self, ctx: &ClientContext) -> ServerResult<()> {
        if ctx.superblock.is_none() {
            return Ok(());
        }
        Self::write_index(ctx).map(|_| ())
    }

    fn sync(&self, ctx: &ClientContext) -> ServerResult<u64> {
        let Some(index) = Self::write_index(ctx)? else {
            return Ok(0);
        };
        let entries = index.entries();

        let mut extents: BTreeMap<Gfid, u64> = BTreeMap::new();
        for entry in &entries {
            let end = extents.entry(entry.gfid).or_insert(0);
            *end = (*end).max(entry.end());
        }

        let mut first_error = None;
        for (gfid, end) in extents {
            if let Err(e) = self.store.extend_size(gfid, end) {
                tracing::warn!(
                    "sync app={} client={}: gfid {} not published: {}",
                    ctx.app_id,
                    ctx.client_id,
                    gfid,
                    e
                );
                first_error.get_or_insert(e);
            }
        }
        index.clear();

        tracing::debug!(
            "sync app={} client={}: {} index entries",
            ctx.app_id,
            ctx.client_id,
            entries.len()
        );
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(entries.len() as u64),
        }
    }

    fn read(&self, ctx: &ClientContext, entry: ReadRequestEntry) -> ServerResult<()> {
        self.dispatched
            .lock()
            .push((ctx.app_id, ctx.client_id, entry));
        Ok(())
    }

    fn batched_read(
        &self,
        ctx: &ClientContext,
        entries: Vec<ReadRequestEntry>,
    ) -> ServerResult<()> {
        let mut dispatched = self.dispatched.lock();
        dispatched.extend(entries.into_iter().map(|e| (ctx.app_id, ctx.client_id, e)));
        Ok(())
    }

    fn filesize(&self, _ctx: &ClientContext, gfid: Gfid) -> ServerResult<u64> {
        Ok(self.store.get(gfid)?.size)
    }

    fn truncate(&self, _ctx: &ClientContext, gfid: Gfid, size: u64) -> ServerResult<()> {
        Ok(self.store.set_size(gfid, size)?)
    }

    fn unlink(&self, _ctx: &ClientContext, gfid: Gfid) -> ServerResult<()> {
        Ok(self.store.remove(gfid)?)
    }

    fn laminate(&self, _ctx: &ClientContext, gfid: Gfid) -> ServerResult<()> {
        Ok(self.store.laminate(gfid)?)
    }
}
