//! RPC server: pulls requests off the transport and dispatches them by id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::handlers::RpcHandlerContext;
use super::transport::IncomingRpc;
use super::types::{RpcRequest, RpcResponse};

/// How long one receive waits before the running flag is checked again
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// RPC server that receives and dispatches client requests
pub struct RpcServer {
    ctx: Arc<RpcHandlerContext>,
}

impl RpcServer {
    pub fn new(ctx: Arc<RpcHandlerContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &RpcHandlerContext {
        &self.ctx
    }

    /// Run one request through its handler and send the reply
    pub fn dispatch(&self, rpc: IncomingRpc) {
        let IncomingRpc { request, respond } = rpc;
        tracing::trace!("dispatching {} (rpc id {})", request.name(), request.id());

        let ctx = &self.ctx;
        match request {
            RpcRequest::Mount(req) => respond(RpcResponse::Mount(ctx.handle_mount(&req))),
            RpcRequest::Unmount(req) => {
                ctx.handle_unmount(&req, |resp| respond(RpcResponse::Status(resp)))
            }
            RpcRequest::MetaGet(req) => respond(RpcResponse::MetaGet(ctx.handle_meta_get(&req))),
            RpcRequest::MetaSet(req) => respond(RpcResponse::Status(ctx.handle_meta_set(&req))),
            RpcRequest::Sync(req) => respond(RpcResponse::Status(ctx.handle_sync(&req))),
            RpcRequest::Filesize(req) => {
                respond(RpcResponse::Filesize(ctx.handle_filesize(&req)))
            }
            RpcRequest::Truncate(req) => respond(RpcResponse::Status(ctx.handle_truncate(&req))),
            RpcRequest::Unlink(req) => respond(RpcResponse::Status(ctx.handle_unlink(&req))),
            RpcRequest::Laminate(req) => respond(RpcResponse::Status(ctx.handle_laminate(&req))),
            RpcRequest::Read(req) => respond(RpcResponse::Status(ctx.handle_read(&req))),
            RpcRequest::Mread(req) => respond(RpcResponse::Status(ctx.handle_mread(&req))),
        }
    }

    /// Serve requests until `running` is cleared. Returns how many were
    /// dispatched.
    pub fn serve(&self, running: &AtomicBool) -> u64 {
        tracing::info!("RPC server listening for requests");
        let mut handled = 0;
        while running.load(Ordering::Relaxed) {
            match self.ctx.transport().recv_request(POLL_INTERVAL) {
                Ok(Some(rpc)) => {
                    self.dispatch(rpc);
                    handled += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!("Failed to receive request: {}", e);
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        }
        tracing::info!("RPC server stopped after {} request(s)", handled);
        handled
    }
}
