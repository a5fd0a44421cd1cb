//! Integration tests for request dispatch from the transport to the handlers.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use burstbuf::error::Status;
use burstbuf::metadata::FileAttributes;
use burstbuf::rpc::types::{
    FilesizeRequest, MetaSetRequest, ReadRequest, RpcRequest, RpcResponse, StatusResponse,
    SyncRequest, UnmountRequest,
};
use burstbuf::rpc::RpcServer;
use burstbuf::shm::{region_name, RegionRole, SharedMemoryRegion, WriteIndex, WriteIndexEntry};

use common::TestServer;

fn call(server: &TestServer, request: RpcRequest) -> RpcResponse {
    server
        .transport
        .submit(request)
        .recv_timeout(Duration::from_secs(10))
        .expect("request was never answered")
}

#[test]
fn test_requests_reach_handlers_through_transport() {
    let server = TestServer::new("dispatch");
    let rpc_server = RpcServer::new(server.ctx.clone());
    let running = Arc::new(AtomicBool::new(true));
    let serving = {
        let running = running.clone();
        thread::spawn(move || rpc_server.serve(&running))
    };

    let resp = call(&server, RpcRequest::Mount(server.mount_request(1, 0)));
    let RpcResponse::Mount(mount) = resp else {
        panic!("expected a typed reply");
    };
    assert_eq!(mount.ret, Status::Success.code());
    assert!(mount.max_batch_read_entries_per_slice > 0);

    let attrs = FileAttributes::new(5, "/burst/dispatch", 0o644);
    let resp = call(
        &server,
        RpcRequest::MetaSet(MetaSetRequest {
            attrs,
            create: true,
        }),
    );
    assert_eq!(resp.ret(), Status::Success.code());

    {
        let name = region_name(&server.prefix, RegionRole::Superblock, 1, 0);
        let superblock = SharedMemoryRegion::attach_or_create(&name, 1 << 20).unwrap();
        WriteIndex::open(&superblock, 0, 4096)
            .unwrap()
            .push(WriteIndexEntry::new(5, 0, 0, 777))
            .unwrap();
    }
    let resp = call(
        &server,
        RpcRequest::Sync(SyncRequest {
            app_id: 1,
            client_id: 0,
        }),
    );
    assert_eq!(resp, RpcResponse::Status(StatusResponse::success()));

    let resp = call(
        &server,
        RpcRequest::Filesize(FilesizeRequest {
            app_id: 1,
            client_id: 0,
            gfid: 5,
        }),
    );
    let RpcResponse::Filesize(size) = resp else {
        panic!("expected a typed reply");
    };
    assert_eq!(size.filesize, 777);

    let resp = call(
        &server,
        RpcRequest::Unmount(UnmountRequest {
            app_id: 1,
            client_id: 0,
        }),
    );
    assert_eq!(resp.ret(), Status::Success.code());

    let resp = call(
        &server,
        RpcRequest::Read(ReadRequest {
            app_id: 1,
            client_id: 0,
            gfid: 5,
            offset: 0,
            length: 1,
        }),
    );
    assert_eq!(resp.ret(), Status::NotMounted.code());

    running.store(false, Ordering::Relaxed);
    assert_eq!(serving.join().unwrap(), 6);
}

#[test]
fn test_serve_returns_when_stopped() {
    let server = TestServer::new("dispatch_idle");
    let rpc_server = RpcServer::new(server.ctx.clone());
    let running = AtomicBool::new(false);
    assert_eq!(rpc_server.serve(&running), 0);
}
