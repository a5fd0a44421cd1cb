//! Integration tests for the metadata and worker-forwarded file RPCs.

mod common;

use burstbuf::error::Status;
use burstbuf::metadata::{FileAttributes, Timespec};
use burstbuf::rpc::types::{
    FilesizeRequest, LaminateRequest, MetaGetRequest, MetaSetRequest, SyncRequest,
    TruncateRequest, UnlinkRequest,
};
use burstbuf::shm::{region_name, RegionRole, SharedMemoryRegion, WriteIndex, WriteIndexEntry};
use proptest::prelude::*;

use common::TestServer;

fn attrs(gfid: u64, size: u64) -> FileAttributes {
    FileAttributes {
        gfid,
        mode: 0o100644,
        uid: 1000,
        gid: 1000,
        size,
        atime: Timespec::new(10, 1),
        mtime: Timespec::new(20, 2),
        ctime: Timespec::new(30, 3),
        filename: format!("/burst/file{}", gfid),
        is_laminated: false,
    }
}

fn filesize(server: &TestServer, gfid: u64) -> (i32, u64) {
    let resp = server.ctx.handle_filesize(&FilesizeRequest {
        app_id: 1,
        client_id: 0,
        gfid,
    });
    (resp.ret, resp.filesize)
}

fn mounted(test_name: &str) -> TestServer {
    let server = TestServer::new(test_name);
    assert_eq!(server.ctx.handle_mount(&server.mount_request(1, 0)).ret, 0);
    server
}

// ============================================================================
// Metadata get/set
// ============================================================================

#[test]
fn test_create_then_get() {
    let server = TestServer::new("meta_create");
    let a = attrs(11, 100);
    let set = server.ctx.handle_meta_set(&MetaSetRequest {
        attrs: a.clone(),
        create: true,
    });
    assert_eq!(set.ret, Status::Success.code());

    let got = server.ctx.handle_meta_get(&MetaGetRequest { gfid: 11 });
    assert_eq!(got.ret, Status::Success.code());
    assert_eq!(got.attrs, a);
    assert!(!got.attrs.is_laminated);
}

#[test]
fn test_get_missing_is_not_found() {
    let server = TestServer::new("meta_missing");
    let got = server.ctx.handle_meta_get(&MetaGetRequest { gfid: 404 });
    assert_eq!(got.ret, Status::NotFound.code());
}

#[test]
fn test_update_does_not_touch_size() {
    let server = TestServer::new("meta_update");
    server.ctx.handle_meta_set(&MetaSetRequest {
        attrs: attrs(5, 100),
        create: true,
    });

    let mut update = attrs(5, 1);
    update.mode = 0o100600;
    let set = server.ctx.handle_meta_set(&MetaSetRequest {
        attrs: update,
        create: false,
    });
    assert_eq!(set.ret, 0);

    let got = server.ctx.handle_meta_get(&MetaGetRequest { gfid: 5 }).attrs;
    assert_eq!(got.mode, 0o100600);
    assert_eq!(got.size, 100);
}

// ============================================================================
// Worker-forwarded operations
// ============================================================================

#[test]
fn test_truncate_to_zero() {
    let server = mounted("truncate_zero");
    server.ctx.handle_meta_set(&MetaSetRequest {
        attrs: attrs(7, 8192),
        create: true,
    });
    assert_eq!(filesize(&server, 7), (0, 8192));

    let resp = server.ctx.handle_truncate(&TruncateRequest {
        app_id: 1,
        client_id: 0,
        gfid: 7,
        filesize: 0,
    });
    assert_eq!(resp.ret, Status::Success.code());
    assert_eq!(filesize(&server, 7), (0, 0));
}

#[test]
fn test_laminated_file_rejects_changes() {
    let server = mounted("laminate");
    server.ctx.handle_meta_set(&MetaSetRequest {
        attrs: attrs(8, 64),
        create: true,
    });

    let resp = server.ctx.handle_laminate(&LaminateRequest {
        app_id: 1,
        client_id: 0,
        gfid: 8,
    });
    assert_eq!(resp.ret, 0);
    assert!(server.ctx.handle_meta_get(&MetaGetRequest { gfid: 8 }).attrs.is_laminated);

    let truncate = server.ctx.handle_truncate(&TruncateRequest {
        app_id: 1,
        client_id: 0,
        gfid: 8,
        filesize: 0,
    });
    assert_eq!(truncate.ret, Status::Laminated.code());

    let recreate = server.ctx.handle_meta_set(&MetaSetRequest {
        attrs: attrs(8, 64),
        create: true,
    });
    assert_eq!(recreate.ret, Status::Laminated.code());

    let got = server.ctx.handle_meta_get(&MetaGetRequest { gfid: 8 }).attrs;
    assert!(got.is_laminated);
    assert_eq!(got.size, 64);
}

#[test]
fn test_unlink_removes_entry() {
    let server = mounted("unlink");
    server.ctx.handle_meta_set(&MetaSetRequest {
        attrs: attrs(9, 1),
        create: true,
    });
    let resp = server.ctx.handle_unlink(&UnlinkRequest {
        app_id: 1,
        client_id: 0,
        gfid: 9,
    });
    assert_eq!(resp.ret, 0);
    assert_eq!(
        server.ctx.handle_meta_get(&MetaGetRequest { gfid: 9 }).ret,
        Status::NotFound.code()
    );
    assert_eq!(filesize(&server, 9).0, Status::NotFound.code());
}

/// Client-side view of the write index set up by `mount_request`
fn client_index(server: &TestServer) -> SharedMemoryRegion {
    let name = region_name(&server.prefix, RegionRole::Superblock, 1, 0);
    SharedMemoryRegion::attach_or_create(&name, 1 << 20).unwrap()
}

fn sync(server: &TestServer) -> i32 {
    server
        .ctx
        .handle_sync(&SyncRequest {
            app_id: 1,
            client_id: 0,
        })
        .ret
}

#[test]
fn test_sync_publishes_written_extents() {
    let server = mounted("sync");
    for (gfid, size) in [(21, 0), (22, 50)] {
        server.ctx.handle_meta_set(&MetaSetRequest {
            attrs: attrs(gfid, size),
            create: true,
        });
    }

    let superblock = client_index(&server);
    let index = WriteIndex::open(&superblock, 0, 4096).unwrap();
    index.push(WriteIndexEntry::new(21, 0, 0, 4096)).unwrap();
    index.push(WriteIndexEntry::new(21, 8192, 4096, 100)).unwrap();
    index.push(WriteIndexEntry::new(22, 0, 4196, 10)).unwrap();
    assert_eq!(filesize(&server, 21), (0, 0));

    assert_eq!(sync(&server), Status::Success.code());
    assert_eq!(filesize(&server, 21), (0, 8292));
    assert_eq!(filesize(&server, 22), (0, 50));
    assert_eq!(
        server.ctx.handle_meta_get(&MetaGetRequest { gfid: 21 }).attrs.size,
        8292
    );
    assert_eq!(index.pending(), 0);

    // Nothing new written: a second sync changes nothing
    assert_eq!(sync(&server), Status::Success.code());
    assert_eq!(filesize(&server, 21), (0, 8292));
}

#[test]
fn test_sync_into_laminated_file_is_rejected() {
    let server = mounted("sync_laminated");
    server.ctx.handle_meta_set(&MetaSetRequest {
        attrs: attrs(30, 16),
        create: true,
    });
    server.ctx.handle_laminate(&LaminateRequest {
        app_id: 1,
        client_id: 0,
        gfid: 30,
    });

    let superblock = client_index(&server);
    let index = WriteIndex::open(&superblock, 0, 4096).unwrap();
    index.push(WriteIndexEntry::new(30, 16, 0, 16)).unwrap();

    assert_eq!(sync(&server), Status::Laminated.code());
    assert_eq!(filesize(&server, 30), (0, 16));
}

#[test]
fn test_forwarded_ops_need_a_mount() {
    let server = TestServer::new("forward_unmounted");
    assert_eq!(filesize(&server, 1).0, Status::NotMounted.code());
    let resp = server.ctx.handle_laminate(&LaminateRequest {
        app_id: 1,
        client_id: 0,
        gfid: 1,
    });
    assert_eq!(resp.ret, Status::NotMounted.code());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_meta_set_get_round_trip(
        gfid in any::<u64>(),
        size in any::<u64>(),
        mode in any::<u32>(),
        name in "/[a-z]{1,16}",
    ) {
        let server = TestServer::new("meta_prop");
        let mut a = attrs(gfid, size);
        a.mode = mode;
        a.filename = name;
        let set = server.ctx.handle_meta_set(&MetaSetRequest { attrs: a.clone(), create: true });
        prop_assert_eq!(set.ret, 0);
        let got = server.ctx.handle_meta_get(&MetaGetRequest { gfid });
        prop_assert_eq!(got.ret, 0);
        prop_assert_eq!(got.attrs, a);
    }
}
