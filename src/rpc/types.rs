//! Request and response messages for the client-facing RPCs.

use serde::{Deserialize, Serialize};

use super::transport::BulkHandle;
use super::RpcId;
use crate::error::Status;
use crate::metadata::{FileAttributes, Gfid};
use crate::session::{AppId, ClientId};

pub const RPC_MOUNT: RpcId = 1;
pub const RPC_UNMOUNT: RpcId = 2;
pub const RPC_METAGET: RpcId = 10;
pub const RPC_METASET: RpcId = 11;
pub const RPC_SYNC: RpcId = 12;
pub const RPC_FILESIZE: RpcId = 13;
pub const RPC_TRUNCATE: RpcId = 14;
pub const RPC_UNLINK: RpcId = 15;
pub const RPC_LAMINATE: RpcId = 16;
pub const RPC_READ: RpcId = 20;
pub const RPC_MREAD: RpcId = 21;

/// One element of a batched read, as laid out in the bulk buffer
#[repr(C)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    zerocopy::FromBytes,
    zerocopy::IntoBytes,
    zerocopy::KnownLayout,
    zerocopy::Immutable,
)]
pub struct ReadRequestEntry {
    pub gfid: u64,
    pub offset: u64,
    pub length: u64,
}

const _: () = assert!(std::mem::size_of::<ReadRequestEntry>() == 24);

impl ReadRequestEntry {
    pub const SIZE: usize = std::mem::size_of::<ReadRequestEntry>();

    pub fn new(gfid: Gfid, offset: u64, length: u64) -> Self {
        Self {
            gfid,
            offset,
            length,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRequest {
    pub app_id: AppId,
    pub client_id: ClientId,
    pub debug_rank: i32,
    pub receive_buffer_size: usize,
    pub superblock_size: usize,
    pub metadata_offset: usize,
    pub metadata_size: usize,
    pub spill_directory: String,
    pub clients_per_node: u32,
    /// Transport address string of the client
    pub client_address: String,
    pub logio_shmem_size: u64,
    pub logio_spill_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountResponse {
    pub ret: i32,
    /// Largest number of entries a client may pack into one mread slice
    pub max_batch_read_entries_per_slice: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmountRequest {
    pub app_id: AppId,
    pub client_id: ClientId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub ret: i32,
}

impl StatusResponse {
    pub fn success() -> Self {
        Self {
            ret: Status::Success.code(),
        }
    }

    pub fn error(status: Status) -> Self {
        Self { ret: status.code() }
    }

    pub fn status(&self) -> Status {
        Status::from_code(self.ret)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaGetRequest {
    pub gfid: Gfid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaGetResponse {
    pub ret: i32,
    pub attrs: FileAttributes,
}

impl MetaGetResponse {
    pub fn success(attrs: FileAttributes) -> Self {
        Self {
            ret: Status::Success.code(),
            attrs,
        }
    }

    pub fn error(status: Status) -> Self {
        Self {
            ret: status.code(),
            attrs: FileAttributes::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaSetRequest {
    pub attrs: FileAttributes,
    /// Initialize a new entry, size and lamination included
    pub create: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub app_id: AppId,
    pub client_id: ClientId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesizeRequest {
    pub app_id: AppId,
    pub client_id: ClientId,
    pub gfid: Gfid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesizeResponse {
    pub ret: i32,
    pub filesize: u64,
}

impl FilesizeResponse {
    pub fn success(filesize: u64) -> Self {
        Self {
            ret: Status::Success.code(),
            filesize,
        }
    }

    pub fn error(status: Status) -> Self {
        Self {
            ret: status.code(),
            filesize: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncateRequest {
    pub app_id: AppId,
    pub client_id: ClientId,
    pub gfid: Gfid,
    pub filesize: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlinkRequest {
    pub app_id: AppId,
    pub client_id: ClientId,
    pub gfid: Gfid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaminateRequest {
    pub app_id: AppId,
    pub client_id: ClientId,
    pub gfid: Gfid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub app_id: AppId,
    pub client_id: ClientId,
    pub gfid: Gfid,
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MreadRequest {
    pub app_id: AppId,
    pub client_id: ClientId,
    /// Number of [`ReadRequestEntry`] records in the bulk buffer
    pub request_count: u32,
    pub bulk_handle: BulkHandle,
    /// Size of the remote bulk buffer in bytes
    pub byte_size: u64,
}

/// A client request as delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcRequest {
    Mount(MountRequest),
    Unmount(UnmountRequest),
    MetaGet(MetaGetRequest),
    MetaSet(MetaSetRequest),
    Sync(SyncRequest),
    Filesize(FilesizeRequest),
    Truncate(TruncateRequest),
    Unlink(UnlinkRequest),
    Laminate(LaminateRequest),
    Read(ReadRequest),
    Mread(MreadRequest),
}

impl RpcRequest {
    pub fn id(&self) -> RpcId {
        match self {
            RpcRequest::Mount(_) => RPC_MOUNT,
            RpcRequest::Unmount(_) => RPC_UNMOUNT,
            RpcRequest::MetaGet(_) => RPC_METAGET,
            RpcRequest::MetaSet(_) => RPC_METASET,
            RpcRequest::Sync(_) => RPC_SYNC,
            RpcRequest::Filesize(_) => RPC_FILESIZE,
            RpcRequest::Truncate(_) => RPC_TRUNCATE,
            RpcRequest::Unlink(_) => RPC_UNLINK,
            RpcRequest::Laminate(_) => RPC_LAMINATE,
            RpcRequest::Read(_) => RPC_READ,
            RpcRequest::Mread(_) => RPC_MREAD,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RpcRequest::Mount(_) => "mount",
            RpcRequest::Unmount(_) => "unmount",
            RpcRequest::MetaGet(_) => "metaget",
            RpcRequest::MetaSet(_) => "metaset",
            RpcRequest::Sync(_) => "sync",
            RpcRequest::Filesize(_) => "filesize",
            RpcRequest::Truncate(_) => "truncate",
            RpcRequest::Unlink(_) => "unlink",
            RpcRequest::Laminate(_) => "laminate",
            RpcRequest::Read(_) => "read",
            RpcRequest::Mread(_) => "mread",
        }
    }
}

/// Reply to an [`RpcRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcResponse {
    Mount(MountResponse),
    MetaGet(MetaGetResponse),
    Filesize(FilesizeResponse),
    Status(StatusResponse),
}

impl RpcResponse {
    /// Status code carried by the reply
    pub fn ret(&self) -> i32 {
        match self {
            RpcResponse::Mount(r) => r.ret,
            RpcResponse::MetaGet(r) => r.ret,
            RpcResponse::Filesize(r) => r.ret,
            RpcResponse::Status(r) => r.ret,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::{FromBytes, IntoBytes};

    #[test]
    fn test_read_entry_wire_layout() {
        let entry = ReadRequestEntry::new(0x0102, 0x0304, 0x0506);
        let bytes = entry.as_bytes();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[0..8], &0x0102u64.to_ne_bytes());
        assert_eq!(&bytes[8..16], &0x0304u64.to_ne_bytes());
        assert_eq!(&bytes[16..24], &0x0506u64.to_ne_bytes());
        assert_eq!(ReadRequestEntry::read_from_bytes(bytes).unwrap(), entry);
    }

    #[test]
    fn test_status_response_constructors() {
        assert_eq!(StatusResponse::success().status(), Status::Success);
        assert_eq!(StatusResponse::error(Status::Busy).ret, 8);
        let resp = MetaGetResponse::error(Status::NotFound);
        assert_eq!(resp.ret, Status::NotFound.code());
        assert_eq!(resp.attrs, FileAttributes::default());
    }

    #[test]
    fn test_request_ids_are_distinct() {
        let requests = [
            RpcRequest::Unmount(UnmountRequest { app_id: 1, client_id: 0 }),
            RpcRequest::MetaGet(MetaGetRequest { gfid: 1 }),
            RpcRequest::Sync(SyncRequest { app_id: 1, client_id: 0 }),
            RpcRequest::Read(ReadRequest {
                app_id: 1,
                client_id: 0,
                gfid: 1,
                offset: 0,
                length: 1,
            }),
        ];
        let ids: Vec<RpcId> = requests.iter().map(RpcRequest::id).collect();
        assert_eq!(ids, vec![RPC_UNMOUNT, RPC_METAGET, RPC_SYNC, RPC_READ]);
        assert_eq!(requests[2].name(), "sync");
    }

    #[test]
    fn test_mount_request_serde() {
        let req = MountRequest {
            app_id: 1,
            client_id: 0,
            debug_rank: 0,
            receive_buffer_size: 4096,
            superblock_size: 1 << 20,
            metadata_offset: 0,
            metadata_size: 4096,
            spill_directory: "/tmp".into(),
            clients_per_node: 1,
            client_address: "loop://client-0".into(),
            logio_shmem_size: 4096,
            logio_spill_size: 0,
        };
        let text = toml::to_string(&req).unwrap();
        let back: MountRequest = toml::from_str(&text).unwrap();
        assert_eq!(back, req);
    }
}
