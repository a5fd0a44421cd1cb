pub mod bulk;
pub mod handlers;
pub mod loopback;
pub mod server;
pub mod transport;
pub mod types;

pub use handlers::{HandlerSettings, MountReport, MountStep, RpcHandlerContext};
pub use loopback::LoopbackTransport;
pub use server::RpcServer;
pub use transport::{
    BulkHandle, IncomingRpc, RemoteAddress, Responder, Transport, TransportError,
};

/// RPC ID type for identifying different RPC operations
pub type RpcId = u16;
