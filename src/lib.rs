//! burstbuf - server-side session and I/O coordination for a burst buffer
//!
//! A burstbuf server runs on every compute node and serves the client
//! processes of one or more parallel applications. It:
//!
//! - **Tracks sessions** ([`session`]): one application session per app id,
//!   holding up to [`constants::MAX_APP_CLIENTS`] client slots
//! - **Shares memory with clients** ([`shm`]): attaches to each client's
//!   superblock and receive-buffer regions and initializes the shared buffer
//!   header the two sides coordinate through
//! - **Runs a request manager per client** ([`worker`]): a dedicated thread fed
//!   through a command channel
//! - **Handles client RPCs** ([`rpc`]): mount/unmount, metadata, sync, file
//!   size, truncate, unlink, laminate, and single or batched reads whose
//!   request lists are pulled from client memory by bulk transfer
//!
//! The transport, metadata store, log-I/O engine and servicing engine are
//! traits; in-process implementations let the daemon run on a single node.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use burstbuf::logio::SpillFileLogIo;
//! use burstbuf::metadata::MemoryMetadataStore;
//! use burstbuf::rpc::{HandlerSettings, LoopbackTransport, RpcHandlerContext};
//! use burstbuf::session::{EvictionPolicy, SessionRegistry};
//! use burstbuf::worker::LocalEngine;
//!
//! let store = Arc::new(MemoryMetadataStore::new());
//! let ctx = RpcHandlerContext::new(
//!     HandlerSettings::default(),
//!     SessionRegistry::new(EvictionPolicy::Retain),
//!     Arc::new(LoopbackTransport::new()),
//!     store.clone(),
//!     Arc::new(SpillFileLogIo::default()),
//!     Arc::new(LocalEngine::new(store)),
//! );
//! ctx.shutdown();
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod logio;
pub mod metadata;
pub mod rpc;
pub mod server;
pub mod session;
pub mod shm;
pub mod worker;
