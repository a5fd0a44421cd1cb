//! burstbuf Server Daemon
//!
//! Wires the RPC handlers to the in-process collaborators, serves requests
//! from the transport until a shutdown signal arrives, then releases every
//! mounted client.

use burstbuf::config::ServerConfig;
use burstbuf::logio::SpillFileLogIo;
use burstbuf::metadata::MemoryMetadataStore;
use burstbuf::rpc::{HandlerSettings, LoopbackTransport, RpcHandlerContext, RpcServer};
use burstbuf::server::setup_signal_handlers;
use burstbuf::session::SessionRegistry;
use burstbuf::worker::LocalEngine;

use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "burstbufd", about = "burstbuf server daemon")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "burstbuf.toml")]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

/// Server state
struct ServerState {
    running: Arc<AtomicBool>,
}

impl ServerState {
    fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }
}

fn main() {
    let args = Args::parse();

    let mut config = match ServerConfig::from_file(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            eprintln!("Using default configuration");
            ServerConfig::default()
        }
    };
    if let Some(level) = args.log_level {
        config.node.log_level = level;
    }

    let log_path = config.log_path(&burstbuf::logging::hostname());
    if let Err(e) = burstbuf::logging::init_logging(&config.node.log_level, log_path.as_deref()) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Starting burstbuf server");
    tracing::info!("Shared memory prefix: {}", config.shm.name_prefix);
    tracing::info!("Eviction policy: {:?}", config.session.eviction);

    let state = ServerState::new();
    setup_signal_handlers(state.running.clone());

    let store = Arc::new(MemoryMetadataStore::new());
    let ctx = Arc::new(RpcHandlerContext::new(
        HandlerSettings::from_config(&config),
        SessionRegistry::new(config.session.eviction),
        Arc::new(LoopbackTransport::new()),
        store.clone(),
        Arc::new(SpillFileLogIo::new(true)),
        Arc::new(LocalEngine::new(store)),
    ));
    let rpc_server = RpcServer::new(ctx.clone());

    tracing::info!("Server ready");
    let handled = rpc_server.serve(&state.running);

    tracing::info!("Shutdown requested after {} request(s)", handled);
    let released = ctx.shutdown();
    tracing::info!("Server stopped ({} client session(s) released)", released);
}
