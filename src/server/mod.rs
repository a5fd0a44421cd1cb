pub mod signals;

pub use signals::{setup_signal_handlers, shutdown_requested};
