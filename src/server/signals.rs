//! Signal handling for the burstbuf daemon
//!
//! SIGINT, SIGTERM and SIGQUIT clear the daemon's running flag; the main
//! loop notices and tears down every mounted client before exiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

static RUNNING_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// Register shutdown handlers that clear `running`.
///
/// Only the first registered flag is used; later calls just return it.
///
/// # Example
/// ```ignore
/// let running = Arc::new(AtomicBool::new(true));
/// setup_signal_handlers(running.clone());
///
/// while running.load(Ordering::Relaxed) {
///     // Server loop
/// }
/// ```
pub fn setup_signal_handlers(running: Arc<AtomicBool>) -> Arc<AtomicBool> {
    let flag = RUNNING_FLAG.get_or_init(|| running).clone();

    #[cfg(unix)]
    {
        use libc::{SIGINT, SIGQUIT, SIGTERM};
        unsafe {
            libc::signal(SIGINT, shutdown_signal_handler as libc::sighandler_t);
            libc::signal(SIGTERM, shutdown_signal_handler as libc::sighandler_t);
            libc::signal(SIGQUIT, shutdown_signal_handler as libc::sighandler_t);
        }
    }
    tracing::debug!("Signal handlers registered for SIGINT/SIGTERM/SIGQUIT");

    flag
}

/// Whether a shutdown signal has been received
pub fn shutdown_requested() -> bool {
    RUNNING_FLAG
        .get()
        .map(|flag| !flag.load(Ordering::Relaxed))
        .unwrap_or(false)
}

// Only async-signal-safe work here: a single atomic store.
#[cfg(unix)]
extern "C" fn shutdown_signal_handler(_: libc::c_int) {
    if let Some(flag) = RUNNING_FLAG.get() {
        flag.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_clears_registered_flag() {
        let running = setup_signal_handlers(Arc::new(AtomicBool::new(true)));
        assert!(Arc::ptr_eq(
            &running,
            &setup_signal_handlers(Arc::new(AtomicBool::new(true)))
        ));
        assert!(!shutdown_requested());

        shutdown_signal_handler(libc::SIGTERM);
        assert!(!running.load(Ordering::Relaxed));
        assert!(shutdown_requested());
    }
}
