//! Shared memory attachment for a newly mounted client.

use std::sync::Arc;

use super::{ApplicationSession, ClientId, ClientSession};
use crate::shm::{region_name, RegionRole, SharedBufferHeader, SharedMemoryRegion, ShmError};

/// Attach the client's superblock and receive-buffer regions.
///
/// Regions are stored into `session` as soon as they are attached. There is
/// no rollback: if the receive buffer fails, the superblock stays recorded
/// and is released with the rest of the session at unmount.
pub fn attach(
    prefix: &str,
    app: &ApplicationSession,
    client_id: ClientId,
    session: &mut ClientSession,
) -> Result<(), ShmError> {
    attach_with(prefix, app, client_id, session, SharedBufferHeader::initialize)
}

fn attach_with(
    prefix: &str,
    app: &ApplicationSession,
    client_id: ClientId,
    session: &mut ClientSession,
    init_header: impl FnOnce(&SharedMemoryRegion) -> Result<bool, ShmError>,
) -> Result<(), ShmError> {
    let app_id = app.app_id();
    let config = app.config();

    let super_name = region_name(prefix, RegionRole::Superblock, app_id, client_id);
    let superblock = SharedMemoryRegion::attach_or_create(&super_name, config.superblock_size)
        .inspect_err(|e| {
            tracing::error!(
                "Failed to attach superblock app={} client={}: {}",
                app_id,
                client_id,
                e
            )
        })?;
    session.superblock = Some(Arc::new(superblock));

    let recv_name = region_name(prefix, RegionRole::ReceiveBuffer, app_id, client_id);
    let receive_buffer =
        SharedMemoryRegion::attach_or_create(&recv_name, config.receive_buffer_size).inspect_err(
            |e| {
                tracing::error!(
                    "Failed to attach receive buffer app={} client={}: {}",
                    app_id,
                    client_id,
                    e
                )
            },
        )?;
    let receive_buffer: &SharedMemoryRegion = session.receive_buffer.insert(receive_buffer);

    if !init_header(receive_buffer)? {
        tracing::warn!(
            "Continuing without a header lock for app={} client={}",
            app_id,
            client_id
        );
    }

    tracing::debug!(
        "Attached shared memory for app={} client={} (rank {})",
        app_id,
        client_id,
        session.debug_rank
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::app::tests::test_config;
    use crate::shm::header::LockInit;
    use crate::shm::BufferState;

    fn unique_prefix(tag: &str) -> String {
        format!(
            "bbattach_{}_{}_{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        )
    }

    #[test]
    fn test_attach_initializes_header() {
        let app = ApplicationSession::new(1, test_config());
        let mut session = ClientSession::new(0, 0);
        attach(&unique_prefix("ok"), &app, 0, &mut session).unwrap();

        let superblock = session.superblock.as_ref().unwrap();
        assert_eq!(superblock.size(), 1 << 20);
        let recv = session.receive_buffer.as_ref().unwrap();
        assert_eq!(recv.size(), 4096);

        let hdr = SharedBufferHeader::open(recv).unwrap();
        let guard = hdr.lock().unwrap();
        assert_eq!(guard.entry_count(), 0);
        assert_eq!(guard.byte_count(), 0);
        assert_eq!(guard.state(), Some(BufferState::Empty));
    }

    #[test]
    fn test_failed_receive_buffer_keeps_superblock() {
        let mut config = test_config();
        config.receive_buffer_size = 0;
        let app = ApplicationSession::new(1, config);
        let mut session = ClientSession::new(0, 0);

        let err = attach(&unique_prefix("partial"), &app, 0, &mut session).unwrap_err();
        assert!(matches!(err, ShmError::InvalidSize { .. }));
        assert!(session.superblock.is_some());
        assert!(session.receive_buffer.is_none());
    }

    #[test]
    fn test_lock_failure_does_not_fail_attach() {
        unsafe fn refuse(_: *mut libc::pthread_mutex_t) -> libc::c_int {
            libc::ENOMEM
        }
        let refuse: LockInit = refuse;
        let app = ApplicationSession::new(2, test_config());
        let mut session = ClientSession::new(0, 0);

        attach_with(&unique_prefix("nolock"), &app, 0, &mut session, |region| {
            SharedBufferHeader::initialize_with(region, refuse)
        })
        .unwrap();

        assert!(session.superblock.is_some());
        let recv = session.receive_buffer.as_ref().unwrap();
        assert!(SharedBufferHeader::open(recv).is_ok());
    }

    #[test]
    fn test_attach_reuses_client_created_region() {
        let prefix = unique_prefix("client");
        let app = ApplicationSession::new(3, test_config());

        // The client creates its receive buffer before mounting
        let name = region_name(&prefix, RegionRole::ReceiveBuffer, 3, 1);
        let client_side = SharedMemoryRegion::attach_or_create(&name, 4096).unwrap();

        let mut session = ClientSession::new(1, 1);
        attach(&prefix, &app, 1, &mut session).unwrap();
        assert!(!session.receive_buffer.as_ref().unwrap().is_owner());

        let hdr = SharedBufferHeader::open(&client_side).unwrap();
        assert_eq!(hdr.lock().unwrap().state(), Some(BufferState::Empty));
    }
}
