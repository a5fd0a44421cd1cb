//! Server error types and the status codes returned to clients.

use crate::logio::LogIoError;
use crate::metadata::MetadataError;
use crate::rpc::transport::TransportError;
use crate::session::{AppId, ClientId};
use crate::shm::ShmError;

/// Status code carried in every RPC response (`ret` field)
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Status {
    Success = 0,
    /// Generic or unspecified failure
    Failure = 1,
    /// Shared memory region could not be created or mapped
    ShmemError = 2,
    /// Log-I/O context initialization failed
    LogIoError = 3,
    /// Worker thread failed to start
    WorkerStartError = 4,
    /// Client address lookup failed
    AddressResolutionError = 5,
    /// Metadata lookup miss
    NotFound = 6,
    /// Malformed request (bad client id, short bulk buffer, ...)
    InvalidArgument = 7,
    /// Slot is bound or still draining from an unmount
    Busy = 8,
    /// No mounted client for the given (app_id, client_id)
    NotMounted = 9,
    /// Operation would modify a laminated file
    Laminated = 10,
    /// Bulk registration or pull failed
    BulkTransferError = 11,
}

impl Status {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Status::Success,
            2 => Status::ShmemError,
            3 => Status::LogIoError,
            4 => Status::WorkerStartError,
            5 => Status::AddressResolutionError,
            6 => Status::NotFound,
            7 => Status::InvalidArgument,
            8 => Status::Busy,
            9 => Status::NotMounted,
            10 => Status::Laminated,
            11 => Status::BulkTransferError,
            _ => Status::Failure,
        }
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let desc = match self {
            Status::Success => "success",
            Status::Failure => "failure",
            Status::ShmemError => "shared memory error",
            Status::LogIoError => "log-based I/O error",
            Status::WorkerStartError => "failed to start request manager",
            Status::AddressResolutionError => "address lookup failed",
            Status::NotFound => "not found",
            Status::InvalidArgument => "invalid argument",
            Status::Busy => "resource busy",
            Status::NotMounted => "client not mounted",
            Status::Laminated => "file is laminated",
            Status::BulkTransferError => "bulk transfer failed",
        };
        write!(f, "{}", desc)
    }
}

/// Errors raised while servicing client RPCs
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("shared memory error: {0}")]
    Shm(#[from] ShmError),

    #[error("log-based I/O error: {0}")]
    LogIo(#[from] LogIoError),

    #[error("failed to start request manager for app={app_id} client={client_id}: {reason}")]
    WorkerStart {
        app_id: AppId,
        client_id: ClientId,
        reason: String,
    },

    #[error("address lookup failed: {0}")]
    AddressResolution(#[source] TransportError),

    #[error("bulk transfer failed: {0}")]
    Bulk(#[source] TransportError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("client slot app={app_id} client={client_id} is busy")]
    Busy { app_id: AppId, client_id: ClientId },

    #[error("no mounted client app={app_id} client={client_id}")]
    NotMounted { app_id: AppId, client_id: ClientId },

    #[error("request manager for app={app_id} client={client_id} is gone")]
    WorkerGone { app_id: AppId, client_id: ClientId },

    #[error("{0}")]
    Failure(String),
}

impl ServerError {
    /// Status code reported to the client for this error
    pub fn status(&self) -> Status {
        match self {
            ServerError::Shm(_) => Status::ShmemError,
            ServerError::LogIo(_) => Status::LogIoError,
            ServerError::WorkerStart { .. } => Status::WorkerStartError,
            ServerError::AddressResolution(_) => Status::AddressResolutionError,
            ServerError::Bulk(_) => Status::BulkTransferError,
            ServerError::Metadata(e) => e.status(),
            ServerError::InvalidArgument(_) => Status::InvalidArgument,
            ServerError::Busy { .. } => Status::Busy,
            ServerError::NotMounted { .. } => Status::NotMounted,
            ServerError::WorkerGone { .. } | ServerError::Failure(_) => Status::Failure,
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Collapse a handler result into the status code sent on the wire
pub fn status_of<T>(result: &ServerResult<T>) -> i32 {
    match result {
        Ok(_) => Status::Success.code(),
        Err(e) => e.status().code(),
    }
}
