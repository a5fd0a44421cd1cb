//! File attribute storage used by the metadata RPCs.
pub mod store;
pub mod types;

pub use store::{MemoryMetadataStore, MetadataError, MetadataResult, MetadataStore};
pub use types::{FileAttributes, Gfid, Timespec};
