//! BlockVault Core Types
//!
//! Shared vocabulary for the BlockVault storage and consolidation layers:
//! the wire format of backup blocks and records, the fixed-size descriptors
//! the volume store keeps on disk, the 64-bit positional block address, and
//! the job identifiers used by the catalog and the director.

pub mod error;
pub mod job;
pub mod wire;

pub use error::{Error, Result};
pub use job::{JobId, JobLevel, JobStatus};
pub use wire::{
    block_number, split_block_number, BlockDescriptor, BlockHeader, RecordDescriptor, RecordHeader,
};
